//! Decision gates: the placement policy the balancer defers to.
//!
//! The balancer asks a gate before every initial placement and before every
//! relocation trial. Only [`Decision::Yes`] allows the move; `No` and
//! `Throttle` both block it for the rest of the pass. Gates see the mirror,
//! i.e. the hypothetical placement being built, and must not have side
//! effects.

use serde::{Deserialize, Serialize};

use crate::ledger::{CopyRef, Mirror, NodeLedger};

/// Answer of a decision gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Yes,
    No,
    Throttle,
}

impl Decision {
    pub fn is_yes(self) -> bool {
        self == Decision::Yes
    }

    /// Combine two answers: `No` wins over `Throttle`, which wins over `Yes`.
    pub fn and(self, other: Decision) -> Decision {
        match (self, other) {
            (Decision::No, _) | (_, Decision::No) => Decision::No,
            (Decision::Throttle, _) | (_, Decision::Throttle) => Decision::Throttle,
            _ => Decision::Yes,
        }
    }
}

/// Policy oracle consulted before a copy lands on a node.
pub trait DecisionGate {
    fn can_place(&self, copy: &CopyRef, node: &NodeLedger, mirror: &Mirror) -> Decision;
}

impl<G: DecisionGate + ?Sized> DecisionGate for &G {
    fn can_place(&self, copy: &CopyRef, node: &NodeLedger, mirror: &Mirror) -> Decision {
        (**self).can_place(copy, node, mirror)
    }
}

impl<G: DecisionGate + ?Sized> DecisionGate for Box<G> {
    fn can_place(&self, copy: &CopyRef, node: &NodeLedger, mirror: &Mirror) -> Decision {
        (**self).can_place(copy, node, mirror)
    }
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl DecisionGate for AllowAll {
    fn can_place(&self, _copy: &CopyRef, _node: &NodeLedger, _mirror: &Mirror) -> Decision {
        Decision::Yes
    }
}

/// Rejects a node that already holds another copy of the same shard,
/// pinned copies included.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameShardGate;

impl DecisionGate for SameShardGate {
    fn can_place(&self, copy: &CopyRef, node: &NodeLedger, _mirror: &Mirror) -> Decision {
        if node.holds_sibling_of(copy) {
            Decision::No
        } else {
            Decision::Yes
        }
    }
}

/// Gate backed by a closure.
pub struct FnGate<F>(pub F);

impl<F> DecisionGate for FnGate<F>
where
    F: Fn(&CopyRef, &NodeLedger, &Mirror) -> Decision,
{
    fn can_place(&self, copy: &CopyRef, node: &NodeLedger, mirror: &Mirror) -> Decision {
        (self.0)(copy, node, mirror)
    }
}

/// All gates must approve. Stops at the first `No`.
#[derive(Default)]
pub struct GateChain {
    gates: Vec<Box<dyn DecisionGate>>,
}

impl GateChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gate: impl DecisionGate + 'static) -> Self {
        self.gates.push(Box::new(gate));
        self
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

impl DecisionGate for GateChain {
    fn can_place(&self, copy: &CopyRef, node: &NodeLedger, mirror: &Mirror) -> Decision {
        let mut decision = Decision::Yes;
        for gate in &self.gates {
            decision = decision.and(gate.can_place(copy, node, mirror));
            if decision == Decision::No {
                break;
            }
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn copy(shard: u32, slot: u32) -> CopyRef {
        CopyRef {
            index: Arc::from("logs"),
            shard,
            slot,
            primary: slot == 0,
        }
    }

    #[test]
    fn decision_combination() {
        assert_eq!(Decision::Yes.and(Decision::Yes), Decision::Yes);
        assert_eq!(Decision::Yes.and(Decision::Throttle), Decision::Throttle);
        assert_eq!(Decision::Throttle.and(Decision::No), Decision::No);
        assert!(!Decision::Throttle.is_yes());
    }

    #[test]
    fn same_shard_gate_blocks_second_copy() {
        let mut mirror = Mirror::new(["a", "b"]);
        mirror.place(copy(0, 0), "a");

        let gate = SameShardGate;
        let a = mirror.node("a").unwrap();
        let b = mirror.node("b").unwrap();

        assert_eq!(gate.can_place(&copy(0, 1), a, &mirror), Decision::No);
        assert_eq!(gate.can_place(&copy(0, 1), b, &mirror), Decision::Yes);
        assert_eq!(gate.can_place(&copy(1, 0), a, &mirror), Decision::Yes);
    }

    #[test]
    fn same_shard_gate_sees_pinned_copies() {
        let mut mirror = Mirror::new(["a", "b"]);
        mirror.pin(copy(0, 2), "a");

        let gate = SameShardGate;
        let a = mirror.node("a").unwrap();

        assert_eq!(gate.can_place(&copy(0, 1), a, &mirror), Decision::No);
        // The pinned copy itself may stay where it is.
        assert_eq!(gate.can_place(&copy(0, 2), a, &mirror), Decision::Yes);
    }

    #[test]
    fn fn_gate_delegates_to_closure() {
        let mirror = Mirror::new(["a", "b"]);
        let gate = FnGate(|_: &CopyRef, node: &NodeLedger, _: &Mirror| {
            if node.id() == "a" {
                Decision::No
            } else {
                Decision::Yes
            }
        });

        assert_eq!(gate.can_place(&copy(0, 0), mirror.node("a").unwrap(), &mirror), Decision::No);
        assert_eq!(gate.can_place(&copy(0, 0), mirror.node("b").unwrap(), &mirror), Decision::Yes);
    }

    #[test]
    fn chain_requires_every_gate() {
        let mut mirror = Mirror::new(["a", "b"]);
        mirror.place(copy(0, 0), "a");

        let chain = GateChain::new()
            .with(AllowAll)
            .with(SameShardGate)
            .with(FnGate(|_: &CopyRef, node: &NodeLedger, _: &Mirror| {
                if node.id() == "b" {
                    Decision::Throttle
                } else {
                    Decision::Yes
                }
            }));

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.can_place(&copy(0, 1), mirror.node("a").unwrap(), &mirror), Decision::No);
        assert_eq!(
            chain.can_place(&copy(0, 1), mirror.node("b").unwrap(), &mirror),
            Decision::Throttle
        );
        assert_eq!(chain.can_place(&copy(1, 0), mirror.node("a").unwrap(), &mirror), Decision::Yes);
    }

    #[test]
    fn empty_chain_approves() {
        let mirror = Mirror::new(["a"]);
        let chain = GateChain::new();
        assert!(chain.is_empty());
        assert!(chain.can_place(&copy(0, 0), mirror.node("a").unwrap(), &mirror).is_yes());
    }
}
