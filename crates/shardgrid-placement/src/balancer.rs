//! Balancing context: builds the mirror, balances it, applies the result.
//!
//! One pass works like this:
//! 1. Mirror the snapshot's nodes and distribute every copy greedily to the
//!    lightest node (primary first, then replicas)
//! 2. Per index, repeatedly move the best copy from the heaviest node to the
//!    lightest until the weight spread is within the threshold
//! 3. Diff the mirror against the snapshot and relocate what differs
//!
//! Only step 3 touches the snapshot. A context is single-use: build it,
//! balance, apply, drop it.
//!
//! Initial placement does not fall back to the second-lightest node when the
//! gate rejects the lightest one. The copy stays unassigned for this pass and
//! is retried on the next one. When placing from scratch, every copy starts
//! pinned to its current node until it is placed, so a copy the gate keeps
//! where it is still occupies its node for the rest of the pass.

use std::collections::BTreeMap;

use serde::Serialize;
use shardgrid_core::{BalanceSection, ClusterSnapshot, IndexName, NodeId, SeedMode};
use tracing::{debug, info, trace, warn};

use crate::convert::placement_order;
use crate::decider::DecisionGate;
use crate::error::{PlacementError, PlacementResult};
use crate::ledger::{CopyRef, Mirror, NodeLedger};
use crate::weight::{NodeWeight, WeightFunction, rank_nodes};

/// Tuning of the per-index balance loop.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceOptions {
    /// Stop once `weight(heaviest) - weight(lightest)` is at most this.
    pub threshold: f64,
    /// Re-rank nodes after every relocation. When off, the loop keeps
    /// reading the two ends of the ranking taken before the first move.
    pub resort_each_iteration: bool,
    /// Upper bound on relocations per index in one pass. With re-sorting
    /// and no explicit cap, the bound is copies of the index times nodes.
    pub max_steps_per_index: Option<u32>,
}

impl Default for BalanceOptions {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            resort_each_iteration: false,
            max_steps_per_index: None,
        }
    }
}

impl BalanceOptions {
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    pub fn from_config(section: &BalanceSection) -> PlacementResult<Self> {
        let options = Self {
            threshold: section.threshold,
            resort_each_iteration: section.resort_each_iteration,
            max_steps_per_index: section.max_steps_per_index,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> PlacementResult<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(PlacementError::InvalidThreshold(self.threshold));
        }
        if self.max_steps_per_index == Some(0) {
            return Err(PlacementError::InvalidStepCap);
        }
        Ok(())
    }
}

/// A copy that must move to reach the mirrored placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relocation {
    pub index: IndexName,
    pub shard: u32,
    pub slot: u32,
    pub primary: bool,
    /// Current node; `None` if the copy is unassigned today.
    pub from: Option<NodeId>,
    pub to: NodeId,
}

/// Relocations performed per index by [`BalancingContext::balance`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BalanceStats {
    pub steps: BTreeMap<IndexName, u32>,
}

impl BalanceStats {
    pub fn total_steps(&self) -> u32 {
        self.steps.values().sum()
    }
}

/// Result of a full [`rebalance`] pass.
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceOutcome {
    pub changed: bool,
    pub relocations: Vec<Relocation>,
    /// Copies the gate kept out of the mirror, as `(index, shard, slot)`.
    pub unassigned: Vec<(IndexName, u32, u32)>,
    pub stats: BalanceStats,
}

/// Private mirror of cluster placement plus the strategies driving it.
pub struct BalancingContext<'a, W, G> {
    snapshot: &'a mut ClusterSnapshot,
    mirror: Mirror,
    weights: W,
    gate: G,
    unassigned: Vec<CopyRef>,
    relocations: Vec<Relocation>,
    stats: BalanceStats,
}

impl<'a, W: WeightFunction, G: DecisionGate> BalancingContext<'a, W, G> {
    /// Build a context that places every copy from scratch.
    pub fn new(snapshot: &'a mut ClusterSnapshot, weights: W, gate: G) -> Self {
        Self::seeded(snapshot, weights, gate, SeedMode::Scratch)
    }

    /// Build a context, seeding the mirror according to `seed`.
    ///
    /// With [`SeedMode::Current`], copies already on a known node are
    /// mirrored in place before anything else is distributed. With
    /// [`SeedMode::Scratch`], they are pinned to that node until placed.
    pub fn seeded(
        snapshot: &'a mut ClusterSnapshot,
        weights: W,
        gate: G,
        seed: SeedMode,
    ) -> Self {
        let mut mirror = Mirror::new(snapshot.list_nodes().iter().cloned());
        for index in snapshot.list_indices() {
            mirror.add_index(index);
        }

        let mut groups: Vec<Vec<CopyRef>> = Vec::new();
        for index in &snapshot.indices {
            for group in &index.shards {
                let mut pending = Vec::with_capacity(group.copies.len());
                for copy in placement_order(group) {
                    let copy_ref = CopyRef::from(copy);
                    let kept = match (seed, copy.current_node()) {
                        (SeedMode::Current, Some(node)) => mirror.place(copy_ref.clone(), node),
                        (SeedMode::Scratch, Some(node)) => {
                            mirror.pin(copy_ref.clone(), node);
                            false
                        }
                        (_, None) => false,
                    };
                    if !kept {
                        pending.push(copy_ref);
                    }
                }
                groups.push(pending);
            }
        }

        let mut ctx = Self {
            snapshot,
            mirror,
            weights,
            gate,
            unassigned: Vec::new(),
            relocations: Vec::new(),
            stats: BalanceStats::default(),
        };

        for group in groups {
            ctx.distribute(group);
        }

        debug!(
            nodes = ctx.mirror.node_count(),
            mirrored = ctx.mirror.total_copies(),
            unassigned = ctx.unassigned.len(),
            ?seed,
            "balancing context built"
        );
        ctx
    }

    /// Place one shard group, primary first.
    fn distribute(&mut self, group: Vec<CopyRef>) {
        for copy in group {
            self.allocate_replica(copy);
        }
    }

    /// Put `copy` on the lightest node for its index if the gate agrees.
    ///
    /// Ties go to the first node in id order. A rejection is final for this
    /// pass; the next-lightest node is not tried.
    pub fn allocate_replica(&mut self, copy: CopyRef) -> bool {
        let mut best: Option<(&NodeLedger, f64)> = None;
        for node in self.mirror.nodes() {
            let weight = self.weights.weight(&self.mirror, node, &copy.index);
            if best.is_none_or(|(_, w)| weight < w) {
                best = Some((node, weight));
            }
        }

        let Some((node, weight)) = best else {
            warn!(index = %copy.index, shard = copy.shard, slot = copy.slot, "no nodes to place copy on");
            self.unassigned.push(copy);
            return false;
        };
        let decision = self.gate.can_place(&copy, node, &self.mirror);
        let node_id = node.id().to_string();

        if decision.is_yes() {
            debug!(
                index = %copy.index,
                shard = copy.shard,
                slot = copy.slot,
                primary = copy.primary,
                node = %node_id,
                weight,
                "placed copy"
            );
            self.mirror.place(copy, &node_id)
        } else {
            warn!(
                index = %copy.index,
                shard = copy.shard,
                slot = copy.slot,
                node = %node_id,
                ?decision,
                "copy left unassigned for this pass"
            );
            self.unassigned.push(copy);
            false
        }
    }

    /// Balance every index with the default options and `threshold`.
    pub fn balance(&mut self, threshold: f64) -> bool {
        self.balance_with(&BalanceOptions::with_threshold(threshold))
    }

    /// Balance every index. Returns whether the mirror changed.
    pub fn balance_with(&mut self, options: &BalanceOptions) -> bool {
        if self.mirror.node_count() < 2 {
            debug!(nodes = self.mirror.node_count(), "fewer than two nodes, nothing to balance");
            return false;
        }

        let indices: Vec<String> = self.mirror.indices().map(str::to_string).collect();
        let mut pass_steps = 0u32;
        for index in &indices {
            let steps = self.balance_index(index, options);
            pass_steps += steps;
            *self.stats.steps.entry(index.clone()).or_default() += steps;
        }

        let changed = pass_steps > 0;
        info!(
            indices = indices.len(),
            relocations = pass_steps,
            changed,
            "balance pass finished"
        );
        changed
    }

    fn balance_index(&mut self, index: &str, options: &BalanceOptions) -> u32 {
        let cap = options.max_steps_per_index.or_else(|| {
            // Re-ranked pairs can hand the same copies back and forth.
            options.resort_each_iteration.then(|| {
                let bound = self.mirror.copies_of_index(index) * self.mirror.node_count();
                u32::try_from(bound).unwrap_or(u32::MAX).max(1)
            })
        });
        let mut order = self.ranked(index);
        let mut last_diff: Option<f64> = None;
        let mut steps = 0u32;

        loop {
            if options.resort_each_iteration && steps > 0 {
                order = self.ranked(index);
            }
            let (Some(min), Some(max)) = (order.first(), order.last()) else {
                break;
            };
            let (min, max) = (min.node_id.clone(), max.node_id.clone());

            let diff = self.weight_of(&max, index) - self.weight_of(&min, index);
            if last_diff == Some(diff) {
                debug!(%index, diff, "no progress, index settled");
                break;
            }
            last_diff = Some(diff);

            if diff <= options.threshold {
                debug!(%index, diff, threshold = options.threshold, "index balanced");
                break;
            }

            if cap.is_some_and(|cap| steps >= cap) {
                warn!(%index, steps, diff, "step cap reached before index converged");
                break;
            }

            match self.relocate_some_shard(&max, &min, index) {
                Some(copy) => {
                    steps += 1;
                    debug!(
                        %index,
                        shard = copy.shard,
                        slot = copy.slot,
                        from = %max,
                        to = %min,
                        diff,
                        "relocated copy"
                    );
                }
                None => {
                    debug!(%index, from = %max, to = %min, "no eligible copy to move");
                    break;
                }
            }
        }

        steps
    }

    /// Move the copy of `index` whose relocation from `src` to `dst` leaves
    /// the lowest `weight(dst) - weight(src)`.
    ///
    /// Every gate-approved copy is tried on the mirror and rolled back; only
    /// the winner is committed. Returns `None` if the gate approves none.
    pub fn relocate_some_shard(&mut self, src: &str, dst: &str, index: &str) -> Option<CopyRef> {
        let candidates: Vec<CopyRef> = self.mirror.node(src)?.copies_of(index).cloned().collect();

        let mut best: Option<(CopyRef, f64)> = None;
        for copy in candidates {
            let decision = self.gate.can_place(&copy, self.mirror.node(dst)?, &self.mirror);
            if !decision.is_yes() {
                trace!(%index, shard = copy.shard, slot = copy.slot, node = %dst, ?decision, "candidate rejected");
                continue;
            }

            if !self.mirror.relocate(&copy, src, dst) {
                continue;
            }
            let cost = self.weight_of(dst, index) - self.weight_of(src, index);
            self.mirror.relocate(&copy, dst, src);

            trace!(%index, shard = copy.shard, slot = copy.slot, cost, "candidate evaluated");
            if best.as_ref().is_none_or(|(_, c)| cost < *c) {
                best = Some((copy, cost));
            }
        }

        let (copy, _) = best?;
        self.mirror.relocate(&copy, src, dst).then_some(copy)
    }

    /// Relocations needed to make the snapshot match the mirror.
    pub fn plan(&self) -> Vec<Relocation> {
        let mut plan = Vec::new();
        for node in self.mirror.nodes() {
            for (_, ledger) in node.index_ledgers() {
                for copy in ledger.copies() {
                    let current = self
                        .snapshot
                        .copy(&copy.index, copy.shard, copy.slot)
                        .and_then(|c| c.current_node());
                    if current != Some(node.id()) {
                        plan.push(Relocation {
                            index: copy.index.to_string(),
                            shard: copy.shard,
                            slot: copy.slot,
                            primary: copy.primary,
                            from: current.map(str::to_string),
                            to: node.id().to_string(),
                        });
                    }
                }
            }
        }
        plan.sort_by(|a, b| (&a.index, a.shard, a.slot).cmp(&(&b.index, b.shard, b.slot)));
        plan
    }

    /// Write the mirrored placement back to the snapshot. Returns whether
    /// any copy moved.
    pub fn apply(&mut self) -> bool {
        let plan = self.plan();
        for relocation in &plan {
            if let Some(copy) =
                self.snapshot
                    .copy_mut(&relocation.index, relocation.shard, relocation.slot)
            {
                info!(
                    index = %relocation.index,
                    shard = relocation.shard,
                    slot = relocation.slot,
                    from = relocation.from.as_deref().unwrap_or("-"),
                    to = %relocation.to,
                    "relocating copy"
                );
                copy.relocate_to(relocation.to.clone());
            }
        }
        let changed = !plan.is_empty();
        self.relocations.extend(plan);
        changed
    }

    /// Weight of `node` for `index` under the current mirror.
    pub fn weight_of(&self, node: &str, index: &str) -> f64 {
        self.mirror
            .node(node)
            .map_or(f64::NAN, |n| self.weights.weight(&self.mirror, n, index))
    }

    /// Nodes ranked lightest first for `index`.
    pub fn ranked(&self, index: &str) -> Vec<NodeWeight> {
        let ranked = rank_nodes(&self.mirror, &self.weights, index);
        trace!(%index, ?ranked, "nodes ranked");
        ranked
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn snapshot(&self) -> &ClusterSnapshot {
        &*self.snapshot
    }

    /// Copies initial distribution could not place.
    pub fn unassigned(&self) -> &[CopyRef] {
        &self.unassigned
    }

    /// Relocations performed by [`apply`](Self::apply) so far.
    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    pub fn stats(&self) -> &BalanceStats {
        &self.stats
    }
}

/// Build, balance and apply in one go.
pub fn rebalance<W: WeightFunction, G: DecisionGate>(
    snapshot: &mut ClusterSnapshot,
    weights: W,
    gate: G,
    options: &BalanceOptions,
    seed: SeedMode,
) -> PlacementResult<RebalanceOutcome> {
    snapshot.validate()?;
    options.validate()?;

    let mut ctx = BalancingContext::seeded(snapshot, weights, gate, seed);
    ctx.balance_with(options);
    let changed = ctx.apply();

    Ok(RebalanceOutcome {
        changed,
        relocations: ctx.relocations,
        unassigned: ctx
            .unassigned
            .iter()
            .map(|c| (c.index.to_string(), c.shard, c.slot))
            .collect(),
        stats: ctx.stats,
    })
}
