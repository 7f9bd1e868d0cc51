//! Balancing scenarios.
//!
//! End-to-end passes over in-memory snapshots: initial distribution,
//! balancing an existing skew, gate rejections, copy conservation, and
//! termination over a grid of cluster shapes.

use std::collections::HashMap;

use shardgrid_core::{ClusterSnapshot, SeedMode};
use shardgrid_placement::*;

fn basic() -> BasicWeights {
    BasicWeights::new(0.5, 0.5, 0.0).unwrap()
}

fn primaries_only(nodes: &[&str], shards: u32) -> ClusterSnapshot {
    let mut snapshot = ClusterSnapshot::with_nodes(nodes.iter().copied());
    snapshot.add_index("i", shards, 0);
    snapshot
}

fn assign(snapshot: &mut ClusterSnapshot, index: &str, shard: u32, slot: u32, node: &str) {
    snapshot.copy_mut(index, shard, slot).unwrap().relocate_to(node);
}

fn count_on(snapshot: &ClusterSnapshot, node: &str) -> usize {
    snapshot.copies_on(node).count()
}

/// Every copy of every shard is either mirrored on exactly one node or
/// reported unassigned.
fn assert_conserved<W: WeightFunction, G: DecisionGate>(ctx: &BalancingContext<'_, W, G>) {
    let mut unassigned: HashMap<(String, u32), usize> = HashMap::new();
    for copy in ctx.unassigned() {
        *unassigned.entry((copy.index.to_string(), copy.shard)).or_default() += 1;
    }

    for index in &ctx.snapshot().indices {
        for group in &index.shards {
            let mirrored = ctx.mirror().copies_of_shard(&index.name, group.shard);
            let missing = unassigned
                .get(&(index.name.clone(), group.shard))
                .copied()
                .unwrap_or(0);
            assert_eq!(
                mirrored + missing,
                group.copies.len(),
                "copies of {}/{} not conserved",
                index.name,
                group.shard
            );
        }
    }
}

fn spread<W: WeightFunction, G: DecisionGate>(ctx: &BalancingContext<'_, W, G>, index: &str) -> f64 {
    let ranked = ctx.ranked(index);
    ranked.last().unwrap().weight - ranked.first().unwrap().weight
}

// ── Initial distribution ──────────────────────────────────────────

#[test]
fn even_initial_distribution() {
    let mut snapshot = primaries_only(&["A", "B"], 4);
    {
        let mut ctx = BalancingContext::new(&mut snapshot, basic(), AllowAll);
        assert_eq!(ctx.mirror().node("A").unwrap().num_copies(), 2);
        assert_eq!(ctx.mirror().node("B").unwrap().num_copies(), 2);
        assert!(ctx.apply());
        assert_eq!(ctx.relocations().len(), 4);
        assert!(ctx.relocations().iter().all(|r| r.from.is_none()));
    }
    assert_eq!(count_on(&snapshot, "A"), 2);
    assert_eq!(count_on(&snapshot, "B"), 2);
}

#[test]
fn primaries_are_placed_before_replicas() {
    let mut snapshot = ClusterSnapshot::with_nodes(["A", "B"]);
    snapshot.add_index("i", 1, 1);
    let ctx = BalancingContext::new(&mut snapshot, basic(), SameShardGate);

    // Primary takes the tie on A, the replica follows to B.
    let a = ctx.mirror().node("A").unwrap();
    let b = ctx.mirror().node("B").unwrap();
    assert_eq!(a.num_primaries(), 1);
    assert_eq!(b.num_copies(), 1);
    assert_eq!(b.num_primaries(), 0);
}

#[test]
fn blocked_copy_stays_unplaced() {
    let mut snapshot = primaries_only(&["A", "B"], 4);
    let gate = FnGate(|copy: &CopyRef, _: &NodeLedger, _: &Mirror| {
        if copy.shard == 2 { Decision::No } else { Decision::Yes }
    });
    {
        let mut ctx = BalancingContext::new(&mut snapshot, basic(), gate);

        assert_eq!(ctx.unassigned().len(), 1);
        assert_eq!(ctx.unassigned()[0].shard, 2);
        assert_eq!(ctx.mirror().total_copies(), 3);
        assert_conserved(&ctx);

        assert!(ctx.apply());
        assert!(ctx.relocations().iter().all(|r| r.shard != 2));
        assert_eq!(ctx.relocations().len(), 3);
    }
    assert!(!snapshot.copy("i", 2, 0).unwrap().is_assigned());
}

#[test]
fn blocked_copy_keeps_its_current_node() {
    let mut snapshot = primaries_only(&["A", "B"], 2);
    assign(&mut snapshot, "i", 1, 0, "B");
    let gate = FnGate(|copy: &CopyRef, _: &NodeLedger, _: &Mirror| {
        if copy.shard == 1 { Decision::No } else { Decision::Yes }
    });
    {
        let mut ctx = BalancingContext::new(&mut snapshot, basic(), gate);
        ctx.apply();
        assert!(ctx.relocations().iter().all(|r| r.shard != 1));
    }
    assert_eq!(snapshot.copy("i", 1, 0).unwrap().current_node(), Some("B"));
}

#[test]
fn ties_prefer_smaller_node_id() {
    let mut snapshot = primaries_only(&["node-b", "node-a"], 1);
    let ctx = BalancingContext::new(&mut snapshot, basic(), AllowAll);

    assert_eq!(ctx.mirror().node("node-a").unwrap().num_copies(), 1);
    let ranked = ctx.ranked("i");
    assert_eq!(ranked[0].node_id, "node-b");
    assert_eq!(ranked[1].node_id, "node-a");
}

#[test]
fn equal_weights_rank_by_id() {
    let mut snapshot = primaries_only(&["c", "a", "b"], 0);
    let ctx = BalancingContext::new(&mut snapshot, basic(), AllowAll);

    let ids: Vec<String> = ctx.ranked("i").into_iter().map(|n| n.node_id).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

// ── Balancing ─────────────────────────────────────────────────────

#[test]
fn balancing_an_existing_skew() {
    let mut snapshot = primaries_only(&["A", "B"], 4);
    assign(&mut snapshot, "i", 0, 0, "A");
    assign(&mut snapshot, "i", 1, 0, "A");
    assign(&mut snapshot, "i", 2, 0, "A");
    assign(&mut snapshot, "i", 3, 0, "B");

    {
        let mut ctx = BalancingContext::seeded(&mut snapshot, basic(), AllowAll, SeedMode::Current);
        assert!(ctx.balance(1.1));
        assert!(!ctx.balance(1.1));
        assert_eq!(ctx.stats().total_steps(), 1);

        assert!(ctx.apply());
        let moves = ctx.relocations();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].from.as_deref(), Some("A"));
        assert_eq!(moves[0].to, "B");
    }
    assert_eq!(count_on(&snapshot, "A"), 2);
    assert_eq!(count_on(&snapshot, "B"), 2);

    // The next pass over the balanced snapshot has nothing to do.
    let mut ctx = BalancingContext::seeded(&mut snapshot, basic(), AllowAll, SeedMode::Current);
    assert!(!ctx.balance(1.1));
    assert!(!ctx.apply());
}

#[test]
fn balance_is_idempotent_once_within_threshold() {
    let mut snapshot = ClusterSnapshot::with_nodes(["a", "b", "c"]);
    snapshot.add_index("logs", 6, 1);
    snapshot.add_index("metrics", 3, 0);
    let mut ctx = BalancingContext::new(&mut snapshot, basic(), SameShardGate);

    for index in ["logs", "metrics"] {
        assert!(spread(&ctx, index) <= 1.0, "{index} not within threshold");
    }
    assert!(!ctx.balance(1.0));
    assert_eq!(ctx.stats().total_steps(), 0);
}

#[test]
fn stale_order_and_resort_reach_different_placements() {
    let build = || {
        let mut snapshot = primaries_only(&["a", "b", "c"], 6);
        for shard in 0..6 {
            assign(&mut snapshot, "i", shard, 0, "a");
        }
        snapshot
    };
    let index_only = || BasicWeights::new(1.0, 0.0, 0.0).unwrap();

    // Stale order: the loop keeps pairing a with b, c is never visited.
    let mut stale = build();
    {
        let mut ctx = BalancingContext::seeded(&mut stale, index_only(), AllowAll, SeedMode::Current);
        assert!(ctx.balance(1.0));
        assert_eq!(ctx.stats().total_steps(), 3);
        ctx.apply();
    }
    assert_eq!(count_on(&stale, "a"), 3);
    assert_eq!(count_on(&stale, "b"), 3);
    assert_eq!(count_on(&stale, "c"), 0);

    // Re-sorting every iteration spreads across all three nodes.
    let mut resorted = build();
    {
        let mut ctx =
            BalancingContext::seeded(&mut resorted, index_only(), AllowAll, SeedMode::Current);
        let options = BalanceOptions {
            threshold: 1.0,
            resort_each_iteration: true,
            max_steps_per_index: None,
        };
        assert!(ctx.balance_with(&options));
        assert_eq!(ctx.stats().total_steps(), 4);
        ctx.apply();
    }
    for node in ["a", "b", "c"] {
        assert_eq!(count_on(&resorted, node), 2);
    }
}

#[test]
fn same_shard_gate_limits_relocation() {
    // Two nodes, one shard with a primary and a replica: nothing can move.
    let mut snapshot = ClusterSnapshot::with_nodes(["a", "b"]);
    snapshot.add_index("i", 1, 1);
    assign(&mut snapshot, "i", 0, 0, "a");
    assign(&mut snapshot, "i", 0, 1, "b");

    let mut ctx = BalancingContext::seeded(&mut snapshot, basic(), SameShardGate, SeedMode::Current);
    assert!(ctx.relocate_some_shard("a", "b", "i").is_none());
    assert!(!ctx.balance(0.1));
}

#[test]
fn indices_are_balanced_independently() {
    let mut snapshot = ClusterSnapshot::with_nodes(["a", "b"]);
    snapshot.add_index("logs", 4, 0);
    snapshot.add_index("metrics", 4, 0);
    for shard in 0..4 {
        assign(&mut snapshot, "logs", shard, 0, "a");
        assign(&mut snapshot, "metrics", shard, 0, "b");
    }

    let w = BasicWeights::new(1.0, 0.0, 0.0).unwrap();
    let mut ctx = BalancingContext::seeded(&mut snapshot, w, AllowAll, SeedMode::Current);
    assert!(ctx.balance(1.0));

    let a = ctx.mirror().node("a").unwrap();
    let b = ctx.mirror().node("b").unwrap();
    assert_eq!(a.num_copies_of("logs"), 2);
    assert_eq!(b.num_copies_of("metrics"), 2);
    assert_eq!(ctx.stats().steps.get("logs"), Some(&2));
    assert_eq!(ctx.stats().steps.get("metrics"), Some(&2));
}

// ── Conservation and termination ──────────────────────────────────

#[test]
fn copies_are_conserved_through_a_full_pass() {
    let mut snapshot = ClusterSnapshot::with_nodes(["n1", "n2", "n3"]);
    snapshot.add_index("logs", 5, 2);
    snapshot.add_index("metrics", 2, 3);

    let mut ctx = BalancingContext::new(&mut snapshot, basic(), SameShardGate);
    assert_conserved(&ctx);
    // metrics has 4 copies per shard but only 3 nodes.
    assert_eq!(ctx.unassigned().len(), 2);

    ctx.balance(1.0);
    assert_conserved(&ctx);

    for node in ctx.mirror().nodes() {
        for (index, ledger) in node.index_ledgers() {
            let mut shards: Vec<u32> = ledger.copies().map(|c| c.shard).collect();
            let before = shards.len();
            shards.dedup();
            assert_eq!(before, shards.len(), "{index} has two copies of a shard on {}", node.id());
        }
    }
}

#[test]
fn balance_terminates_across_cluster_shapes() {
    for nodes in 1..=5usize {
        for shards in [0u32, 1, 3, 7, 12] {
            for replicas in 0..=2u32 {
                for resort in [false, true] {
                    let ids: Vec<String> = (0..nodes).map(|n| format!("node-{n}")).collect();
                    let mut snapshot = ClusterSnapshot::with_nodes(ids.clone());
                    snapshot.add_index("logs", shards, replicas);
                    snapshot.add_index("metrics", shards / 2 + 1, 0);
                    // Pile everything onto the first node.
                    for index in ["logs", "metrics"] {
                        let groups: Vec<(u32, Vec<u32>)> = snapshot
                            .shard_groups(index)
                            .iter()
                            .map(|g| (g.shard, g.copies.iter().map(|c| c.slot).collect()))
                            .collect();
                        for (shard, slots) in groups {
                            for slot in slots {
                                assign(&mut snapshot, index, shard, slot, &ids[0]);
                            }
                        }
                    }

                    let options = BalanceOptions {
                        threshold: 1.0,
                        resort_each_iteration: resort,
                        max_steps_per_index: None,
                    };
                    let outcome =
                        rebalance(&mut snapshot, basic(), AllowAll, &options, SeedMode::Current)
                            .unwrap();

                    let total = snapshot.total_copies();
                    assert!(outcome.unassigned.is_empty());
                    assert!(outcome.relocations.len() <= total);
                    assert_eq!(snapshot.copies().filter(|c| c.is_assigned()).count(), total);
                }
            }
        }
    }
}

#[test]
fn resorted_balance_terminates_under_tight_thresholds() {
    for nodes in 2..=4usize {
        for shards in [1u32, 3, 5] {
            for replicas in 0..=2u32 {
                for (wi, ws, wp) in [(1.0, 1.0, 1.0), (0.5, 0.5, 0.0), (0.0, 1.0, 2.0)] {
                    for threshold in [0.1, 0.5] {
                        let ids: Vec<String> = (0..nodes).map(|n| format!("node-{n}")).collect();
                        let mut snapshot = ClusterSnapshot::with_nodes(ids.clone());
                        snapshot.add_index("x", shards, replicas);
                        // Spread copies round-robin over the nodes.
                        for shard in 0..shards {
                            for slot in 0..=replicas {
                                let node = &ids[(shard + slot) as usize % nodes];
                                assign(&mut snapshot, "x", shard, slot, node);
                            }
                        }

                        let options = BalanceOptions {
                            threshold,
                            resort_each_iteration: true,
                            max_steps_per_index: None,
                        };
                        let weights = BasicWeights::new(wi, ws, wp).unwrap();
                        let outcome =
                            rebalance(&mut snapshot, weights, AllowAll, &options, SeedMode::Current)
                                .unwrap();

                        let bound = snapshot.total_copies() * nodes;
                        let steps = outcome.stats.total_steps() as usize;
                        assert!(steps <= bound, "{steps} steps exceed {bound}");
                    }
                }
            }
        }
    }
}

#[test]
fn copy_kept_in_place_still_blocks_its_siblings() {
    // One shard: the primary is unassigned, three replicas sit on n1, n0, n2.
    let mut snapshot = ClusterSnapshot::with_nodes(["n0", "n1", "n2"]);
    snapshot.add_index("x", 1, 3);
    assign(&mut snapshot, "x", 0, 1, "n1");
    assign(&mut snapshot, "x", 0, 2, "n0");
    assign(&mut snapshot, "x", 0, 3, "n2");

    let outcome = rebalance(
        &mut snapshot,
        basic(),
        SameShardGate,
        &BalanceOptions::default(),
        SeedMode::Scratch,
    )
    .unwrap();

    assert!(!outcome.unassigned.is_empty());
    for node in ["n0", "n1", "n2"] {
        assert!(count_on(&snapshot, node) <= 1, "{node} holds two copies of x/0");
    }
    assert_eq!(snapshot.copy("x", 0, 2).unwrap().current_node(), Some("n0"));
    assert_eq!(snapshot.copy("x", 0, 3).unwrap().current_node(), Some("n2"));
}

#[test]
fn scratch_pass_never_doubles_a_shard_on_a_node() {
    let nodes = ["n0", "n1", "n2"];
    // Every placement of four copies over {unassigned, n0, n1, n2} that
    // starts without a duplicate.
    for layout in 0u32..256 {
        let slots: Vec<Option<&str>> = (0..4)
            .map(|slot| match (layout >> (2 * slot)) & 3 {
                0 => None,
                n => Some(nodes[n as usize - 1]),
            })
            .collect();
        let mut held: Vec<&str> = slots.iter().flatten().copied().collect();
        let before = held.len();
        held.sort();
        held.dedup();
        if held.len() != before {
            continue;
        }

        let mut snapshot = ClusterSnapshot::with_nodes(nodes);
        snapshot.add_index("x", 1, 3);
        for (slot, node) in slots.iter().enumerate() {
            if let Some(node) = node {
                assign(&mut snapshot, "x", 0, slot as u32, node);
            }
        }

        rebalance(
            &mut snapshot,
            basic(),
            SameShardGate,
            &BalanceOptions::default(),
            SeedMode::Scratch,
        )
        .unwrap();

        for node in nodes {
            assert!(
                count_on(&snapshot, node) <= 1,
                "layout {layout:#010b}: {node} holds two copies of x/0"
            );
        }
    }
}

#[test]
fn rebalance_reports_outcome() {
    let mut snapshot = primaries_only(&["A", "B"], 4);
    for shard in 0..4 {
        assign(&mut snapshot, "i", shard, 0, "A");
    }

    let outcome = rebalance(
        &mut snapshot,
        basic(),
        AllowAll,
        &BalanceOptions::with_threshold(1.1),
        SeedMode::Current,
    )
    .unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.relocations.len(), 2);
    assert_eq!(outcome.stats.total_steps(), 2);
    assert_eq!(count_on(&snapshot, "B"), 2);

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["relocations"][0]["to"], "B");
}

#[test]
fn gate_chain_in_a_pass() {
    let mut snapshot = ClusterSnapshot::with_nodes(["a", "b", "c"]);
    snapshot.add_index("i", 3, 1);
    let chain = GateChain::new()
        .with(SameShardGate)
        .with(FnGate(|_: &CopyRef, node: &NodeLedger, _: &Mirror| {
            if node.id() == "c" { Decision::Throttle } else { Decision::Yes }
        }));

    let ctx = BalancingContext::new(&mut snapshot, basic(), chain);

    assert_eq!(ctx.mirror().node("c").unwrap().num_copies(), 0);
    assert_conserved(&ctx);
    assert!(!ctx.unassigned().is_empty());
}
