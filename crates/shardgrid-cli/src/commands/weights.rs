use std::fmt::Write as _;
use std::path::Path;

use shardgrid_core::{ClusterSnapshot, SeedMode};
use shardgrid_placement::{BalancingContext, BasicWeights, SameShardGate};

pub fn weights(
    snapshot: &Path,
    index: &str,
    config: Option<&Path>,
    seed: Option<SeedMode>,
) -> anyhow::Result<()> {
    let (mut snapshot, config) = super::load_inputs(snapshot, config)?;
    let weights = BasicWeights::from_config(&config.weights)?;
    let table = weight_table(&mut snapshot, weights, index, seed.unwrap_or(SeedMode::Current))?;
    print!("{table}");
    Ok(())
}

/// Render nodes lightest first with the terms of their weight.
pub fn weight_table(
    snapshot: &mut ClusterSnapshot,
    weights: BasicWeights,
    index: &str,
    seed: SeedMode,
) -> anyhow::Result<String> {
    if snapshot.index(index).is_none() {
        anyhow::bail!("unknown index: {index}");
    }

    let ctx = BalancingContext::seeded(snapshot, weights, SameShardGate, seed);
    let mirror = ctx.mirror();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:>6} {:>10} {:>10} {:>10} {:>10}",
        "NODE", "COPIES", "WEIGHT", "INDEX", "SHARD", "PRIMARY"
    );
    for ranked in ctx.ranked(index) {
        let Some(node) = mirror.node(&ranked.node_id) else {
            continue;
        };
        let b = weights.breakdown(mirror, node, index);
        let _ = writeln!(
            out,
            "{:<20} {:>6} {:>10.3} {:>10.3} {:>10.3} {:>10.3}",
            node.id(),
            node.num_copies_of(index),
            ranked.weight,
            b.index,
            b.shard,
            b.primary
        );
    }
    Ok(out)
}
