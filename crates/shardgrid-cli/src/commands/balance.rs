use std::fmt::Write as _;
use std::path::Path;

use shardgrid_core::SeedMode;
use shardgrid_placement::{BalanceOptions, BasicWeights, RebalanceOutcome, SameShardGate, rebalance};

pub struct BalanceArgs<'a> {
    pub snapshot: &'a Path,
    pub config: Option<&'a Path>,
    pub threshold: Option<f64>,
    pub seed: Option<SeedMode>,
    pub format: &'a str,
    pub write: bool,
}

pub fn balance(args: &BalanceArgs<'_>) -> anyhow::Result<()> {
    let outcome = run(args)?;

    match args.format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        _ => {
            print!("{}", format_outcome(&outcome));
        }
    }

    Ok(())
}

/// Run one pass and, with `write`, persist the updated snapshot.
pub fn run(args: &BalanceArgs<'_>) -> anyhow::Result<RebalanceOutcome> {
    let (mut snapshot, config) = super::load_inputs(args.snapshot, args.config)?;

    let weights = BasicWeights::from_config(&config.weights)?;
    let mut options = BalanceOptions::from_config(&config.balance)?;
    if let Some(threshold) = args.threshold {
        options.threshold = threshold;
    }
    let seed = args.seed.unwrap_or(config.balance.seed);

    let outcome = rebalance(&mut snapshot, weights, SameShardGate, &options, seed)?;

    if args.write && outcome.changed {
        std::fs::write(args.snapshot, snapshot.to_json_string()?)?;
        tracing::info!(path = %args.snapshot.display(), "snapshot updated");
    }

    Ok(outcome)
}

pub fn format_outcome(outcome: &RebalanceOutcome) -> String {
    let mut out = String::new();

    if outcome.changed {
        let _ = writeln!(out, "✓ {} relocation(s)", outcome.relocations.len());
    } else {
        let _ = writeln!(out, "✓ Already balanced");
    }

    for r in &outcome.relocations {
        let role = if r.primary { "primary" } else { "replica" };
        let _ = writeln!(
            out,
            "  {}[{}] {} slot {}: {} → {}",
            r.index,
            r.shard,
            role,
            r.slot,
            r.from.as_deref().unwrap_or("(unassigned)"),
            r.to
        );
    }

    if !outcome.unassigned.is_empty() {
        let _ = writeln!(out, "✗ {} copy(ies) left unassigned", outcome.unassigned.len());
        for (index, shard, slot) in &outcome.unassigned {
            let _ = writeln!(out, "  {index}[{shard}] slot {slot}");
        }
    }

    for (index, steps) in &outcome.stats.steps {
        if *steps > 0 {
            let _ = writeln!(out, "  balance steps for {index}: {steps}");
        }
    }

    out
}
