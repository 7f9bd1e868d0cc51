use std::path::PathBuf;

use clap::{Parser, Subcommand};
use shardgrid_core::SeedMode;

mod commands;

#[derive(Parser)]
#[command(
    name = "shardgrid",
    about = "ShardGrid shard placement balancer",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one balancing pass over a snapshot and print the relocations.
    ///
    /// Settings come from the [weights] and [balance] sections of the
    /// config file; --threshold and --seed override it.
    Balance {
        /// Cluster snapshot (JSON)
        #[arg(short, long)]
        snapshot: PathBuf,
        /// Balancer config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override balance.threshold
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Override balance.seed (scratch or current)
        #[arg(long)]
        seed: Option<SeedMode>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
        /// Write the updated snapshot back to --snapshot
        #[arg(long)]
        write: bool,
    },
    /// Show how every node weighs for one index.
    Weights {
        #[arg(short, long)]
        snapshot: PathBuf,
        #[arg(short, long)]
        index: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Seed mode for the mirror (defaults to current)
        #[arg(long)]
        seed: Option<SeedMode>,
    },
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,shardgrid=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Commands::Balance {
            snapshot,
            config,
            threshold,
            seed,
            format,
            write,
        } => commands::balance::balance(&commands::balance::BalanceArgs {
            snapshot: &snapshot,
            config: config.as_deref(),
            threshold,
            seed,
            format: &format,
            write,
        }),
        Commands::Weights {
            snapshot,
            index,
            config,
            seed,
        } => commands::weights::weights(&snapshot, &index, config.as_deref(), seed),
    }
}
