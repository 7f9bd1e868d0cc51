pub mod balance;
pub mod weights;

use std::path::Path;

use shardgrid_core::{BalancerConfig, ClusterSnapshot};

/// Read and validate the snapshot and (optional) config file.
pub fn load_inputs(
    snapshot: &Path,
    config: Option<&Path>,
) -> anyhow::Result<(ClusterSnapshot, BalancerConfig)> {
    let snapshot = ClusterSnapshot::from_json_file(snapshot)?;
    snapshot.validate()?;
    let config = match config {
        Some(path) => BalancerConfig::from_file(path)?,
        None => BalancerConfig::default(),
    };
    Ok((snapshot, config))
}
