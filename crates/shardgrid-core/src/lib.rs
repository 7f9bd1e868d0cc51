//! shardgrid-core: the cluster snapshot model shared by the balancer
//! and its callers.
//!
//! The balancer never owns cluster state. It reads a [`ClusterSnapshot`]
//! (nodes, indices, shard groups, copies), computes a target placement in
//! a private mirror, and writes relocations back through
//! [`ShardCopy::relocate_to`].
//!
//! # Components
//!
//! - **`types`**: snapshot, shard groups, shard copies
//! - **`config`**: `balancer.toml` parser
//! - **`error`**: error type shared by the above

pub mod config;
pub mod error;
pub mod types;

pub use config::{BalanceSection, BalancerConfig, SeedMode, WeightsSection};
pub use error::{CoreError, CoreResult};
pub use types::*;
