//! ShardGrid shard balancer: weighted greedy placement of shard copies.
//!
//! This crate decides which node should hold which shard copy. It does NOT
//! persist or propagate cluster state, and it does not own placement policy
//! (that's the caller's [`DecisionGate`]). It mirrors a
//! [`ClusterSnapshot`](shardgrid_core::ClusterSnapshot), computes a target
//! placement, and writes the relocations back.
//!
//! # Components
//!
//! - **`weight`**: Node weighting (index, shard, primary balance)
//! - **`ledger`**: Per-node copy ledgers and the placement mirror
//! - **`decider`**: Decision gate trait and stock gates
//! - **`balancer`**: Balancing context (distribute, balance, apply)
//! - **`convert`**: Type conversions from snapshot types

pub mod balancer;
pub mod convert;
pub mod decider;
pub mod error;
pub mod ledger;
pub mod weight;

pub use balancer::{
    BalanceOptions, BalanceStats, BalancingContext, RebalanceOutcome, Relocation, rebalance,
};
pub use decider::{AllowAll, Decision, DecisionGate, FnGate, GateChain, SameShardGate};
pub use error::{PlacementError, PlacementResult};
pub use ledger::{CopyRef, IndexLedger, Mirror, NodeLedger};
pub use weight::{BasicWeights, NodeWeight, ScoreBreakdown, WeightFunction, rank_nodes};
