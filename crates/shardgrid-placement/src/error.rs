//! Placement error types.
//!
//! Only misconfiguration and malformed input are errors. A copy that cannot
//! be placed or a node with no improving move is a normal outcome and is
//! reported through return values.

use thiserror::Error;

/// Errors that can occur when setting up a balancing pass.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("invalid convergence threshold: {0}")]
    InvalidThreshold(f64),

    #[error("invalid step cap: must be at least 1")]
    InvalidStepCap,

    #[error(transparent)]
    Core(#[from] shardgrid_core::CoreError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
