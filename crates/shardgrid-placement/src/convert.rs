//! Type conversions between snapshot types and mirror types.
//!
//! Bridges `shardgrid_core::{ShardCopy, ShardGroup}` to the mirror's
//! [`CopyRef`].

use std::sync::Arc;

use shardgrid_core::{ShardCopy, ShardGroup};

use crate::ledger::CopyRef;

impl From<&ShardCopy> for CopyRef {
    fn from(copy: &ShardCopy) -> Self {
        CopyRef {
            index: Arc::from(copy.index.as_str()),
            shard: copy.shard,
            slot: copy.slot,
            primary: copy.primary,
        }
    }
}

/// Copies of a shard group in placement order: the primary first, then
/// replicas by slot.
pub fn placement_order(group: &ShardGroup) -> Vec<&ShardCopy> {
    let mut copies: Vec<&ShardCopy> = group.copies.iter().collect();
    copies.sort_by_key(|c| (!c.primary, c.slot));
    copies
}
