//! Domain types for a cluster placement snapshot.
//!
//! A snapshot lists the nodes of the cluster and, per index, every shard
//! group with all of its copies. Copies carry their current assignment;
//! `None` means the copy is unassigned. All types are serializable to/from
//! JSON so a snapshot can be captured by the cluster-state layer and fed
//! to the balancer offline.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// Unique identifier for a node in the cluster.
pub type NodeId = String;

/// Name of an index.
pub type IndexName = String;

// ── Shard copy ────────────────────────────────────────────────────

/// One copy (primary or replica) of a shard.
///
/// `slot` is the position of the copy inside its shard group. Together with
/// `index` and `shard` it identifies the copy; replicas of the same shard are
/// otherwise indistinguishable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardCopy {
    pub index: IndexName,
    pub shard: u32,
    pub slot: u32,
    pub primary: bool,
    /// Node currently holding this copy.
    #[serde(default)]
    pub node: Option<NodeId>,
}

impl ShardCopy {
    /// An unassigned primary copy (slot 0).
    pub fn new_primary(index: impl Into<IndexName>, shard: u32) -> Self {
        Self {
            index: index.into(),
            shard,
            slot: 0,
            primary: true,
            node: None,
        }
    }

    /// An unassigned replica copy.
    pub fn new_replica(index: impl Into<IndexName>, shard: u32, slot: u32) -> Self {
        Self {
            index: index.into(),
            shard,
            slot,
            primary: false,
            node: None,
        }
    }

    /// Same copy, assigned to `node`.
    pub fn on(mut self, node: impl Into<NodeId>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn shard_ordinal(&self) -> u32 {
        self.shard
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn current_node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn is_assigned(&self) -> bool {
        self.node.is_some()
    }

    /// Move this copy to `node`. The only mutation the balancer performs
    /// on cluster state.
    pub fn relocate_to(&mut self, node: impl Into<NodeId>) {
        self.node = Some(node.into());
    }
}

// ── Shard group / index ───────────────────────────────────────────

/// All copies of one shard ordinal within one index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardGroup {
    pub shard: u32,
    pub copies: Vec<ShardCopy>,
}

impl ShardGroup {
    /// An unassigned group with one primary and `replicas` replicas.
    pub fn unassigned(index: &str, shard: u32, replicas: u32) -> Self {
        let mut copies = Vec::with_capacity(replicas as usize + 1);
        copies.push(ShardCopy::new_primary(index, shard));
        for slot in 1..=replicas {
            copies.push(ShardCopy::new_replica(index, shard, slot));
        }
        Self { shard, copies }
    }

    pub fn primary(&self) -> Option<&ShardCopy> {
        self.copies.iter().find(|c| c.primary)
    }

    pub fn replicas(&self) -> impl Iterator<Item = &ShardCopy> {
        self.copies.iter().filter(|c| !c.primary)
    }
}

/// Routing table of a single index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexRouting {
    pub name: IndexName,
    pub shards: Vec<ShardGroup>,
}

// ── Snapshot ──────────────────────────────────────────────────────

/// Point-in-time view of nodes and shard placement.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub nodes: Vec<NodeId>,
    #[serde(default)]
    pub indices: Vec<IndexRouting>,
}

impl ClusterSnapshot {
    /// A snapshot with the given nodes and no indices.
    pub fn with_nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            indices: Vec::new(),
        }
    }

    /// Add an index with `shards` shard groups of `1 + replicas` unassigned
    /// copies each.
    pub fn add_index(&mut self, name: &str, shards: u32, replicas: u32) -> &mut Self {
        let groups = (0..shards)
            .map(|shard| ShardGroup::unassigned(name, shard, replicas))
            .collect();
        self.indices.push(IndexRouting {
            name: name.to_string(),
            shards: groups,
        });
        self
    }

    pub fn list_nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn has_node(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| n == node)
    }

    pub fn list_indices(&self) -> impl Iterator<Item = &str> {
        self.indices.iter().map(|i| i.name.as_str())
    }

    pub fn index(&self, name: &str) -> Option<&IndexRouting> {
        self.indices.iter().find(|i| i.name == name)
    }

    /// Shard groups of `index`; empty if the index is unknown.
    pub fn shard_groups(&self, index: &str) -> &[ShardGroup] {
        self.index(index).map(|i| i.shards.as_slice()).unwrap_or(&[])
    }

    pub fn copy(&self, index: &str, shard: u32, slot: u32) -> Option<&ShardCopy> {
        self.shard_groups(index)
            .iter()
            .find(|g| g.shard == shard)?
            .copies
            .iter()
            .find(|c| c.slot == slot)
    }

    pub fn copy_mut(&mut self, index: &str, shard: u32, slot: u32) -> Option<&mut ShardCopy> {
        self.indices
            .iter_mut()
            .find(|i| i.name == index)?
            .shards
            .iter_mut()
            .find(|g| g.shard == shard)?
            .copies
            .iter_mut()
            .find(|c| c.slot == slot)
    }

    /// Every copy in the snapshot, index by index.
    pub fn copies(&self) -> impl Iterator<Item = &ShardCopy> {
        self.indices
            .iter()
            .flat_map(|i| i.shards.iter())
            .flat_map(|g| g.copies.iter())
    }

    pub fn total_copies(&self) -> usize {
        self.copies().count()
    }

    /// Copies currently assigned to `node`.
    pub fn copies_on<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a ShardCopy> + 'a {
        self.copies().filter(move |c| c.current_node() == Some(node))
    }

    /// Check structural invariants.
    ///
    /// Copies assigned to nodes outside `nodes` are tolerated and logged;
    /// the balancer treats them as unassigned.
    pub fn validate(&self) -> CoreResult<()> {
        let mut seen_nodes = HashSet::new();
        for node in &self.nodes {
            if !seen_nodes.insert(node.as_str()) {
                return Err(CoreError::InvalidSnapshot(format!("duplicate node id: {node}")));
            }
        }

        let mut seen_indices = HashSet::new();
        for index in &self.indices {
            if !seen_indices.insert(index.name.as_str()) {
                return Err(CoreError::InvalidSnapshot(format!(
                    "duplicate index: {}",
                    index.name
                )));
            }

            let mut seen_shards = HashSet::new();
            for group in &index.shards {
                if !seen_shards.insert(group.shard) {
                    return Err(CoreError::InvalidSnapshot(format!(
                        "duplicate shard {} in index {}",
                        group.shard, index.name
                    )));
                }

                let primaries = group.copies.iter().filter(|c| c.primary).count();
                if primaries != 1 {
                    return Err(CoreError::InvalidSnapshot(format!(
                        "shard {}/{} has {primaries} primaries, expected 1",
                        index.name, group.shard
                    )));
                }

                let mut seen_slots = HashSet::new();
                for copy in &group.copies {
                    if copy.index != index.name || copy.shard != group.shard {
                        return Err(CoreError::InvalidSnapshot(format!(
                            "copy {}/{} filed under {}/{}",
                            copy.index, copy.shard, index.name, group.shard
                        )));
                    }
                    if !seen_slots.insert(copy.slot) {
                        return Err(CoreError::InvalidSnapshot(format!(
                            "duplicate slot {} in shard {}/{}",
                            copy.slot, index.name, group.shard
                        )));
                    }
                    if let Some(node) = copy.current_node()
                        && !seen_nodes.contains(node)
                    {
                        warn!(
                            index = %copy.index,
                            shard = copy.shard,
                            slot = copy.slot,
                            %node,
                            "copy assigned to unknown node, treating as unassigned"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    pub fn from_json_str(s: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
