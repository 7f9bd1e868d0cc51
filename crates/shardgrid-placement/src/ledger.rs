//! In-memory placement mirror.
//!
//! [`Mirror`] holds one [`NodeLedger`] per cluster node. A node ledger
//! groups the copies it holds by index into [`IndexLedger`]s. Everything the
//! balancer computes happens here; cluster state is only touched when the
//! final plan is applied.
//!
//! A node can also carry *pinned* copies: copies that physically sit on the
//! node but are not (yet) part of the mirrored placement. Pins never count
//! towards weights; they only make the node's shard occupancy visible to
//! gates.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use shardgrid_core::{IndexName, NodeId};

/// Reference to a shard copy held in the mirror.
///
/// Ordering is index, then shard ordinal, then slot, so copies inside an
/// index ledger iterate by shard ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CopyRef {
    pub index: Arc<str>,
    pub shard: u32,
    pub slot: u32,
    pub primary: bool,
}

/// Copies of a single index held by a single node.
#[derive(Debug, Clone, Default)]
pub struct IndexLedger {
    copies: BTreeSet<CopyRef>,
    primaries: usize,
}

impl IndexLedger {
    fn add(&mut self, copy: CopyRef) -> bool {
        let primary = copy.primary;
        let added = self.copies.insert(copy);
        if added && primary {
            self.primaries += 1;
        }
        added
    }

    fn remove(&mut self, copy: &CopyRef) -> bool {
        let removed = self.copies.remove(copy);
        if removed && copy.primary {
            self.primaries -= 1;
        }
        removed
    }

    pub fn num_copies(&self) -> usize {
        self.copies.len()
    }

    pub fn num_primaries(&self) -> usize {
        self.primaries
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    pub fn copies(&self) -> impl Iterator<Item = &CopyRef> {
        self.copies.iter()
    }
}

/// Everything a single node holds in the mirror.
#[derive(Debug, Clone)]
pub struct NodeLedger {
    id: NodeId,
    indices: HashMap<IndexName, IndexLedger>,
    pinned: BTreeSet<CopyRef>,
    copies: usize,
    primaries: usize,
}

impl NodeLedger {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            indices: HashMap::new(),
            pinned: BTreeSet::new(),
            copies: 0,
            primaries: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a copy. Returns `false` if it was already present.
    pub fn add_copy(&mut self, copy: CopyRef) -> bool {
        let primary = copy.primary;
        let added = self
            .indices
            .entry(copy.index.to_string())
            .or_default()
            .add(copy);
        if added {
            self.copies += 1;
            if primary {
                self.primaries += 1;
            }
        }
        added
    }

    /// Remove a copy. Returns `false` if it was not present.
    ///
    /// Removing the last copy of an index drops that index's ledger.
    pub fn remove_copy(&mut self, copy: &CopyRef) -> bool {
        let Some(ledger) = self.indices.get_mut(copy.index.as_ref()) else {
            return false;
        };
        if !ledger.remove(copy) {
            return false;
        }
        if ledger.is_empty() {
            self.indices.remove(copy.index.as_ref());
        }
        self.copies -= 1;
        if copy.primary {
            self.primaries -= 1;
        }
        true
    }

    pub fn contains(&self, copy: &CopyRef) -> bool {
        self.indices
            .get(copy.index.as_ref())
            .is_some_and(|l| l.copies.contains(copy))
    }

    /// Whether this node holds or pins any copy of `index`/`shard`.
    pub fn holds_shard(&self, index: &str, shard: u32) -> bool {
        self.copies_of(index)
            .chain(self.pinned.iter().filter(|c| &*c.index == index))
            .any(|c| c.shard == shard)
    }

    /// Whether this node holds or pins a copy of the same shard as `copy`,
    /// other than `copy` itself.
    pub fn holds_sibling_of(&self, copy: &CopyRef) -> bool {
        self.copies_of(&copy.index)
            .chain(self.pinned.iter().filter(|c| c.index == copy.index))
            .any(|c| c.shard == copy.shard && c != copy)
    }

    fn pin(&mut self, copy: CopyRef) -> bool {
        self.pinned.insert(copy)
    }

    fn unpin(&mut self, copy: &CopyRef) -> bool {
        self.pinned.remove(copy)
    }

    /// Copies physically on this node that the mirror has not placed.
    pub fn pinned(&self) -> impl Iterator<Item = &CopyRef> {
        self.pinned.iter()
    }

    pub fn num_copies(&self) -> usize {
        self.copies
    }

    pub fn num_primaries(&self) -> usize {
        self.primaries
    }

    pub fn num_copies_of(&self, index: &str) -> usize {
        self.indices.get(index).map_or(0, IndexLedger::num_copies)
    }

    pub fn num_primaries_of(&self, index: &str) -> usize {
        self.indices.get(index).map_or(0, IndexLedger::num_primaries)
    }

    pub fn index_ledger(&self, index: &str) -> Option<&IndexLedger> {
        self.indices.get(index)
    }

    /// Copies of `index` on this node, by shard ordinal.
    pub fn copies_of<'a>(&'a self, index: &str) -> impl Iterator<Item = &'a CopyRef> + use<'a> {
        self.indices
            .get(index)
            .into_iter()
            .flat_map(|l| l.copies.iter())
    }

    /// Index ledgers present on this node. Never yields an empty ledger.
    pub fn index_ledgers(&self) -> impl Iterator<Item = (&str, &IndexLedger)> {
        self.indices.iter().map(|(name, l)| (name.as_str(), l))
    }
}

/// The balancer's private copy of cluster placement.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    nodes: BTreeMap<NodeId, NodeLedger>,
    indices: BTreeSet<IndexName>,
}

impl Mirror {
    /// An empty mirror with one ledger per node.
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let nodes = nodes
            .into_iter()
            .map(|id| {
                let ledger = NodeLedger::new(id);
                (ledger.id.clone(), ledger)
            })
            .collect();
        Self {
            nodes,
            indices: BTreeSet::new(),
        }
    }

    pub fn add_index(&mut self, name: impl Into<IndexName>) {
        self.indices.insert(name.into());
    }

    /// Managed index names, sorted.
    pub fn indices(&self) -> impl Iterator<Item = &str> {
        self.indices.iter().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: &str) -> Option<&NodeLedger> {
        self.nodes.get(id)
    }

    /// Node ledgers in node-id order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeLedger> {
        self.nodes.values()
    }

    /// Put `copy` on `node`, dropping any pin it had. Returns `false` if the
    /// node is unknown or already holds the copy.
    pub fn place(&mut self, copy: CopyRef, node: &str) -> bool {
        if !self.nodes.contains_key(node) {
            return false;
        }
        for ledger in self.nodes.values_mut() {
            ledger.unpin(&copy);
        }
        self.nodes
            .get_mut(node)
            .is_some_and(|ledger| ledger.add_copy(copy))
    }

    /// Record that `copy` physically sits on `node` without placing it.
    /// Returns `false` if the node is unknown or the copy is already pinned
    /// there.
    pub fn pin(&mut self, copy: CopyRef, node: &str) -> bool {
        self.nodes
            .get_mut(node)
            .is_some_and(|ledger| ledger.pin(copy))
    }

    /// Move `copy` from `from` to `to`. Nothing changes unless `from` holds
    /// the copy and `to` is a known node.
    pub fn relocate(&mut self, copy: &CopyRef, from: &str, to: &str) -> bool {
        if from == to || !self.nodes.contains_key(to) {
            return false;
        }
        let removed = self
            .nodes
            .get_mut(from)
            .is_some_and(|ledger| ledger.remove_copy(copy));
        if !removed {
            return false;
        }
        self.place(copy.clone(), to)
    }

    /// Node currently holding `copy` in the mirror.
    pub fn locate(&self, copy: &CopyRef) -> Option<&str> {
        self.nodes().find(|n| n.contains(copy)).map(NodeLedger::id)
    }

    pub fn total_copies(&self) -> usize {
        self.nodes().map(NodeLedger::num_copies).sum()
    }

    pub fn total_primaries(&self) -> usize {
        self.nodes().map(NodeLedger::num_primaries).sum()
    }

    pub fn copies_of_index(&self, index: &str) -> usize {
        self.nodes().map(|n| n.num_copies_of(index)).sum()
    }

    /// Mirrored copies of one shard across all nodes.
    pub fn copies_of_shard(&self, index: &str, shard: u32) -> usize {
        self.nodes()
            .flat_map(|n| n.copies_of(index))
            .filter(|c| c.shard == shard)
            .count()
    }

    pub fn avg_copies_per_node(&self) -> f64 {
        self.per_node(self.total_copies())
    }

    pub fn avg_primaries_per_node(&self) -> f64 {
        self.per_node(self.total_primaries())
    }

    pub fn avg_copies_of_index_per_node(&self, index: &str) -> f64 {
        self.per_node(self.copies_of_index(index))
    }

    fn per_node(&self, total: usize) -> f64 {
        if self.nodes.is_empty() {
            0.0
        } else {
            total as f64 / self.nodes.len() as f64
        }
    }
}
