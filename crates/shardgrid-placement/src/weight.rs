//! Node weighting for placement decisions.
//!
//! A weight says how much of its fair share of an index a node already
//! carries. Lower = the node should receive more copies. The basic strategy
//! combines three terms:
//! - **Index balance**: copies of this index vs. the per-node average
//! - **Shard balance**: copies of any index vs. the per-node average
//! - **Primary balance**: primaries of any index vs. the per-node average
//!
//! Averages are read from the mirror on every call, so weights always
//! reflect the latest hypothetical placement.

use shardgrid_core::{NodeId, WeightsSection};

use crate::error::PlacementResult;
use crate::ledger::{Mirror, NodeLedger};

/// Scoring strategy consulted by the balancer.
///
/// Implementations must be deterministic and side-effect free.
pub trait WeightFunction {
    fn weight(&self, mirror: &Mirror, node: &NodeLedger, index: &str) -> f64;
}

impl<W: WeightFunction + ?Sized> WeightFunction for &W {
    fn weight(&self, mirror: &Mirror, node: &NodeLedger, index: &str) -> f64 {
        (**self).weight(mirror, node, index)
    }
}

impl<W: WeightFunction + ?Sized> WeightFunction for Box<W> {
    fn weight(&self, mirror: &Mirror, node: &NodeLedger, index: &str) -> f64 {
        (**self).weight(mirror, node, index)
    }
}

/// Linear combination of index, shard and primary balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicWeights {
    index: f64,
    shard: f64,
    primary: f64,
}

/// Individual terms of a basic weight, already scaled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub index: f64,
    pub shard: f64,
    pub primary: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.index + self.shard + self.primary
    }
}

impl BasicWeights {
    /// Build from raw weights, normalized to sum 1.
    pub fn new(index: f64, shard: f64, primary: f64) -> PlacementResult<Self> {
        WeightsSection {
            index,
            shard,
            primary,
        }
        .validate()?;

        let sum = index + shard + primary;
        Ok(Self {
            index: index / sum,
            shard: shard / sum,
            primary: primary / sum,
        })
    }

    pub fn from_config(weights: &WeightsSection) -> PlacementResult<Self> {
        Self::new(weights.index, weights.shard, weights.primary)
    }

    pub fn index_weight(&self) -> f64 {
        self.index
    }

    pub fn shard_weight(&self) -> f64 {
        self.shard
    }

    pub fn primary_weight(&self) -> f64 {
        self.primary
    }

    pub fn breakdown(&self, mirror: &Mirror, node: &NodeLedger, index: &str) -> ScoreBreakdown {
        let index_term =
            node.num_copies_of(index) as f64 - mirror.avg_copies_of_index_per_node(index);
        let shard_term = node.num_copies() as f64 - mirror.avg_copies_per_node();
        let primary_term = node.num_primaries() as f64 - mirror.avg_primaries_per_node();

        ScoreBreakdown {
            index: self.index * index_term,
            shard: self.shard * shard_term,
            primary: self.primary * primary_term,
        }
    }
}

impl Default for BasicWeights {
    fn default() -> Self {
        Self {
            index: 0.5,
            shard: 0.5,
            primary: 0.0,
        }
    }
}

impl WeightFunction for BasicWeights {
    fn weight(&self, mirror: &Mirror, node: &NodeLedger, index: &str) -> f64 {
        self.breakdown(mirror, node, index).total()
    }
}

/// Weight of a single node for one index.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeWeight {
    pub node_id: NodeId,
    pub weight: f64,
}

/// Weigh every node for `index` and return them lightest first, ties
/// broken by node id.
pub fn rank_nodes<W: WeightFunction + ?Sized>(
    mirror: &Mirror,
    weights: &W,
    index: &str,
) -> Vec<NodeWeight> {
    let mut ranked: Vec<NodeWeight> = mirror
        .nodes()
        .map(|node| NodeWeight {
            node_id: node.id().to_string(),
            weight: weights.weight(mirror, node, index),
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.weight
            .total_cmp(&b.weight)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    ranked
}
