//! # Sparse Topology (CSR)
//!
//! Compressed-sparse-row view of the dense graph, laid out for one-invocation-
//! per-node traversal:
//!
//! ```text
//! offsets   [0, 2, 5, 6, ...]          len = node_count + 1
//! neighbors [1, 3 | 0, 2, 4 | 1 | ...] row i = neighbors[offsets[i]..offsets[i+1]]
//! weights   [.., .. | .., .., .. | ..] parallel to neighbors
//! sources   [0, 0 | 1, 1, 1 | 2 | ...] row owning each slot
//! reverse   slot k = (i→j)  ⇒  reverse[k] = slot of (j→i)
//! ```
//!
//! Rebuilds are always wholesale: the dense graph is authoritative, so the
//! CSR never diffs. Between rebuilds only weights are synced, and only while
//! the dense graph's topology epoch matches the one captured at rebuild.

use serde::{Deserialize, Serialize};

use crate::model::{DenseGraph, NodeId};
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct SparseTopology {
    offsets: Vec<u32>,
    neighbors: Vec<u32>,
    weights: Vec<f64>,
    sources: Vec<u32>,
    reverse: Vec<u32>,
    epoch: Option<u64>,
}

impl SparseTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full rebuild from the authoritative graph.
    pub fn rebuild(&mut self, dense: Option<&DenseGraph>) -> Result<()> {
        let dense = dense.ok_or_else(|| Error::InvalidArgument("rebuild: no graph".into()))?;
        let n = dense.node_count();
        let slots = dense.slot_count();

        let mut offsets = Vec::with_capacity(n + 1);
        let mut neighbors = Vec::with_capacity(slots);
        let mut weights = Vec::with_capacity(slots);
        let mut sources = Vec::with_capacity(slots);

        offsets.push(0u32);
        for i in 0..n {
            for nb in dense.adjacency(NodeId(i as u32)) {
                if nb.node.index() >= n {
                    return Err(Error::Topology(format!(
                        "node {i} lists neighbor {} but the graph has {n} nodes",
                        nb.node
                    )));
                }
                neighbors.push(nb.node.0);
                weights.push(nb.weight);
                sources.push(i as u32);
            }
            offsets.push(neighbors.len() as u32);
        }

        let mut reverse = vec![0u32; neighbors.len()];
        for (k, (&src, &dst)) in sources.iter().zip(&neighbors).enumerate() {
            let row = &neighbors[offsets[dst as usize] as usize..offsets[dst as usize + 1] as usize];
            let pos = row.binary_search(&src).map_err(|_| {
                Error::Topology(format!("edge {src}->{dst} has no mirror entry {dst}->{src}"))
            })?;
            reverse[k] = offsets[dst as usize] + pos as u32;
        }

        self.offsets = offsets;
        self.neighbors = neighbors;
        self.weights = weights;
        self.sources = sources;
        self.reverse = reverse;
        self.epoch = Some(dense.epoch());

        tracing::debug!(nodes = n, slots = self.edge_count(), epoch = dense.epoch(), "csr rebuilt");
        Ok(())
    }

    /// Copy weights from the dense graph into the existing layout.
    pub fn sync_weights_only(&mut self, dense: Option<&DenseGraph>) -> Result<()> {
        let dense = dense.ok_or_else(|| Error::InvalidArgument("weight sync: no graph".into()))?;
        self.check_layout(dense)?;
        let mut k = 0;
        for i in 0..self.node_count() {
            for nb in dense.adjacency(NodeId(i as u32)) {
                self.weights[k] = nb.weight;
                k += 1;
            }
        }
        Ok(())
    }

    /// Copy CSR-resident weights back into the dense graph (CSR is the
    /// weight of record).
    pub fn pull_weights_back(&self, dense: Option<&mut DenseGraph>) -> Result<()> {
        let dense = dense.ok_or_else(|| Error::InvalidArgument("weight pull-back: no graph".into()))?;
        self.check_layout(dense)?;
        for i in 0..self.node_count() {
            let (start, end) = self.row_range(i);
            if let Some(row) = dense.adjacency_mut(NodeId(i as u32)) {
                for (nb, &w) in row.iter_mut().zip(&self.weights[start..end]) {
                    nb.weight = w;
                }
            }
        }
        Ok(())
    }

    fn check_layout(&self, dense: &DenseGraph) -> Result<()> {
        match self.epoch {
            Some(epoch) if epoch == dense.epoch() && self.node_count() == dense.node_count() => Ok(()),
            Some(epoch) => Err(Error::InvalidArgument(format!(
                "csr layout from epoch {epoch} does not match graph epoch {}",
                dense.epoch()
            ))),
            None => Err(Error::InvalidArgument("csr has never been rebuilt".into())),
        }
    }

    /// True when a weight-only sync against `dense` would be valid.
    pub fn is_in_sync_with(&self, dense: &DenseGraph) -> bool {
        self.check_layout(dense).is_ok()
    }

    /// Check the structural invariants.
    pub fn validate(&self) -> Result<()> {
        let n = self.node_count();
        if self.offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::Topology("offsets decrease".into()));
        }
        if self.offsets.last().copied().unwrap_or(0) as usize != self.edge_count() {
            return Err(Error::Topology("offsets[n] != edge_count".into()));
        }
        if let Some(bad) = self.neighbors.iter().find(|&&j| j as usize >= n) {
            return Err(Error::Topology(format!("neighbor index {bad} outside 0..{n}")));
        }
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn node_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Number of stored directed slots (twice the undirected edge count).
    pub fn edge_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn neighbors(&self) -> &[u32] {
        &self.neighbors
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    pub fn sources(&self) -> &[u32] {
        &self.sources
    }

    pub fn reverse(&self) -> &[u32] {
        &self.reverse
    }

    pub fn row_range(&self, i: usize) -> (usize, usize) {
        (self.offsets[i] as usize, self.offsets[i + 1] as usize)
    }

    /// Neighbor indices and weights of node `i`.
    pub fn row(&self, i: usize) -> (&[u32], &[f64]) {
        let (start, end) = self.row_range(i);
        (&self.neighbors[start..end], &self.weights[start..end])
    }

    pub fn degree(&self, i: usize) -> usize {
        let (start, end) = self.row_range(i);
        end - start
    }
}

// ============================================================================
// Rebuild cadence
// ============================================================================

/// Decides between a full rebuild and a weight-only sync each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySync {
    interval: u64,
    steps_since_last_sync: u64,
    synced_once: bool,
}

/// What `TopologySync::plan` decided for this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Rebuild,
    WeightsOnly,
}

impl TopologySync {
    /// Interval 0 is clamped to 1 (rebuild every step).
    pub fn new(interval: u64) -> Self {
        Self { interval: interval.max(1), steps_since_last_sync: 0, synced_once: false }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Decide this step's sync. `layout_valid` is false once the dense
    /// graph's structure changed since the last rebuild.
    pub fn plan(&mut self, layout_valid: bool) -> SyncAction {
        self.steps_since_last_sync += 1;
        if !self.synced_once || !layout_valid || self.steps_since_last_sync >= self.interval {
            self.synced_once = true;
            self.steps_since_last_sync = 0;
            SyncAction::Rebuild
        } else {
            SyncAction::WeightsOnly
        }
    }
}
