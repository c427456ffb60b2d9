//! Edges (weighted links) between nodes.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use super::NodeId;

/// An undirected weighted edge. `from`/`to` fix the direction in which the
/// gauge phase is read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    /// w ∈ [PLANCK_THRESHOLD, 1].
    pub weight: f64,
    pub gauge_phase: Option<f64>,
}

impl Edge {
    pub fn new(from: NodeId, to: NodeId, weight: f64) -> Self {
        Self { from, to, weight, gauge_phase: None }
    }

    pub fn with_gauge_phase(mut self, phase: f64) -> Self {
        self.gauge_phase = Some(phase);
        self
    }

    /// The "other" end of the edge from the given node.
    pub fn other_node(&self, from: NodeId) -> Option<NodeId> {
        if from == self.from { Some(self.to) }
        else if from == self.to { Some(self.from) }
        else { None }
    }
}

/// One entry of a node's adjacency list in the dense graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub node: NodeId,
    pub weight: f64,
    /// Phase of the link read from the owning node towards `node`.
    pub gauge_phase: Option<f64>,
}

/// An edge removed in the current step, with the content it carried.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DyingEdge {
    pub from: NodeId,
    pub to: NodeId,
    /// Energy content: the last weight the edge held.
    pub energy: f64,
    pub gauge_phase: Option<f64>,
}

impl DyingEdge {
    /// Complex charge q = E·e^{iθ}, read in the from → to direction.
    pub fn charge(&self) -> Complex64 {
        Complex64::from_polar(self.energy, self.gauge_phase.unwrap_or(0.0))
    }
}
