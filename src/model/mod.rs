//! # Graph Model
//!
//! Plain data that describes the simulated spacetime: node state, edges, and
//! the authoritative dense graph that the CSR topology is derived from.
//!
//! Design rule: NO kernel dispatch and NO snapshot encoding here.
//! This module is pure data plus the structural mutations (edge decay and
//! removal) that the engine drives.

pub mod node;
pub mod edge;
pub mod graph;

pub use node::{NodeId, NodeState};
pub use edge::{Edge, DyingEdge, Neighbor};
pub use graph::DenseGraph;

/// Weight floor below which an edge can no longer exist.
pub const PLANCK_THRESHOLD: f64 = 1e-3;
