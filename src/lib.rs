//! # spacetime-rs: Graph-Physics Evolution Engine
//!
//! Evolves a scalar field and a complex wavefunction on a weighted graph
//! whose edges decay, break and hand their content to their endpoints, and
//! publishes the state to a shared memory region that other processes read.
//!
//! ## Design Principles
//!
//! 1. **Explicit dispatch**: every kernel runs through a `ComputeContext`
//! 2. **Two graph views**: `DenseGraph` is authoritative, `SparseTopology` (CSR) is what kernels read
//! 3. **No lost content**: every dying edge flows through the `ConservationEngine`
//! 4. **Byte-level contract**: the snapshot layout is encoded field by field, never by struct layout
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spacetime_rs::{DenseGraph, Edge, EngineConfig, NodeId, NodeState, Simulation};
//! use spacetime_rs::snapshot::{FileRegionOpener, SnapshotExporter, DEFAULT_REGION_NAME};
//!
//! # fn example() -> spacetime_rs::Result<()> {
//! let nodes = (0..3).map(|i| NodeState::new(NodeId(i)).with_potential(0.1 * i as f64)).collect();
//! let graph = DenseGraph::from_edges(nodes, [
//!     Edge::new(NodeId(0), NodeId(1), 0.9),
//!     Edge::new(NodeId(1), NodeId(2), 0.7),
//! ])?;
//!
//! let mut sim = Simulation::new(EngineConfig::for_nodes(3), graph)?;
//! let region = FileRegionOpener::default().create(DEFAULT_REGION_NAME, sim.required_region_len())?;
//! let mut exporter = SnapshotExporter::new(region);
//!
//! for _ in 0..100 {
//!     sim.step()?;
//! }
//! sim.publish(&mut exporter)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `parallel` | yes | Kernel passes on a rayon pool |
//! | `async` | no | `runtime::SimulationTask` on tokio's blocking pool |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod compute;
pub mod topology;
pub mod field;
pub mod conservation;
pub mod vacuum;
pub mod horizon;
pub mod passes;
pub mod metrics;
pub mod snapshot;
pub mod config;
pub mod engine;
#[cfg(feature = "async")]
pub mod runtime;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    DenseGraph, DyingEdge, Edge, Neighbor,
    NodeId, NodeState, PLANCK_THRESHOLD,
};

// ============================================================================
// Re-exports: Kernels
// ============================================================================

pub use compute::{ComputeContext, DeviceCapabilities};
pub use topology::{SparseTopology, TopologySync, SyncAction};
pub use field::FieldEvolutionEngine;
pub use conservation::{ConservationEngine, ConservationStats};
pub use vacuum::{VacuumStatisticsEngine, VacuumStats};
pub use horizon::{HawkingRadiationEngine, HawkingReport, HorizonDetachment};

// ============================================================================
// Re-exports: Driver
// ============================================================================

pub use config::EngineConfig;
pub use engine::{Simulation, StepReport};
pub use metrics::SimulationMetrics;
pub use snapshot::{SimulationStatus, SnapshotExporter, SnapshotHeader, SnapshotReader};
#[cfg(feature = "async")]
pub use runtime::SimulationTask;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
