//! Node state carried by every vertex of the graph.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Dense node index. Node ids are positions in the node array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical state of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: NodeId,
    /// Wavefunction amplitude ψ.
    pub psi: Complex64,
    /// Scalar potential, also the Klein-Gordon field value.
    pub potential: f64,
    /// Lapse N ∈ (0, 1]: local proper-time rate.
    pub lapse: f64,
    /// Hamiltonian constraint value (≈ 0 for a valid state).
    pub hamiltonian: f64,
    /// Accumulated U(1) phase.
    pub phase: Complex64,
    /// Rest mass, grows as dying edges deposit energy.
    pub mass: f64,
    /// Complex charge deposited by dying edges.
    pub charge: Complex64,
    /// Layout position, only consumed by snapshot readers.
    pub position: [f32; 3],
}

impl NodeState {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            psi: Complex64::new(0.0, 0.0),
            potential: 0.0,
            lapse: 1.0,
            hamiltonian: 0.0,
            phase: Complex64::new(1.0, 0.0),
            mass: 0.0,
            charge: Complex64::new(0.0, 0.0),
            position: [0.0; 3],
        }
    }

    pub fn with_psi(mut self, re: f64, im: f64) -> Self {
        self.psi = Complex64::new(re, im);
        self
    }

    pub fn with_potential(mut self, potential: f64) -> Self {
        self.potential = potential;
        self
    }

    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_position(mut self, position: [f32; 3]) -> Self {
        self.position = position;
        self
    }

    /// Probability density |ψ|².
    pub fn density(&self) -> f64 {
        self.psi.norm_sqr()
    }
}
