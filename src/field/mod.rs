//! # Field Evolution
//!
//! Klein-Gordon evolution of the per-node scalar field on the weighted graph
//! Laplacian, integrated with second-order Verlet and a node-local time step:
//!
//! ```text
//! Δφ_i      = Σ_j w_ij (φ_i − φ_j)
//! φ_next_i  = 2φ_i − φ_prev_i + dt_i² (−g·Δφ_i − m_i² φ_i)
//! ```
//!
//! Every node may advance at its own rate `dt_i = base_dt · N_i`; this is how
//! a small lapse produces time dilation.
//!
//! Pass order per step is fixed: Laplacian → Verlet → rotation. Rotation is
//! an index change over a three-slot arena, never a copy.

pub mod lapse;
pub mod wavefunction;

use crate::compute::ComputeContext;
use crate::topology::SparseTopology;
use crate::{Error, Result};

/// Floor applied to |dt| in the kinetic term.
pub const DT_EPSILON: f64 = 1e-12;

// ============================================================================
// Buffer arena
// ============================================================================

/// Three field buffers with a rotating "current" index.
#[derive(Debug, Clone)]
pub struct FieldBuffers {
    slots: [Vec<f64>; 3],
    current: usize,
}

impl FieldBuffers {
    /// `prev` and `current` given explicitly; `next` starts zeroed.
    pub fn new(previous: Vec<f64>, current: Vec<f64>) -> Self {
        let next = vec![0.0; current.len()];
        Self { slots: [current, next, previous], current: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots[self.current].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current(&self) -> &[f64] {
        &self.slots[self.current]
    }

    pub fn previous(&self) -> &[f64] {
        &self.slots[(self.current + 2) % 3]
    }

    /// (prev, current, next) for one integration pass.
    pub fn split_for_step(&mut self) -> (&[f64], &[f64], &mut [f64]) {
        let [a, b, c] = &mut self.slots;
        match self.current {
            0 => (&c[..], &a[..], &mut b[..]),
            1 => (&a[..], &b[..], &mut c[..]),
            _ => (&b[..], &c[..], &mut a[..]),
        }
    }

    /// prev ← current, current ← next.
    pub fn rotate(&mut self) {
        self.current = (self.current + 1) % 3;
    }
}

// ============================================================================
// FieldEvolutionEngine
// ============================================================================

#[derive(Debug, Clone)]
pub struct FieldEvolutionEngine {
    buffers: FieldBuffers,
    laplacian: Vec<f64>,
    laplacian_fresh: bool,
    coupling: f64,
}

impl FieldEvolutionEngine {
    /// Start from rest: previous == current.
    pub fn new(initial: Vec<f64>) -> Self {
        Self::with_previous(initial.clone(), initial)
    }

    pub fn with_previous(previous: Vec<f64>, current: Vec<f64>) -> Self {
        let n = current.len();
        Self {
            buffers: FieldBuffers::new(previous, current),
            laplacian: vec![0.0; n],
            laplacian_fresh: false,
            coupling: 1.0,
        }
    }

    pub fn node_count(&self) -> usize {
        self.buffers.len()
    }

    /// Effective coupling g scaling the gradient term.
    pub fn coupling(&self) -> f64 {
        self.coupling
    }

    pub fn set_coupling(&mut self, coupling: f64) {
        self.coupling = coupling;
    }

    pub fn current(&self) -> &[f64] {
        self.buffers.current()
    }

    pub fn previous(&self) -> &[f64] {
        self.buffers.previous()
    }

    pub fn laplacian(&self) -> &[f64] {
        &self.laplacian
    }

    fn check_len(&self, what: &str, len: usize) -> Result<()> {
        if len != self.node_count() {
            return Err(Error::InvalidArgument(format!(
                "{what} has {len} entries, field has {}",
                self.node_count()
            )));
        }
        Ok(())
    }

    /// Δφ for the current field. One invocation per node.
    pub fn compute_laplacian(&mut self, ctx: &ComputeContext, topology: &SparseTopology) -> Result<()> {
        self.check_len("topology", topology.node_count())?;
        laplacian_pass(ctx, topology, self.buffers.current(), &mut self.laplacian);
        self.laplacian_fresh = true;
        Ok(())
    }

    /// Verlet update with per-node dt and mass, then buffer rotation.
    /// Requires `compute_laplacian` for the current field first.
    pub fn integrate_step(&mut self, ctx: &ComputeContext, dt: &[f64], mass: &[f64]) -> Result<()> {
        self.check_len("dt", dt.len())?;
        self.check_len("mass", mass.len())?;
        if !self.laplacian_fresh {
            return Err(Error::InvalidArgument(
                "integrate_step called before compute_laplacian".into(),
            ));
        }

        let g = self.coupling;
        let lap = &self.laplacian;
        let (prev, cur, next) = self.buffers.split_for_step();
        ctx.for_each_slot(next, |i, out| {
            let h = dt[i];
            let m = mass[i];
            *out = 2.0 * cur[i] - prev[i] + h * h * (-g * lap[i] - m * m * cur[i]);
        });

        self.buffers.rotate();
        self.laplacian_fresh = false;
        Ok(())
    }

    /// Laplacian + Verlet + rotation.
    pub fn step(
        &mut self,
        ctx: &ComputeContext,
        topology: &SparseTopology,
        dt: &[f64],
        mass: &[f64],
    ) -> Result<()> {
        self.compute_laplacian(ctx, topology)?;
        self.integrate_step(ctx, dt, mass)
    }

    /// Per-node energy density: kinetic + gradient + mass term.
    pub fn energy_density(
        &self,
        ctx: &ComputeContext,
        topology: &SparseTopology,
        dt: &[f64],
        mass: &[f64],
    ) -> Result<Vec<f64>> {
        self.check_len("topology", topology.node_count())?;
        self.check_len("dt", dt.len())?;
        self.check_len("mass", mass.len())?;

        let cur = self.buffers.current();
        let prev = self.buffers.previous();
        let mut lap = vec![0.0; cur.len()];
        laplacian_pass(ctx, topology, cur, &mut lap);

        let g = self.coupling;
        let mut density = vec![0.0; cur.len()];
        ctx.for_each_slot(&mut density, |i, e| {
            let h = dt[i].abs().max(DT_EPSILON);
            let v = (cur[i] - prev[i]) / h;
            let m = mass[i];
            *e = 0.5 * v * v + 0.5 * g * cur[i] * lap[i] + 0.5 * m * m * cur[i] * cur[i];
        });
        Ok(density)
    }

    /// Σ of `energy_density`. Diagnostic only.
    pub fn compute_total_energy(
        &self,
        ctx: &ComputeContext,
        topology: &SparseTopology,
        dt: &[f64],
        mass: &[f64],
    ) -> Result<f64> {
        let density = self.energy_density(ctx, topology, dt, mass)?;
        Ok(ctx.reduce_sum(&density))
    }

    /// Leapfrog invariant Σ ½((φ−φ_prev)/dt)² + ½ φ·(g Δφ_prev + m² φ_prev).
    ///
    /// With uniform `dt` on a fixed topology this is constant up to
    /// rounding, whereas `compute_total_energy` oscillates at O(ω·dt).
    pub fn compute_discrete_energy(
        &self,
        ctx: &ComputeContext,
        topology: &SparseTopology,
        dt: &[f64],
        mass: &[f64],
    ) -> Result<f64> {
        self.check_len("topology", topology.node_count())?;
        self.check_len("dt", dt.len())?;
        self.check_len("mass", mass.len())?;

        let cur = self.buffers.current();
        let prev = self.buffers.previous();
        let mut lap_prev = vec![0.0; prev.len()];
        laplacian_pass(ctx, topology, prev, &mut lap_prev);

        let g = self.coupling;
        let mut density = vec![0.0; cur.len()];
        ctx.for_each_slot(&mut density, |i, e| {
            let h = dt[i].abs().max(DT_EPSILON);
            let v = (cur[i] - prev[i]) / h;
            let m = mass[i];
            *e = 0.5 * v * v + 0.5 * cur[i] * (g * lap_prev[i] + m * m * prev[i]);
        });
        Ok(ctx.reduce_sum(&density))
    }
}

fn laplacian_pass(ctx: &ComputeContext, topology: &SparseTopology, phi: &[f64], out: &mut [f64]) {
    let offsets = topology.offsets();
    let neighbors = topology.neighbors();
    let weights = topology.weights();
    ctx.for_each_slot(out, |i, lap| {
        let (start, end) = (offsets[i] as usize, offsets[i + 1] as usize);
        let pi = phi[i];
        *lap = (start..end)
            .map(|k| weights[k] * (pi - phi[neighbors[k] as usize]))
            .sum();
    });
}
