//! # Horizon Physics
//!
//! Hawking-like pair creation driven by lapse gradients, and the independent
//! curvature-driven horizon detachment kernel (`detachment`).
//!
//! Per step, for every node:
//!
//! 1. `T_i = mean_j(|N_i − N_j| / (d_ij + ε)) / 2π`, with `d_ij = −ln w_ij`
//!    clamped to `[0, DISTANCE_CEILING]`.
//! 2. `P_i = exp(−2π·m_th / T_i)` above `TEMPERATURE_FLOOR`, else 0.
//! 3. Pair created when the node's own xorshift draw is below `P_i`.
//! 4. Backreaction: a quota of `min(2·m_th, 10% of incident weight)` is taken
//!    proportionally from the incident edges, floored at the Planck threshold.
//!
//! Backreaction is split into a per-node share pass and a per-slot apply
//! pass so that an edge shared by two radiating endpoints is written by
//! exactly one invocation per CSR slot.

pub mod detachment;
pub mod rng;

use serde::{Deserialize, Serialize};

use crate::compute::ComputeContext;
use crate::model::NodeState;
use crate::topology::SparseTopology;
use crate::{Error, Result};

pub use detachment::{forman_curvature, detachment_probability, HorizonDetachment};
pub use rng::Xorshift64;

/// Geodesic distance assigned to vanishing weights.
pub const DISTANCE_CEILING: f64 = 50.0;
/// Temperatures at or below this create no pairs.
pub const TEMPERATURE_FLOOR: f64 = 1e-12;
/// Exponents below this evaluate to probability 0.
pub const EXPONENT_CUTOFF: f64 = -700.0;
/// Guards the distance denominator.
pub const DISTANCE_EPSILON: f64 = 1e-9;

const TWO_PI: f64 = std::f64::consts::TAU;

/// d = −ln w, clamped to [0, ceiling]; w ≤ 0 maps to the ceiling.
pub fn geodesic_distance(weight: f64) -> f64 {
    if weight > 0.0 {
        (-weight.ln()).clamp(0.0, DISTANCE_CEILING)
    } else {
        DISTANCE_CEILING
    }
}

/// exp(−2π·m_th / T), 0 below the temperature floor or exponent cutoff.
pub fn pair_creation_probability(temperature: f64, mass_threshold: f64) -> f64 {
    if !(temperature > TEMPERATURE_FLOOR) || !temperature.is_finite() {
        return 0.0;
    }
    let exponent = (-TWO_PI * mass_threshold.max(0.0) / temperature).min(0.0);
    if exponent < EXPONENT_CUTOFF {
        0.0
    } else {
        exponent.exp()
    }
}

/// Per-node persistent state of the pair-creation kernel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonCell {
    pub rng: Xorshift64,
    pub temperature: f64,
    pub pair_probability: f64,
    pub pair_created: bool,
    pub extracted_energy: f64,
}

impl HorizonCell {
    fn seeded(seed: u64, index: usize) -> Self {
        Self {
            rng: Xorshift64::for_node(seed, index as u64),
            temperature: 0.0,
            pair_probability: 0.0,
            pair_created: false,
            extracted_energy: 0.0,
        }
    }
}

/// Summary of one pair-creation step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HawkingReport {
    pub pairs_created: u64,
    pub extracted_energy: f64,
    pub mean_temperature: f64,
    pub max_temperature: f64,
}

#[derive(Debug, Clone)]
pub struct HawkingRadiationEngine {
    mass_threshold: f64,
    planck_threshold: f64,
    backreaction_fraction: f64,
    seed: u64,
    cells: Vec<HorizonCell>,
}

impl HawkingRadiationEngine {
    pub fn new(mass_threshold: f64, planck_threshold: f64, backreaction_fraction: f64, seed: u64) -> Result<Self> {
        if !(mass_threshold.is_finite() && mass_threshold >= 0.0) {
            return Err(Error::InvalidArgument(format!("mass threshold {mass_threshold} must be finite and >= 0")));
        }
        if !(0.0..=1.0).contains(&backreaction_fraction) {
            return Err(Error::InvalidArgument(format!(
                "backreaction fraction {backreaction_fraction} outside [0, 1]"
            )));
        }
        Ok(Self {
            mass_threshold,
            planck_threshold,
            backreaction_fraction,
            seed,
            cells: Vec::new(),
        })
    }

    pub fn cells(&self) -> &[HorizonCell] {
        &self.cells
    }

    /// Grow/shrink the per-node state; existing generators are kept.
    pub fn ensure_nodes(&mut self, n: usize) {
        let seed = self.seed;
        let start = self.cells.len();
        self.cells.truncate(n);
        self.cells.extend((start..n).map(|i| HorizonCell::seeded(seed, i)));
    }

    /// Step 1: local temperature from the lapse gradient.
    pub fn compute_temperature(&mut self, ctx: &ComputeContext, topology: &SparseTopology, nodes: &[NodeState]) -> Result<()> {
        if topology.node_count() != nodes.len() {
            return Err(Error::InvalidArgument(format!(
                "topology has {} nodes, state has {}",
                topology.node_count(),
                nodes.len()
            )));
        }
        self.ensure_nodes(nodes.len());
        ctx.for_each_slot(&mut self.cells, |i, cell| {
            let (nbrs, weights) = topology.row(i);
            cell.temperature = if nbrs.is_empty() {
                0.0
            } else {
                let lapse = nodes[i].lapse;
                let gradient: f64 = nbrs
                    .iter()
                    .zip(weights)
                    .map(|(&j, &w)| (lapse - nodes[j as usize].lapse).abs() / (geodesic_distance(w) + DISTANCE_EPSILON))
                    .sum();
                gradient / nbrs.len() as f64 / TWO_PI
            };
        });
        Ok(())
    }

    /// Steps 2 and 3: probability and the stochastic trial.
    pub fn trial(&mut self, ctx: &ComputeContext) {
        let m = self.mass_threshold;
        ctx.for_each_slot(&mut self.cells, |_, cell| {
            cell.pair_probability = pair_creation_probability(cell.temperature, m);
            cell.pair_created = cell.rng.next_f64() < cell.pair_probability;
        });
    }

    /// Step 4: take energy from edges incident to radiating nodes. Returns
    /// the total weight removed. The per-node state must already cover the
    /// topology (see [`Self::ensure_nodes`]).
    pub fn apply_backreaction(&mut self, ctx: &ComputeContext, topology: &mut SparseTopology) -> Result<f64> {
        let n = topology.node_count();
        if self.cells.len() != n {
            return Err(Error::InvalidArgument(format!(
                "backreaction: horizon state has {} nodes, topology has {}",
                self.cells.len(),
                n
            )));
        }
        let quota_cap = 2.0 * self.mass_threshold;
        let fraction = self.backreaction_fraction;
        let floor = self.planck_threshold;

        // Pass A: fraction of each incident weight node i wants to remove.
        let mut share = vec![0.0; n];
        {
            let cells = &self.cells;
            let topo = &*topology;
            ctx.for_each_slot(&mut share, |i, s| {
                if !cells[i].pair_created {
                    return;
                }
                let total: f64 = topo.row(i).1.iter().sum();
                if total > 0.0 {
                    *s = quota_cap.min(fraction * total) / total;
                }
            });
        }

        // Pass B: per slot, apply both endpoints' requests to the edge.
        let slots = topology.edge_count();
        let mut next_weights = vec![0.0; slots];
        let mut own_removed = vec![0.0; slots];
        {
            let weights = topology.weights();
            let sources = topology.sources();
            let neighbors = topology.neighbors();
            ctx.for_each_slot_pair(&mut next_weights, &mut own_removed, |k, next, removed| {
                let w = weights[k];
                let own = share[sources[k] as usize] * w;
                let mirror = share[neighbors[k] as usize] * w;
                let requested = own + mirror;
                if requested <= 0.0 {
                    *next = w;
                    return;
                }
                *next = (w - requested).max(floor).min(w);
                *removed = (w - *next) * own / requested;
            });
        }
        topology.weights_mut().copy_from_slice(&next_weights);

        // Pass C: per node, sum what it actually took.
        let topo = &*topology;
        ctx.for_each_slot(&mut self.cells, |i, cell| {
            let (start, end) = topo.row_range(i);
            cell.extracted_energy = own_removed[start..end].iter().sum();
        });
        Ok(ctx.reduce_sum(&own_removed))
    }

    /// All four steps.
    pub fn run(&mut self, ctx: &ComputeContext, topology: &mut SparseTopology, nodes: &[NodeState]) -> Result<HawkingReport> {
        self.compute_temperature(ctx, topology, nodes)?;
        self.trial(ctx);
        let extracted_energy = self.apply_backreaction(ctx, topology)?;

        let pairs_created = self.cells.iter().filter(|c| c.pair_created).count() as u64;
        let temperatures: Vec<f64> = self.cells.iter().map(|c| c.temperature).collect();
        let mean_temperature = if temperatures.is_empty() {
            0.0
        } else {
            ctx.reduce_sum(&temperatures) / temperatures.len() as f64
        };
        let max_temperature = temperatures.iter().copied().fold(0.0, f64::max);

        if pairs_created > 0 {
            tracing::debug!(pairs_created, extracted_energy, "pair creation");
        }
        Ok(HawkingReport { pairs_created, extracted_energy, mean_temperature, max_temperature })
    }
}
