//! Curvature-driven horizon detachment.
//!
//! Each edge is owned by its lower-index endpoint, whose generator decides
//! whether it breaks with probability `exp(−1 / (|R|·ħ + ε))`, R being the
//! mean node curvature of the two endpoints. Broken edges are returned as
//! dying edges; their content is redistributed by the conservation engine.

use smallvec::SmallVec;

use super::{Xorshift64, EXPONENT_CUTOFF};
use crate::compute::ComputeContext;
use crate::model::{DyingEdge, NodeId};
use crate::topology::SparseTopology;
use crate::{Error, Result};

const CURVATURE_EPSILON: f64 = 1e-12;
/// Keeps detachment streams apart from the pair-creation streams.
const STREAM_SALT: u64 = 0xD1B5_4A32_D192_ED03;

/// Node curvature: mean Forman-Ricci curvature `4 − deg_i − deg_j` of the
/// incident edges. Isolated nodes are flat.
pub fn forman_curvature(ctx: &ComputeContext, topology: &SparseTopology) -> Vec<f64> {
    let mut curvature = vec![0.0; topology.node_count()];
    ctx.for_each_slot(&mut curvature, |i, r| {
        let (nbrs, _) = topology.row(i);
        if nbrs.is_empty() {
            return;
        }
        let deg_i = nbrs.len() as f64;
        let total: f64 = nbrs
            .iter()
            .map(|&j| 4.0 - deg_i - topology.degree(j as usize) as f64)
            .sum();
        *r = total / deg_i;
    });
    curvature
}

/// exp(−1 / (|R|·ħ + ε)), 0 below the exponent cutoff.
pub fn detachment_probability(curvature: f64, hbar: f64) -> f64 {
    let exponent = -1.0 / (curvature.abs() * hbar + CURVATURE_EPSILON);
    if !exponent.is_finite() || exponent < EXPONENT_CUTOFF {
        0.0
    } else {
        exponent.exp()
    }
}

#[derive(Debug, Clone)]
pub struct HorizonDetachment {
    hbar: f64,
    seed: u64,
    rngs: Vec<Xorshift64>,
}

impl HorizonDetachment {
    pub fn new(hbar: f64, seed: u64) -> Result<Self> {
        if !(hbar.is_finite() && hbar >= 0.0) {
            return Err(Error::InvalidArgument(format!("hbar {hbar} must be finite and >= 0")));
        }
        Ok(Self { hbar, seed: seed ^ STREAM_SALT, rngs: Vec::new() })
    }

    fn ensure_nodes(&mut self, n: usize) {
        let seed = self.seed;
        let start = self.rngs.len();
        self.rngs.truncate(n);
        self.rngs.extend((start..n).map(|i| Xorshift64::for_node(seed, i as u64)));
    }

    /// Trial every edge once. Weights are read from the CSR; gauge phases
    /// are left for the caller to fill in from the dense graph.
    pub fn detach(&mut self, ctx: &ComputeContext, topology: &SparseTopology, curvature: &[f64]) -> Result<Vec<DyingEdge>> {
        let n = topology.node_count();
        if curvature.len() != n {
            return Err(Error::InvalidArgument(format!(
                "curvature has {} entries, topology has {n} nodes",
                curvature.len()
            )));
        }
        self.ensure_nodes(n);

        let hbar = self.hbar;
        let mut broken: Vec<SmallVec<[(u32, f64); 2]>> = vec![SmallVec::new(); n];
        ctx.for_each_slot_pair(&mut self.rngs, &mut broken, |i, rng, out| {
            let (nbrs, weights) = topology.row(i);
            for (&j, &w) in nbrs.iter().zip(weights) {
                if (j as usize) <= i {
                    continue;
                }
                let r = 0.5 * (curvature[i] + curvature[j as usize]);
                if rng.next_f64() < detachment_probability(r, hbar) {
                    out.push((j, w));
                }
            }
        });

        let dying: Vec<DyingEdge> = broken
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                row.iter().map(move |&(j, w)| DyingEdge {
                    from: NodeId(i as u32),
                    to: NodeId(j),
                    energy: w,
                    gauge_phase: None,
                })
            })
            .collect();
        if !dying.is_empty() {
            tracing::debug!(count = dying.len(), "horizon detachment");
        }
        Ok(dying)
    }
}
