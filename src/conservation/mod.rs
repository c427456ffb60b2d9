//! # Conservation Engine
//!
//! When edges die, their content moves onto their endpoints:
//!
//! | Quantity | from-node | to-node |
//! |----------|-----------|---------|
//! | energy E | E/2       | E/2     |
//! | charge q = E·e^{iθ} | q/2 | conj(q)/2 |
//!
//! The to-node reads the link in the opposite direction, hence the conjugate:
//! the real (flux) part is conserved, the imaginary parts cancel.
//!
//! Accumulation is a gather: one invocation per node sums the dying edges
//! incident to it, so no two invocations write the same accumulator.

use std::time::{Duration, Instant};

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::compute::ComputeContext;
use crate::model::{DyingEdge, NodeState};
use crate::{Error, Result};

/// Per-node accumulator, live only within one `process_edge_deaths` call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConservationState {
    pub mass: f64,
    pub charge: Complex64,
    pub contributions: u32,
}

/// Outcome of one redistribution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConservationStats {
    pub energy_before: f64,
    pub energy_transferred: f64,
    /// Σ Re(q) over dying edges.
    pub flux_before: f64,
    /// Σ Re(charge deposited) over nodes.
    pub flux_after: f64,
    pub conservation_error: f64,
    pub is_conserved: bool,
    pub dying_edges: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ConservationEngine {
    tolerance: f64,
    strict: bool,
    accumulators: Vec<ConservationState>,
}

impl ConservationEngine {
    /// `tolerance` must be positive: summation order is not reproducible.
    pub fn new(tolerance: f64, strict: bool) -> Result<Self> {
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "conservation tolerance must be positive and finite, got {tolerance}"
            )));
        }
        Ok(Self { tolerance, strict, accumulators: Vec::new() })
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Redistribute the content of `dying` onto `nodes` and report.
    /// Removing the edges from the graph is the caller's job.
    pub fn process_edge_deaths(
        &mut self,
        ctx: &ComputeContext,
        nodes: &mut [NodeState],
        dying: &[DyingEdge],
    ) -> Result<ConservationStats> {
        let start = Instant::now();
        let n = nodes.len();

        let mut incident: Vec<SmallVec<[u32; 4]>> = vec![SmallVec::new(); n];
        for (k, edge) in dying.iter().enumerate() {
            if edge.from.index() >= n || edge.to.index() >= n {
                return Err(Error::Topology(format!(
                    "dying edge {}-{} references a node outside 0..{n}",
                    edge.from, edge.to
                )));
            }
            incident[edge.from.index()].push(k as u32);
            incident[edge.to.index()].push(k as u32);
        }

        // Gather pass: each node sums its own incident dying edges.
        self.accumulators.clear();
        self.accumulators.resize(n, ConservationState::default());
        ctx.for_each_slot(&mut self.accumulators, |i, acc| {
            for &k in &incident[i] {
                let edge = &dying[k as usize];
                let half = 0.5 * edge.energy;
                let q = 0.5 * edge.charge();
                if edge.from.index() == i {
                    acc.mass += half;
                    acc.charge += q;
                    acc.contributions += 1;
                }
                if edge.to.index() == i {
                    acc.mass += half;
                    acc.charge += q.conj();
                    acc.contributions += 1;
                }
            }
        });

        let energy_before: f64 = dying.iter().map(|e| e.energy).sum();
        let flux_before: f64 = dying.iter().map(|e| e.charge().re).sum();
        let deposited: Vec<f64> = self.accumulators.iter().map(|a| a.mass).collect();
        let flux: Vec<f64> = self.accumulators.iter().map(|a| a.charge.re).collect();
        let energy_transferred = ctx.reduce_sum(&deposited);
        let flux_after = ctx.reduce_sum(&flux);

        // Apply pass, then discard the accumulators.
        ctx.for_each_slot_pair(nodes, &mut self.accumulators, |_, node, acc| {
            node.mass += acc.mass;
            node.charge += acc.charge;
            *acc = ConservationState::default();
        });

        let conservation_error = (energy_before - energy_transferred).abs();
        let stats = ConservationStats {
            energy_before,
            energy_transferred,
            flux_before,
            flux_after,
            conservation_error,
            is_conserved: conservation_error <= self.tolerance,
            dying_edges: dying.len(),
            elapsed: start.elapsed(),
        };

        if !stats.is_conserved {
            if self.strict {
                tracing::warn!(
                    error = conservation_error,
                    tolerance = self.tolerance,
                    dying = dying.len(),
                    "conservation violated"
                );
            } else {
                tracing::debug!(error = conservation_error, "conservation drift");
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    fn nodes(n: u32) -> Vec<NodeState> {
        (0..n).map(|i| NodeState::new(NodeId(i))).collect()
    }

    #[test]
    fn test_tolerance_must_be_positive() {
        assert!(ConservationEngine::new(0.0, false).is_err());
        assert!(ConservationEngine::new(f64::NAN, false).is_err());
        assert!(ConservationEngine::new(1e-9, true).is_ok());
    }

    #[test]
    fn test_charge_sign_convention() {
        let ctx = ComputeContext::host().unwrap();
        let mut engine = ConservationEngine::new(1e-9, true).unwrap();
        let mut ns = nodes(2);
        let dying = [DyingEdge {
            from: NodeId(0),
            to: NodeId(1),
            energy: 0.4,
            gauge_phase: Some(std::f64::consts::FRAC_PI_2),
        }];
        let stats = engine.process_edge_deaths(&ctx, &mut ns, &dying).unwrap();
        assert!(ns[0].charge.im > 0.19 && ns[1].charge.im < -0.19);
        assert!((ns[0].charge + ns[1].charge).norm() < 1e-12);
        assert!((stats.flux_before - stats.flux_after).abs() < 1e-12);
    }

    #[test]
    fn test_shared_endpoint_accumulates() {
        let ctx = ComputeContext::host().unwrap();
        let mut engine = ConservationEngine::new(1e-9, false).unwrap();
        let mut ns = nodes(3);
        let dying = [
            DyingEdge { from: NodeId(0), to: NodeId(1), energy: 0.2, gauge_phase: None },
            DyingEdge { from: NodeId(2), to: NodeId(1), energy: 0.6, gauge_phase: None },
        ];
        let stats = engine.process_edge_deaths(&ctx, &mut ns, &dying).unwrap();
        assert!((ns[1].mass - 0.4).abs() < 1e-12);
        assert!((ns[0].mass - 0.1).abs() < 1e-12);
        assert!((ns[2].mass - 0.3).abs() < 1e-12);
        assert!(stats.is_conserved);
        assert_eq!(stats.dying_edges, 2);
    }

    #[test]
    fn test_no_deaths_is_trivially_conserved() {
        let ctx = ComputeContext::host().unwrap();
        let mut engine = ConservationEngine::new(1e-9, false).unwrap();
        let mut ns = nodes(3);
        let stats = engine.process_edge_deaths(&ctx, &mut ns, &[]).unwrap();
        assert!(stats.is_conserved);
        assert_eq!(stats.energy_transferred, 0.0);
    }

    #[test]
    fn test_out_of_range_dying_edge() {
        let ctx = ComputeContext::host().unwrap();
        let mut engine = ConservationEngine::new(1e-9, false).unwrap();
        let mut ns = nodes(2);
        let dying = [DyingEdge { from: NodeId(0), to: NodeId(5), energy: 0.2, gauge_phase: None }];
        assert!(matches!(
            engine.process_edge_deaths(&ctx, &mut ns, &dying),
            Err(Error::Topology(_))
        ));
    }
}
