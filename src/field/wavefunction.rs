//! Wavefunction phase evolution and normalization.

use num_complex::Complex64;

use crate::compute::ComputeContext;
use crate::model::NodeState;
use crate::{Error, Result};

/// ψ_i ← ψ_i · e^{−i V_i dt_i}. Unitary per node, so Σ|ψ|² is unchanged.
pub fn advance_phase(ctx: &ComputeContext, nodes: &mut [NodeState], dt: &[f64]) -> Result<()> {
    if dt.len() != nodes.len() {
        return Err(Error::InvalidArgument(format!(
            "phase advance: {} time steps for {} nodes",
            dt.len(),
            nodes.len()
        )));
    }
    ctx.for_each_slot(nodes, |i, node| {
        let rotation = Complex64::from_polar(1.0, -node.potential * dt[i]);
        node.psi *= rotation;
        node.phase *= rotation;
    });
    Ok(())
}

/// Σ|ψ|².
pub fn norm(ctx: &ComputeContext, nodes: &[NodeState]) -> f64 {
    let densities: Vec<f64> = nodes.iter().map(NodeState::density).collect();
    ctx.reduce_sum(&densities)
}

/// Rescale so Σ|ψ|² = 1. A zero wavefunction is left untouched.
/// Returns the norm before rescaling.
pub fn normalize(ctx: &ComputeContext, nodes: &mut [NodeState]) -> f64 {
    let total = norm(ctx, nodes);
    if total > 0.0 && total.is_finite() {
        let scale = total.sqrt().recip();
        ctx.for_each_slot(nodes, |_, node| node.psi *= scale);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    #[test]
    fn test_phase_advance_preserves_norm() {
        let ctx = ComputeContext::host().unwrap();
        let mut nodes: Vec<NodeState> = (0..8)
            .map(|i| {
                NodeState::new(NodeId(i))
                    .with_psi(i as f64, 1.0)
                    .with_potential(0.3 * i as f64)
            })
            .collect();
        normalize(&ctx, &mut nodes);
        for _ in 0..100 {
            advance_phase(&ctx, &mut nodes, &[0.05; 8]).unwrap();
        }
        assert!((norm(&ctx, &nodes) - 1.0).abs() < 1e-12);
        assert!((nodes[3].phase.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_phase_advance_rejects_short_time_steps() {
        let ctx = ComputeContext::host().unwrap();
        let mut nodes: Vec<NodeState> =
            (0..4).map(|i| NodeState::new(NodeId(i)).with_psi(0.5, 0.0).with_potential(1.0)).collect();
        let err = advance_phase(&ctx, &mut nodes, &[0.1; 3]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(nodes[0].psi, Complex64::new(0.5, 0.0));
    }

    #[test]
    fn test_normalize_zero_wavefunction() {
        let ctx = ComputeContext::host().unwrap();
        let mut nodes: Vec<NodeState> = (0..4).map(|i| NodeState::new(NodeId(i))).collect();
        assert_eq!(normalize(&ctx, &mut nodes), 0.0);
        assert_eq!(norm(&ctx, &nodes), 0.0);
    }
}
