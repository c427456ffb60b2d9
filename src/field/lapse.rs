//! Lapse and local time steps.
//!
//! The Hamiltonian constraint of node i is the deviation of its energy
//! density from the population mean; the lapse shrinks as that deviation
//! grows, so energetic regions advance more slowly.

use crate::compute::ComputeContext;
use crate::model::NodeState;
use crate::{Error, Result};

/// Smallest lapse a node can reach.
pub const LAPSE_FLOOR: f64 = 1e-3;

/// N = 1 / (1 + |H|), clamped to [floor, 1].
pub fn lapse_from_constraint(hamiltonian: f64, floor: f64) -> f64 {
    if !hamiltonian.is_finite() {
        return floor;
    }
    (1.0 / (1.0 + hamiltonian.abs())).clamp(floor, 1.0)
}

/// H_i = ρ_i − mean(ρ). Writes `hamiltonian` and `lapse` of every node.
pub fn update_from_density(
    ctx: &ComputeContext,
    nodes: &mut [NodeState],
    density: &[f64],
    floor: f64,
) -> Result<()> {
    if density.len() != nodes.len() {
        return Err(Error::InvalidArgument(format!(
            "lapse update: {} densities for {} nodes",
            density.len(),
            nodes.len()
        )));
    }
    if nodes.is_empty() {
        return Ok(());
    }
    let mean = ctx.reduce_sum(density) / density.len() as f64;
    ctx.for_each_slot(nodes, |i, node| {
        node.hamiltonian = density[i] - mean;
        node.lapse = lapse_from_constraint(node.hamiltonian, floor);
    });
    Ok(())
}

/// dt_i = base_dt · N_i.
pub fn local_time_steps(ctx: &ComputeContext, base_dt: f64, nodes: &[NodeState], out: &mut Vec<f64>) {
    out.resize(nodes.len(), 0.0);
    ctx.for_each_slot(out, |i, dt| *dt = base_dt * nodes[i].lapse);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    #[test]
    fn test_lapse_bounds() {
        assert_eq!(lapse_from_constraint(0.0, LAPSE_FLOOR), 1.0);
        assert_eq!(lapse_from_constraint(-1.0, LAPSE_FLOOR), 0.5);
        assert_eq!(lapse_from_constraint(1e9, LAPSE_FLOOR), LAPSE_FLOOR);
        assert_eq!(lapse_from_constraint(f64::NAN, LAPSE_FLOOR), LAPSE_FLOOR);
    }

    #[test]
    fn test_energetic_node_slows_down() {
        let ctx = ComputeContext::host().unwrap();
        let mut nodes: Vec<NodeState> = (0..3).map(|i| NodeState::new(NodeId(i))).collect();
        update_from_density(&ctx, &mut nodes, &[0.0, 0.0, 3.0], LAPSE_FLOOR).unwrap();
        assert_eq!(nodes[2].hamiltonian, 2.0);
        assert!(nodes[2].lapse < nodes[0].lapse);

        let mut dt = Vec::new();
        local_time_steps(&ctx, 0.1, &nodes, &mut dt);
        assert_eq!(dt.len(), 3);
        assert!((dt[2] - 0.1 / 3.0).abs() < 1e-15);
    }

    #[test]
    fn test_density_length_mismatch() {
        let ctx = ComputeContext::host().unwrap();
        let mut nodes: Vec<NodeState> = (0..4).map(|i| NodeState::new(NodeId(i))).collect();
        let err = update_from_density(&ctx, &mut nodes, &[5.0, 0.0], LAPSE_FLOOR).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(nodes.iter().all(|n| n.lapse == 1.0));
    }
}
