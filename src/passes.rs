//! # Auxiliary Passes
//!
//! The kernels that run between field integration and edge decay. The set
//! is fixed at compile time in [`REGISTRY`]; configuration only decides
//! which entries are instantiated. Passes run in registry order.

use serde::{Deserialize, Serialize};

use crate::compute::ComputeContext;
use crate::config::EngineConfig;
use crate::horizon::{forman_curvature, HawkingRadiationEngine, HawkingReport, HorizonDetachment};
use crate::model::{DenseGraph, DyingEdge};
use crate::topology::SparseTopology;
use crate::vacuum::{vacuum_mask, VacuumStatisticsEngine, VacuumStats};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassId {
    Vacuum,
    PairCreation,
    Detachment,
}

impl PassId {
    pub fn name(self) -> &'static str {
        match self {
            PassId::Vacuum => "vacuum",
            PassId::PairCreation => "hawking",
            PassId::Detachment => "detachment",
        }
    }
}

/// What a pass may read and touch.
pub struct PassInput<'a> {
    pub ctx: &'a ComputeContext,
    pub graph: &'a DenseGraph,
    pub topology: &'a mut SparseTopology,
    /// Current scalar field.
    pub field: &'a [f64],
}

/// Results collected across the passes of one step.
#[derive(Debug, Clone, Default)]
pub struct PassOutput {
    pub vacuum: Option<VacuumStats>,
    pub hawking: Option<HawkingReport>,
    pub detached: Vec<DyingEdge>,
    /// Set when a pass edited CSR weights in place.
    pub csr_weights_changed: bool,
}

pub trait AuxiliaryPass: Send {
    fn id(&self) -> PassId;

    fn run(&mut self, input: &mut PassInput<'_>, output: &mut PassOutput) -> Result<()>;
}

type PassFactory = fn(&EngineConfig) -> Result<Option<Box<dyn AuxiliaryPass>>>;

pub struct PassDescriptor {
    pub id: PassId,
    pub build: PassFactory,
}

/// Every auxiliary pass the engine knows, in execution order.
pub const REGISTRY: &[PassDescriptor] = &[
    PassDescriptor { id: PassId::Vacuum, build: VacuumPass::build },
    PassDescriptor { id: PassId::PairCreation, build: PairCreationPass::build },
    PassDescriptor { id: PassId::Detachment, build: DetachmentPass::build },
];

/// Instantiate the passes enabled by `config`.
pub fn build_passes(config: &EngineConfig) -> Result<Vec<Box<dyn AuxiliaryPass>>> {
    let mut passes = Vec::with_capacity(REGISTRY.len());
    for descriptor in REGISTRY {
        if let Some(pass) = (descriptor.build)(config)? {
            tracing::debug!(pass = descriptor.id.name(), "auxiliary pass enabled");
            passes.push(pass);
        }
    }
    Ok(passes)
}

// ============================================================================
// Vacuum statistics
// ============================================================================

pub struct VacuumPass {
    mass_threshold: f64,
    engine: VacuumStatisticsEngine,
    masses: Vec<f64>,
}

impl VacuumPass {
    fn build(config: &EngineConfig) -> Result<Option<Box<dyn AuxiliaryPass>>> {
        if !config.vacuum.enabled {
            return Ok(None);
        }
        Ok(Some(Box::new(Self {
            mass_threshold: config.vacuum.mass_threshold,
            engine: VacuumStatisticsEngine::new(),
            masses: Vec::new(),
        })))
    }
}

impl AuxiliaryPass for VacuumPass {
    fn id(&self) -> PassId {
        PassId::Vacuum
    }

    fn run(&mut self, input: &mut PassInput<'_>, output: &mut PassOutput) -> Result<()> {
        self.masses.clear();
        self.masses.extend(input.graph.nodes().iter().map(|n| n.mass));
        let mask = vacuum_mask(&self.masses, self.mass_threshold);
        output.vacuum = Some(self.engine.compute(input.ctx, input.field, &mask)?);
        Ok(())
    }
}

// ============================================================================
// Pair creation
// ============================================================================

pub struct PairCreationPass {
    engine: HawkingRadiationEngine,
}

impl PairCreationPass {
    fn build(config: &EngineConfig) -> Result<Option<Box<dyn AuxiliaryPass>>> {
        if !config.horizon.pair_creation {
            return Ok(None);
        }
        let engine = HawkingRadiationEngine::new(
            config.horizon.mass_threshold,
            config.decay.planck_threshold,
            config.horizon.backreaction_fraction,
            config.horizon.seed,
        )?;
        Ok(Some(Box::new(Self { engine })))
    }
}

impl AuxiliaryPass for PairCreationPass {
    fn id(&self) -> PassId {
        PassId::PairCreation
    }

    fn run(&mut self, input: &mut PassInput<'_>, output: &mut PassOutput) -> Result<()> {
        let report = self.engine.run(input.ctx, input.topology, input.graph.nodes())?;
        output.csr_weights_changed |= report.extracted_energy > 0.0;
        output.hawking = Some(report);
        Ok(())
    }
}

// ============================================================================
// Horizon detachment
// ============================================================================

pub struct DetachmentPass {
    kernel: HorizonDetachment,
}

impl DetachmentPass {
    fn build(config: &EngineConfig) -> Result<Option<Box<dyn AuxiliaryPass>>> {
        if !config.horizon.detachment {
            return Ok(None);
        }
        Ok(Some(Box::new(Self { kernel: HorizonDetachment::new(config.horizon.hbar, config.horizon.seed)? })))
    }
}

impl AuxiliaryPass for DetachmentPass {
    fn id(&self) -> PassId {
        PassId::Detachment
    }

    fn run(&mut self, input: &mut PassInput<'_>, output: &mut PassOutput) -> Result<()> {
        let curvature = forman_curvature(input.ctx, input.topology);
        let mut broken = self.kernel.detach(input.ctx, input.topology, &curvature)?;
        for edge in &mut broken {
            edge.gauge_phase = input.graph.gauge_phase(edge.from, edge.to);
        }
        output.detached.extend(broken);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_order_and_names() {
        let ids: Vec<PassId> = REGISTRY.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![PassId::Vacuum, PassId::PairCreation, PassId::Detachment]);
        assert_eq!(PassId::PairCreation.name(), "hawking");
    }

    #[test]
    fn test_build_respects_toggles() {
        let mut config = EngineConfig::for_nodes(4);
        assert_eq!(build_passes(&config).unwrap().len(), 3);

        config.vacuum.enabled = false;
        config.horizon.detachment = false;
        let passes = build_passes(&config).unwrap();
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].id(), PassId::PairCreation);
    }

    #[test]
    fn test_invalid_horizon_settings_fail_build() {
        let mut config = EngineConfig::for_nodes(4);
        config.horizon.backreaction_fraction = 2.0;
        assert!(build_passes(&config).is_err());
    }
}
