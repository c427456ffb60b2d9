//! Engine configuration.
//!
//! Every section deserializes with defaults, so a JSON document only needs
//! the keys it changes:
//!
//! ```json
//! { "node_count": 128, "horizon": { "seed": 7, "detachment": false } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::PLANCK_THRESHOLD;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of nodes the supplied graph must have.
    pub node_count: usize,
    /// Stop after this many steps; 0 runs until stopped.
    pub total_steps: u64,
    /// Worker threads for the compute pool; 0 lets rayon decide.
    pub worker_threads: usize,
    /// Gradient coupling g when no annealing schedule is set.
    pub coupling: f64,
    pub annealing: Option<AnnealingSchedule>,
    pub topology: TopologyConfig,
    pub field: FieldConfig,
    pub conservation: ConservationConfig,
    pub decay: DecayConfig,
    pub vacuum: VacuumConfig,
    pub horizon: HorizonConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_count: 0,
            total_steps: 0,
            worker_threads: 0,
            coupling: 1.0,
            annealing: None,
            topology: TopologyConfig::default(),
            field: FieldConfig::default(),
            conservation: ConservationConfig::default(),
            decay: DecayConfig::default(),
            vacuum: VacuumConfig::default(),
            horizon: HorizonConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Steps between full CSR rebuilds. Negative is rejected, 0 means 1.
    pub sync_interval: i64,
    /// Whether CSR-side weight edits (backreaction) are copied back into
    /// the dense graph after the auxiliary passes.
    pub csr_weight_of_record: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self { sync_interval: 10, csr_weight_of_record: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub base_dt: f64,
    /// Bare Klein-Gordon mass, added to each node's accumulated mass.
    pub base_mass: f64,
    pub lapse_floor: f64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self { base_dt: 0.01, base_mass: 0.1, lapse_floor: crate::field::lapse::LAPSE_FLOOR }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConservationConfig {
    pub tolerance: f64,
    pub strict: bool,
}

impl Default for ConservationConfig {
    fn default() -> Self {
        Self { tolerance: 1e-9, strict: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Fractional weight loss per step, in [0, 1).
    pub rate: f64,
    /// Weight below which an edge dies.
    pub planck_threshold: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self { rate: 0.0, planck_threshold: PLANCK_THRESHOLD }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VacuumConfig {
    pub enabled: bool,
    /// Nodes lighter than this are vacuum members.
    pub mass_threshold: f64,
}

impl Default for VacuumConfig {
    fn default() -> Self {
        Self { enabled: true, mass_threshold: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    pub pair_creation: bool,
    pub detachment: bool,
    pub mass_threshold: f64,
    /// Cap on backreaction as a fraction of a node's incident weight.
    pub backreaction_fraction: f64,
    pub hbar: f64,
    pub seed: u64,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            pair_creation: true,
            detachment: true,
            mass_threshold: 1.0,
            backreaction_fraction: 0.1,
            hbar: 0.05,
            seed: 0x5EED,
        }
    }
}

/// Linear interpolation of the coupling from `start` to `end` over `steps`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnealingSchedule {
    pub start: f64,
    pub end: f64,
    pub steps: u64,
}

impl AnnealingSchedule {
    pub fn coupling_at(&self, iteration: u64) -> f64 {
        if self.steps == 0 || iteration >= self.steps {
            return self.end;
        }
        let t = iteration as f64 / self.steps as f64;
        self.start + (self.end - self.start) * t
    }
}

fn require_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be finite, got {value}")))
    }
}

fn require_range(name: &str, value: f64, range: std::ops::RangeInclusive<f64>) -> Result<()> {
    require_finite(name, value)?;
    if range.contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} = {value} outside [{}, {}]", range.start(), range.end())))
    }
}

impl EngineConfig {
    /// Defaults for a graph of `node_count` nodes.
    pub fn for_nodes(node_count: usize) -> Self {
        Self { node_count, ..Self::default() }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Effective rebuild interval, at least 1.
    pub fn sync_interval(&self) -> u64 {
        self.topology.sync_interval.max(1) as u64
    }

    /// Coupling for a given iteration.
    pub fn coupling_at(&self, iteration: u64) -> f64 {
        match &self.annealing {
            Some(schedule) => schedule.coupling_at(iteration),
            None => self.coupling,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_count == 0 {
            return Err(Error::Config("node_count must be > 0".into()));
        }
        if self.topology.sync_interval < 0 {
            return Err(Error::Config(format!(
                "topology.sync_interval must be >= 0, got {}",
                self.topology.sync_interval
            )));
        }

        require_finite("coupling", self.coupling)?;
        if let Some(schedule) = &self.annealing {
            require_finite("annealing.start", schedule.start)?;
            require_finite("annealing.end", schedule.end)?;
        }

        require_finite("field.base_dt", self.field.base_dt)?;
        if self.field.base_dt <= 0.0 {
            return Err(Error::Config(format!("field.base_dt must be > 0, got {}", self.field.base_dt)));
        }
        require_finite("field.base_mass", self.field.base_mass)?;
        require_range("field.lapse_floor", self.field.lapse_floor, f64::MIN_POSITIVE..=1.0)?;

        require_finite("conservation.tolerance", self.conservation.tolerance)?;
        if self.conservation.tolerance <= 0.0 {
            return Err(Error::Config(format!(
                "conservation.tolerance must be > 0, got {}",
                self.conservation.tolerance
            )));
        }

        require_range("decay.rate", self.decay.rate, 0.0..=1.0)?;
        if self.decay.rate >= 1.0 {
            return Err(Error::Config("decay.rate must be < 1".into()));
        }
        require_range("decay.planck_threshold", self.decay.planck_threshold, f64::MIN_POSITIVE..=1.0)?;

        require_finite("vacuum.mass_threshold", self.vacuum.mass_threshold)?;
        require_range("horizon.mass_threshold", self.horizon.mass_threshold, 0.0..=f64::MAX)?;
        require_range("horizon.backreaction_fraction", self.horizon.backreaction_fraction, 0.0..=1.0)?;
        require_range("horizon.hbar", self.horizon.hbar, 0.0..=f64::MAX)?;
        Ok(())
    }
}
