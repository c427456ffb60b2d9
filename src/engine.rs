//! # Simulation Driver
//!
//! Owns the dense graph, the CSR view, the field buffers and every kernel
//! engine, and runs them in a fixed order each step:
//!
//! ```text
//! topology sync ─▶ lapse / dt ─▶ Laplacian + Verlet + rotate ─▶ phase advance
//!      ─▶ auxiliary passes ─▶ edge decay ─▶ conservation ─▶ edge removal
//! ```
//!
//! The scalar field is the nodes' `potential`: it is read once at
//! construction and written back after every integration.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compute::{ComputeContext, DeviceCapabilities};
use crate::config::EngineConfig;
use crate::conservation::{ConservationEngine, ConservationStats};
use crate::field::{lapse, wavefunction, FieldEvolutionEngine};
use crate::horizon::HawkingReport;
use crate::metrics::{SimulationMetrics, StageTimer};
use crate::model::DenseGraph;
use crate::passes::{build_passes, AuxiliaryPass, PassInput, PassOutput};
use crate::snapshot::{
    required_capacity, EdgeRecord, NodeRecord, SimulationStatus, SnapshotExporter, SnapshotFrame, SnapshotHeader,
    WritableRegion, MAX_MODULE_STATS,
};
use crate::topology::{SparseTopology, SyncAction, TopologySync};
use crate::vacuum::VacuumStats;
use crate::{Error, Result};

/// What one `Simulation::step` did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Iteration count after the step.
    pub iteration: u64,
    pub rebuilt_topology: bool,
    pub coupling: f64,
    pub conservation: ConservationStats,
    pub vacuum: Option<VacuumStats>,
    pub hawking: Option<HawkingReport>,
    pub detached_edges: usize,
    pub decayed_edges: usize,
    pub elapsed: Duration,
}

pub struct Simulation {
    config: EngineConfig,
    ctx: ComputeContext,
    graph: DenseGraph,
    topology: SparseTopology,
    sync: TopologySync,
    field: FieldEvolutionEngine,
    conservation: ConservationEngine,
    passes: Vec<Box<dyn AuxiliaryPass>>,
    timer: StageTimer,
    dt: Vec<f64>,
    masses: Vec<f64>,
    iteration: u64,
    status: SimulationStatus,
    last_report: Option<StepReport>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("iteration", &self.iteration)
            .field("status", &self.status)
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("passes", &self.passes.len())
            .finish()
    }
}

impl Simulation {
    /// Validate `config`, create a compute context for it and take
    /// ownership of `graph`.
    pub fn new(config: EngineConfig, graph: DenseGraph) -> Result<Self> {
        let caps = DeviceCapabilities { worker_threads: config.worker_threads, ..DeviceCapabilities::host() };
        Self::with_context(config, ComputeContext::new(caps)?, graph)
    }

    pub fn with_context(config: EngineConfig, ctx: ComputeContext, graph: DenseGraph) -> Result<Self> {
        config.validate()?;
        if graph.node_count() != config.node_count {
            return Err(Error::Config(format!(
                "graph has {} nodes, config expects {}",
                graph.node_count(),
                config.node_count
            )));
        }

        let potentials: Vec<f64> = graph.nodes().iter().map(|n| n.potential).collect();
        let mut field = FieldEvolutionEngine::new(potentials);
        field.set_coupling(config.coupling_at(0));

        let n = graph.node_count();
        let sim = Self {
            sync: TopologySync::new(config.sync_interval()),
            conservation: ConservationEngine::new(config.conservation.tolerance, config.conservation.strict)?,
            passes: build_passes(&config)?,
            dt: graph.nodes().iter().map(|node| config.field.base_dt * node.lapse).collect(),
            masses: vec![0.0; n],
            topology: SparseTopology::new(),
            timer: StageTimer::new(),
            iteration: 0,
            status: SimulationStatus::Paused,
            last_report: None,
            field,
            graph,
            ctx,
            config,
        };
        tracing::info!(
            nodes = n,
            edges = sim.graph.edge_count(),
            passes = sim.passes.len(),
            workers = sim.ctx.worker_count(),
            "simulation ready"
        );
        Ok(sim)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &ComputeContext {
        &self.ctx
    }

    pub fn graph(&self) -> &DenseGraph {
        &self.graph
    }

    /// External edits are picked up at the next step: structural changes
    /// force a CSR rebuild, weight changes flow through the weight sync.
    pub fn graph_mut(&mut self) -> &mut DenseGraph {
        &mut self.graph
    }

    pub fn topology(&self) -> &SparseTopology {
        &self.topology
    }

    pub fn field(&self) -> &FieldEvolutionEngine {
        &self.field
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn status(&self) -> SimulationStatus {
        self.status
    }

    pub fn last_report(&self) -> Option<&StepReport> {
        self.last_report.as_ref()
    }

    pub fn stage_timer(&self) -> &StageTimer {
        &self.timer
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn pause(&mut self) {
        if self.status == SimulationStatus::Running {
            self.status = SimulationStatus::Paused;
        }
    }

    pub fn stop(&mut self) {
        self.status = SimulationStatus::Stopped;
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, SimulationStatus::Stopped | SimulationStatus::Faulted)
    }

    /// Rescale ψ after external edits. Returns the prior Σ|ψ|².
    pub fn normalize_wavefunction(&mut self) -> f64 {
        wavefunction::normalize(&self.ctx, self.graph.nodes_mut())
    }

    /// Advance one step. A failing stage leaves the simulation `Faulted`.
    pub fn step(&mut self) -> Result<StepReport> {
        match self.status {
            SimulationStatus::Stopped => return Err(Error::Runtime("simulation is stopped".into())),
            SimulationStatus::Faulted => return Err(Error::Runtime("simulation faulted".into())),
            _ => {}
        }
        self.status = SimulationStatus::Running;
        match self.advance() {
            Ok(report) => {
                if self.config.total_steps > 0 && self.iteration >= self.config.total_steps {
                    tracing::info!(iteration = self.iteration, "step target reached");
                    self.status = SimulationStatus::Stopped;
                }
                self.last_report = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                tracing::error!(iteration = self.iteration, error = %e, "step failed");
                self.status = SimulationStatus::Faulted;
                Err(e)
            }
        }
    }

    /// Step until `steps` more iterations ran or the simulation stopped.
    pub fn run(&mut self, steps: u64) -> Result<u64> {
        let mut ran = 0;
        while ran < steps && !self.is_finished() {
            self.step()?;
            ran += 1;
        }
        Ok(ran)
    }

    fn advance(&mut self) -> Result<StepReport> {
        let started = Instant::now();

        // Topology
        let action = self.sync.plan(self.topology.is_in_sync_with(&self.graph));
        self.timer.time("topology", || match action {
            SyncAction::Rebuild => self.topology.rebuild(Some(&self.graph)),
            SyncAction::WeightsOnly => self.topology.sync_weights_only(Some(&self.graph)),
        })?;

        // Lapse and local time steps
        let coupling = self.config.coupling_at(self.iteration);
        self.field.set_coupling(coupling);
        let base_mass = self.config.field.base_mass;
        self.masses.clear();
        self.masses.extend(self.graph.nodes().iter().map(|n| base_mass + n.mass));
        let density = self
            .timer
            .time("lapse", || self.field.energy_density(&self.ctx, &self.topology, &self.dt, &self.masses))?;
        lapse::update_from_density(&self.ctx, self.graph.nodes_mut(), &density, self.config.field.lapse_floor)?;
        lapse::local_time_steps(&self.ctx, self.config.field.base_dt, self.graph.nodes(), &mut self.dt);

        // Field
        self.timer.time("field", || self.field.step(&self.ctx, &self.topology, &self.dt, &self.masses))?;
        let current = self.field.current();
        self.ctx.for_each_slot(self.graph.nodes_mut(), |i, node| node.potential = current[i]);
        wavefunction::advance_phase(&self.ctx, self.graph.nodes_mut(), &self.dt)?;

        // Auxiliary passes
        let mut output = PassOutput::default();
        {
            let mut input = PassInput {
                ctx: &self.ctx,
                graph: &self.graph,
                topology: &mut self.topology,
                field: self.field.current(),
            };
            for pass in &mut self.passes {
                let name = pass.id().name();
                self.timer.time(name, || pass.run(&mut input, &mut output))?;
            }
        }
        if output.csr_weights_changed && self.config.topology.csr_weight_of_record {
            self.topology.pull_weights_back(Some(&mut self.graph))?;
        }

        // Detached edges carry the dense graph's weight, which is the CSR
        // weight only when the CSR is weight-of-record.
        let mut dying = self.graph.take_edges(&output.detached);
        let detached_edges = dying.len();
        let decayed = self.graph.decay_edges(self.config.decay.rate, self.config.decay.planck_threshold);
        dying.extend_from_slice(&decayed);
        let conservation = self.timer.time("conservation", || {
            self.conservation.process_edge_deaths(&self.ctx, self.graph.nodes_mut(), &dying)
        })?;
        self.graph.remove_edges(&decayed);

        self.iteration += 1;
        Ok(StepReport {
            iteration: self.iteration,
            rebuilt_topology: action == SyncAction::Rebuild,
            coupling,
            conservation,
            vacuum: output.vacuum,
            hawking: output.hawking,
            detached_edges,
            decayed_edges: decayed.len(),
            elapsed: started.elapsed(),
        })
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// CSR built from the current dense graph, independent of the cadence.
    fn fresh_topology(&self) -> Result<SparseTopology> {
        let mut topology = SparseTopology::new();
        topology.rebuild(Some(&self.graph))?;
        Ok(topology)
    }

    pub fn total_energy(&self) -> Result<f64> {
        let topology = self.fresh_topology()?;
        let base_mass = self.config.field.base_mass;
        let masses: Vec<f64> = self.graph.nodes().iter().map(|n| base_mass + n.mass).collect();
        self.field.compute_total_energy(&self.ctx, &topology, &self.dt, &masses)
    }

    pub fn metrics(&self) -> Result<SimulationMetrics> {
        let topology = self.fresh_topology()?;
        Ok(SimulationMetrics::collect(&self.ctx, &self.graph, &topology, self.field.current()))
    }

    /// Region size that fits a frame of the current graph.
    pub fn required_region_len(&self) -> usize {
        required_capacity(self.graph.node_count(), self.graph.edge_count(), MAX_MODULE_STATS)
    }

    /// Everything a publish writes, stamped with `now`.
    pub fn snapshot_frame(&self, now: DateTime<Utc>) -> Result<SnapshotFrame> {
        let topology = self.fresh_topology()?;
        let metrics = SimulationMetrics::collect(&self.ctx, &self.graph, &topology, self.field.current());
        let base_mass = self.config.field.base_mass;
        let masses: Vec<f64> = self.graph.nodes().iter().map(|n| base_mass + n.mass).collect();
        let system_energy = self.field.compute_total_energy(&self.ctx, &topology, &self.dt, &masses)?;

        let workers = self.ctx.worker_count() as i32;
        let mut header = SnapshotHeader {
            iteration: self.iteration as i64,
            system_energy,
            status: self.status,
            cluster_count: metrics.cluster_count as i32,
            busy_workers: if self.status == SimulationStatus::Running { workers } else { 0 },
            total_workers: workers,
            spectral_dimension: metrics.spectral_dimension,
            latest_energy: self.last_report.as_ref().map_or(0.0, |r| r.conservation.energy_transferred),
            excited_nodes: metrics.excited_nodes as i32,
            heavy_mass: metrics.heavy_mass,
            largest_cluster: metrics.largest_cluster as i32,
            strong_edges: metrics.strong_edges as i32,
            norm: metrics.norm,
            entanglement: metrics.entanglement,
            correlation: metrics.correlation,
            temperature: self
                .last_report
                .as_ref()
                .and_then(|r| r.hawking)
                .map_or(0.0, |h| h.mean_temperature),
            effective_coupling: self.field.coupling(),
            total_steps: self.config.total_steps as i64,
            ..Default::default()
        };
        header.touch(now);

        let field = self.field.current();
        let scale = field.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let n = self.graph.node_count().max(1) as f64;
        let nodes = self
            .graph
            .nodes()
            .iter()
            .zip(field)
            .map(|(node, &phi)| NodeRecord {
                position: node.position,
                color: node_color(phi, scale, node.density() * n),
                id: node.id.0 as i32,
            })
            .collect();
        let edges = self
            .graph
            .edges()
            .map(|e| EdgeRecord { from: e.from.0 as i32, to: e.to.0 as i32, weight: e.weight as f32 })
            .collect();

        Ok(SnapshotFrame { header, nodes, edges, module_stats: self.timer.entries() }.finalize())
    }

    /// Build a frame and write it through `exporter`.
    pub fn publish<R: WritableRegion>(&mut self, exporter: &mut SnapshotExporter<R>) -> Result<()> {
        let stage = Instant::now();
        let published = self.snapshot_frame(Utc::now()).and_then(|frame| exporter.publish(frame));
        self.timer.record("publish", stage.elapsed(), published.is_ok());
        published
    }
}

/// Red for positive field, blue for negative, green for probability
/// density relative to the uniform share.
fn node_color(phi: f64, scale: f64, relative_density: f64) -> [f32; 3] {
    let level = if scale > 0.0 { (phi / scale).clamp(-1.0, 1.0) } else { 0.0 };
    [
        level.max(0.0) as f32,
        relative_density.clamp(0.0, 1.0) as f32,
        (-level).max(0.0) as f32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, NodeId, NodeState};

    fn ring(n: u32, weight: f64) -> DenseGraph {
        DenseGraph::from_edges(
            (0..n).map(|i| NodeState::new(NodeId(i)).with_psi(1.0, 0.0)).collect(),
            (0..n).map(|i| Edge::new(NodeId(i), NodeId((i + 1) % n), weight)),
        )
        .unwrap()
    }

    fn quiet_config(n: usize) -> EngineConfig {
        let mut config = EngineConfig::for_nodes(n);
        config.vacuum.enabled = false;
        config.horizon.pair_creation = false;
        config.horizon.detachment = false;
        config
    }

    #[test]
    fn test_node_count_mismatch() {
        assert!(matches!(Simulation::new(EngineConfig::for_nodes(3), ring(4, 0.5)), Err(Error::Config(_))));
    }

    #[test]
    fn test_step_advances_iteration() {
        let mut sim = Simulation::new(quiet_config(6), ring(6, 0.5)).unwrap();
        assert_eq!(sim.status(), SimulationStatus::Paused);
        let report = sim.step().unwrap();
        assert_eq!(report.iteration, 1);
        assert!(report.rebuilt_topology);
        assert_eq!(sim.status(), SimulationStatus::Running);
        let report = sim.step().unwrap();
        assert!(!report.rebuilt_topology);
        assert_eq!(sim.stage_timer().invocations("field"), 2);
    }

    #[test]
    fn test_total_steps_stops_simulation() {
        let mut config = quiet_config(4);
        config.total_steps = 3;
        let mut sim = Simulation::new(config, ring(4, 0.5)).unwrap();
        assert_eq!(sim.run(10).unwrap(), 3);
        assert_eq!(sim.status(), SimulationStatus::Stopped);
        assert!(matches!(sim.step(), Err(Error::Runtime(_))));
    }

    #[test]
    fn test_decayed_edges_deposit_mass() {
        let mut config = quiet_config(4);
        config.decay.rate = 0.5;
        config.decay.planck_threshold = 0.3;
        let mut sim = Simulation::new(config, ring(4, 0.5)).unwrap();
        let report = sim.step().unwrap();
        assert_eq!(report.decayed_edges, 4);
        assert!(report.conservation.is_conserved);
        assert_eq!(sim.graph().edge_count(), 0);
        let deposited: f64 = sim.graph().nodes().iter().map(|n| n.mass).sum();
        assert!((deposited - 2.0).abs() < 1e-12);
        // next step must rebuild against the emptied graph
        assert!(sim.step().unwrap().rebuilt_topology);
    }

    #[test]
    fn test_snapshot_frame_layout() {
        let mut sim = Simulation::new(quiet_config(5), ring(5, 0.9)).unwrap();
        sim.step().unwrap();
        let now = Utc::now();
        let frame = sim.snapshot_frame(now).unwrap();
        assert_eq!(frame.nodes.len(), 5);
        assert_eq!(frame.edges.len(), 5);
        assert_eq!(frame.header.iteration, 1);
        assert_eq!(frame.header.strong_edges, 5);
        assert_eq!(frame.header.largest_cluster, 5);
        assert_eq!(frame.header.last_update_ms, now.timestamp_millis());
        assert!(!frame.module_stats.is_empty());
        assert!(frame.encoded_len() <= sim.required_region_len());
    }

    #[test]
    fn test_node_color() {
        assert_eq!(node_color(1.0, 2.0, 0.25), [0.5, 0.25, 0.0]);
        assert_eq!(node_color(-2.0, 2.0, 4.0), [0.0, 1.0, 1.0]);
        assert_eq!(node_color(3.0, 0.0, 0.0), [0.0, 0.0, 0.0]);
    }
}
