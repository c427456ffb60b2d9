//! Summary scalars for the snapshot header and per-stage timing.

use std::time::{Duration, Instant};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::compute::ComputeContext;
use crate::model::DenseGraph;
use crate::snapshot::{name_hash, ModuleStatsEntry, MAX_MODULE_STATS};
use crate::topology::SparseTopology;
use crate::Result;

/// Edges heavier than this count as strong.
pub const STRONG_EDGE_WEIGHT: f64 = 0.8;
/// Walk lengths used for the spectral dimension estimate.
const SPECTRAL_SHORT_WALK: usize = 4;
const SPECTRAL_LONG_WALK: usize = 16;
/// Source nodes sampled for the estimate.
const SPECTRAL_SAMPLES: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    /// Σ|ψ|².
    pub norm: f64,
    /// Nodes with |ψ|² above the uniform share 1/N.
    pub excited_nodes: usize,
    pub heavy_mass: f64,
    pub cluster_count: usize,
    pub largest_cluster: usize,
    pub strong_edges: usize,
    /// Mean binary entropy of the edge weights.
    pub entanglement: f64,
    /// Weighted neighbor correlation of the field, in [-1, 1].
    pub correlation: f64,
    pub spectral_dimension: f64,
}

impl SimulationMetrics {
    pub fn collect(ctx: &ComputeContext, graph: &DenseGraph, topology: &SparseTopology, field: &[f64]) -> Self {
        let nodes = graph.nodes();
        let n = nodes.len();

        let density: Vec<f64> = nodes.iter().map(|node| node.density()).collect();
        let norm = ctx.reduce_sum(&density);
        let uniform = if n == 0 { 0.0 } else { 1.0 / n as f64 };
        let excited_nodes = density.iter().filter(|&&d| d > uniform).count();
        let heavy_mass = nodes.iter().map(|node| node.mass).fold(0.0, f64::max);

        let (cluster_count, largest_cluster) = clusters(graph);

        let mut strong_edges = 0;
        let mut entropy_sum = 0.0;
        let mut edges = 0usize;
        let mut cross = 0.0;
        let mut squares = 0.0;
        for edge in graph.edges() {
            edges += 1;
            if edge.weight > STRONG_EDGE_WEIGHT {
                strong_edges += 1;
            }
            entropy_sum += binary_entropy(edge.weight);
            if let (Some(a), Some(b)) = (field.get(edge.from.index()), field.get(edge.to.index())) {
                cross += edge.weight * a * b;
                squares += edge.weight * 0.5 * (a * a + b * b);
            }
        }
        let entanglement = if edges == 0 { 0.0 } else { entropy_sum / edges as f64 };
        let correlation = if squares > 0.0 { (cross / squares).clamp(-1.0, 1.0) } else { 0.0 };

        Self {
            norm,
            excited_nodes,
            heavy_mass,
            cluster_count,
            largest_cluster,
            strong_edges,
            entanglement,
            correlation,
            spectral_dimension: spectral_dimension(topology),
        }
    }
}

/// −w ln w − (1−w) ln(1−w), 0 at the ends.
pub fn binary_entropy(w: f64) -> f64 {
    if !(w > 0.0 && w < 1.0) {
        return 0.0;
    }
    -w * w.ln() - (1.0 - w) * (1.0 - w).ln()
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Connected components: (count, size of the largest).
pub fn clusters(graph: &DenseGraph) -> (usize, usize) {
    let n = graph.node_count();
    let mut parent: Vec<usize> = (0..n).collect();
    for edge in graph.edges() {
        let a = find(&mut parent, edge.from.index());
        let b = find(&mut parent, edge.to.index());
        if a != b {
            parent[a.max(b)] = a.min(b);
        }
    }
    let mut sizes = vec![0usize; n];
    for i in 0..n {
        let root = find(&mut parent, i);
        sizes[root] += 1;
    }
    let count = sizes.iter().filter(|&&s| s > 0).count();
    (count, sizes.into_iter().max().unwrap_or(0))
}

/// Return probability of a lazy weighted random walk after `steps` steps.
fn return_probability(topology: &SparseTopology, source: usize, steps: usize) -> f64 {
    let n = topology.node_count();
    let mut p = vec![0.0; n];
    let mut next = vec![0.0; n];
    p[source] = 1.0;
    for _ in 0..steps {
        next.iter_mut().for_each(|v| *v = 0.0);
        for i in 0..n {
            if p[i] == 0.0 {
                continue;
            }
            let (nbrs, weights) = topology.row(i);
            let total: f64 = weights.iter().sum();
            if total <= 0.0 {
                next[i] += p[i];
                continue;
            }
            next[i] += 0.5 * p[i];
            for (&j, &w) in nbrs.iter().zip(weights) {
                next[j as usize] += 0.5 * p[i] * w / total;
            }
        }
        std::mem::swap(&mut p, &mut next);
    }
    p[source]
}

/// d_s = −2 · Δln P / Δln t between a short and a long walk, averaged
/// over up to `SPECTRAL_SAMPLES` evenly spaced non-isolated sources.
pub fn spectral_dimension(topology: &SparseTopology) -> f64 {
    let n = topology.node_count();
    if n == 0 {
        return 0.0;
    }
    let stride = (n / SPECTRAL_SAMPLES).max(1);
    let t1 = SPECTRAL_SHORT_WALK as f64;
    let t2 = SPECTRAL_LONG_WALK as f64;
    let estimates: Vec<f64> = (0..n)
        .step_by(stride)
        .take(SPECTRAL_SAMPLES)
        .filter(|&i| topology.degree(i) > 0)
        .filter_map(|i| {
            let p1 = return_probability(topology, i, SPECTRAL_SHORT_WALK);
            let p2 = return_probability(topology, i, SPECTRAL_LONG_WALK);
            (p1 > 0.0 && p2 > 0.0).then(|| -2.0 * (p2.ln() - p1.ln()) / (t2.ln() - t1.ln()))
        })
        .filter(|d| d.is_finite())
        .collect();
    if estimates.is_empty() {
        0.0
    } else {
        (estimates.iter().sum::<f64>() / estimates.len() as f64).max(0.0)
    }
}

// ============================================================================
// Stage timing
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct StageTotals {
    total: Duration,
    invocations: u64,
    errors: u64,
}

/// Accumulated timing per named pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct StageTimer {
    stages: HashMap<&'static str, StageTotals>,
}

impl StageTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: &'static str, elapsed: Duration, ok: bool) {
        let totals = self.stages.entry(stage).or_default();
        totals.total += elapsed;
        totals.invocations += 1;
        if !ok {
            totals.errors += 1;
        }
    }

    /// Run `f`, charging its duration and outcome to `stage`.
    pub fn time<T>(&mut self, stage: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let result = f();
        self.record(stage, start.elapsed(), result.is_ok());
        result
    }

    pub fn invocations(&self, stage: &str) -> u64 {
        self.stages.get(stage).map_or(0, |t| t.invocations)
    }

    /// Entries sorted by stage name, at most `MAX_MODULE_STATS`.
    pub fn entries(&self) -> Vec<ModuleStatsEntry> {
        let mut names: Vec<&&'static str> = self.stages.keys().collect();
        names.sort();
        names
            .into_iter()
            .take(MAX_MODULE_STATS)
            .map(|name| {
                let totals = self.stages[*name];
                let avg = if totals.invocations == 0 {
                    0.0
                } else {
                    totals.total.as_secs_f64() * 1e3 / totals.invocations as f64
                };
                ModuleStatsEntry {
                    name_hash: name_hash(name),
                    avg_duration_ms: avg,
                    invocations: totals.invocations as i64,
                    errors: totals.errors as i64,
                }
            })
            .collect()
    }
}
