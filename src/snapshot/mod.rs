//! # Snapshot Protocol
//!
//! Binary layout of the shared region the engine publishes into, plus the
//! encode/decode routines both sides use. Nothing here relies on in-memory
//! struct layout: every field is written explicitly, little-endian.
//!
//! ```text
//! offset 0             header (HEADER_SIZE bytes, zero-padded)
//! offset HEADER_SIZE   node records     (node_count × 28)
//! header.edge_offset   edge records     (edge_count × 12)
//! header.module_stats_offset
//!                      module stats     (module_stats_count × 28, ≤ 32)
//! ```
//!
//! Header field order (the byte contract):
//!
//! | Field | Type |
//! |-------|------|
//! | magic, schema_version | u32, u32 |
//! | iteration | i64 |
//! | node_count, edge_count | i32, i32 |
//! | system_energy | f64 |
//! | status | i32 |
//! | last_update_ms | i64 |
//! | cluster_count, busy_workers, total_workers | i32 ×3 |
//! | spectral_dimension, latest_energy | f64 ×2 |
//! | excited_nodes | i32 |
//! | heavy_mass | f64 |
//! | largest_cluster, strong_edges | i32 ×2 |
//! | norm, entanglement, correlation, temperature, effective_coupling | f64 ×5 |
//! | total_steps | i64 |
//! | edge_offset | i64 |
//! | module_stats_count | i32 |
//! | module_stats_offset | i64 |
//!
//! There is no lock between writer and reader: a read may tear across a
//! concurrent publish. The iteration counter orders snapshots; the
//! timestamp only detects a writer that stopped publishing.

pub mod region;
pub mod memory;
pub mod mmap;
pub mod exporter;
pub mod reader;

use bytes::{Buf, BufMut};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use region::{RegionOpener, SharedRegion, WritableRegion};
pub use memory::{MemoryRegion, MemoryRegistry};
pub use mmap::{FileRegionOpener, MmapRegion};
pub use exporter::SnapshotExporter;
pub use reader::{ReaderState, SnapshotReader};

// ============================================================================
// Constants
// ============================================================================

/// Process-wide well-known region name.
pub const DEFAULT_REGION_NAME: &str = "spacetime-rs.snapshot";

/// "STG1"
pub const SNAPSHOT_MAGIC: u32 = 0x5354_4731;
pub const SCHEMA_VERSION: u32 = 1;

pub const HEADER_SIZE: usize = 256;
pub const NODE_RECORD_SIZE: usize = 28;
pub const EDGE_RECORD_SIZE: usize = 12;
pub const MODULE_STATS_RECORD_SIZE: usize = 28;

pub const MAX_MODULE_STATS: usize = 32;
/// Counts above these caps are treated as absent by readers.
pub const MAX_NODES: usize = 1 << 24;
pub const MAX_EDGES: usize = 1 << 27;

/// Encoded size of the header fields before padding.
const HEADER_FIELDS_SIZE: usize = 160;

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SimulationStatus {
    #[default]
    Unknown,
    Running,
    Paused,
    Stopped,
    Faulted,
}

impl SimulationStatus {
    pub fn code(self) -> i32 {
        match self {
            SimulationStatus::Unknown => 0,
            SimulationStatus::Running => 1,
            SimulationStatus::Paused => 2,
            SimulationStatus::Stopped => 3,
            SimulationStatus::Faulted => 4,
        }
    }

    /// Unrecognized codes map to `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => SimulationStatus::Running,
            2 => SimulationStatus::Paused,
            3 => SimulationStatus::Stopped,
            4 => SimulationStatus::Faulted,
            _ => SimulationStatus::Unknown,
        }
    }
}

// ============================================================================
// Header
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub iteration: i64,
    pub node_count: i32,
    pub edge_count: i32,
    pub system_energy: f64,
    pub status: SimulationStatus,
    /// Unix milliseconds of the last publish.
    pub last_update_ms: i64,
    pub cluster_count: i32,
    pub busy_workers: i32,
    pub total_workers: i32,
    pub spectral_dimension: f64,
    pub latest_energy: f64,
    pub excited_nodes: i32,
    pub heavy_mass: f64,
    pub largest_cluster: i32,
    pub strong_edges: i32,
    pub norm: f64,
    pub entanglement: f64,
    pub correlation: f64,
    pub temperature: f64,
    pub effective_coupling: f64,
    pub total_steps: i64,
    pub edge_offset: i64,
    pub module_stats_count: i32,
    pub module_stats_offset: i64,
}

impl SnapshotHeader {
    /// Writes exactly `HEADER_SIZE` bytes.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(SNAPSHOT_MAGIC);
        buf.put_u32_le(SCHEMA_VERSION);
        buf.put_i64_le(self.iteration);
        buf.put_i32_le(self.node_count);
        buf.put_i32_le(self.edge_count);
        buf.put_f64_le(self.system_energy);
        buf.put_i32_le(self.status.code());
        buf.put_i64_le(self.last_update_ms);
        buf.put_i32_le(self.cluster_count);
        buf.put_i32_le(self.busy_workers);
        buf.put_i32_le(self.total_workers);
        buf.put_f64_le(self.spectral_dimension);
        buf.put_f64_le(self.latest_energy);
        buf.put_i32_le(self.excited_nodes);
        buf.put_f64_le(self.heavy_mass);
        buf.put_i32_le(self.largest_cluster);
        buf.put_i32_le(self.strong_edges);
        buf.put_f64_le(self.norm);
        buf.put_f64_le(self.entanglement);
        buf.put_f64_le(self.correlation);
        buf.put_f64_le(self.temperature);
        buf.put_f64_le(self.effective_coupling);
        buf.put_i64_le(self.total_steps);
        buf.put_i64_le(self.edge_offset);
        buf.put_i32_le(self.module_stats_count);
        buf.put_i64_le(self.module_stats_offset);
        buf.put_bytes(0, HEADER_SIZE - HEADER_FIELDS_SIZE);
    }

    /// Decode a header. A region that was never written (magic 0) yields
    /// `Ok(None)`; a foreign magic or schema version is an error.
    pub fn decode(mut buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Snapshot(format!(
                "header needs {HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        let magic = buf.get_u32_le();
        if magic == 0 {
            return Ok(None);
        }
        if magic != SNAPSHOT_MAGIC {
            return Err(Error::Snapshot(format!("bad magic {magic:#010x}")));
        }
        let version = buf.get_u32_le();
        if version != SCHEMA_VERSION {
            return Err(Error::Snapshot(format!(
                "schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }
        Ok(Some(Self {
            iteration: buf.get_i64_le(),
            node_count: buf.get_i32_le(),
            edge_count: buf.get_i32_le(),
            system_energy: buf.get_f64_le(),
            status: SimulationStatus::from_code(buf.get_i32_le()),
            last_update_ms: buf.get_i64_le(),
            cluster_count: buf.get_i32_le(),
            busy_workers: buf.get_i32_le(),
            total_workers: buf.get_i32_le(),
            spectral_dimension: buf.get_f64_le(),
            latest_energy: buf.get_f64_le(),
            excited_nodes: buf.get_i32_le(),
            heavy_mass: buf.get_f64_le(),
            largest_cluster: buf.get_i32_le(),
            strong_edges: buf.get_i32_le(),
            norm: buf.get_f64_le(),
            entanglement: buf.get_f64_le(),
            correlation: buf.get_f64_le(),
            temperature: buf.get_f64_le(),
            effective_coupling: buf.get_f64_le(),
            total_steps: buf.get_i64_le(),
            edge_offset: buf.get_i64_le(),
            module_stats_count: buf.get_i32_le(),
            module_stats_offset: buf.get_i64_le(),
        }))
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.last_update_ms)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_update_ms = now.timestamp_millis();
    }

    /// Stale when strictly older than `max_age` at `now`. A header with no
    /// usable timestamp is stale.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: TimeDelta) -> bool {
        match self.last_update() {
            Some(last) => now - last > max_age,
            None => true,
        }
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeRecord {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub id: i32,
}

impl NodeRecord {
    pub fn encode(&self, buf: &mut impl BufMut) {
        for v in self.position.iter().chain(&self.color) {
            buf.put_f32_le(*v);
        }
        buf.put_i32_le(self.id);
    }

    /// Caller guarantees `NODE_RECORD_SIZE` remaining bytes.
    pub fn decode(buf: &mut impl Buf) -> Self {
        let position = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
        let color = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
        Self { position, color, id: buf.get_i32_le() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: i32,
    pub to: i32,
    pub weight: f32,
}

impl EdgeRecord {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.from);
        buf.put_i32_le(self.to);
        buf.put_f32_le(self.weight);
    }

    pub fn decode(buf: &mut impl Buf) -> Self {
        Self { from: buf.get_i32_le(), to: buf.get_i32_le(), weight: buf.get_f32_le() }
    }
}

/// Timing of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleStatsEntry {
    pub name_hash: i32,
    pub avg_duration_ms: f64,
    pub invocations: i64,
    pub errors: i64,
}

impl ModuleStatsEntry {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.name_hash);
        buf.put_f64_le(self.avg_duration_ms);
        buf.put_i64_le(self.invocations);
        buf.put_i64_le(self.errors);
    }

    pub fn decode(buf: &mut impl Buf) -> Self {
        Self {
            name_hash: buf.get_i32_le(),
            avg_duration_ms: buf.get_f64_le(),
            invocations: buf.get_i64_le(),
            errors: buf.get_i64_le(),
        }
    }
}

/// FNV-1a (32 bit) of a stage name, as stored in `ModuleStatsEntry`.
pub fn name_hash(name: &str) -> i32 {
    let mut hash: u32 = 0x811C_9DC5;
    for byte in name.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash as i32
}

// ============================================================================
// Frame
// ============================================================================

/// Everything one publish writes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotFrame {
    pub header: SnapshotHeader,
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
    pub module_stats: Vec<ModuleStatsEntry>,
}

/// Bytes needed for a frame with the given array lengths.
pub fn required_capacity(nodes: usize, edges: usize, module_stats: usize) -> usize {
    HEADER_SIZE
        + nodes * NODE_RECORD_SIZE
        + edges * EDGE_RECORD_SIZE
        + module_stats.min(MAX_MODULE_STATS) * MODULE_STATS_RECORD_SIZE
}

impl SnapshotFrame {
    /// Cap module stats and fill the header's counts and offsets.
    pub fn finalize(mut self) -> Self {
        self.module_stats.truncate(MAX_MODULE_STATS);
        let edge_offset = HEADER_SIZE + self.nodes.len() * NODE_RECORD_SIZE;
        let stats_offset = edge_offset + self.edges.len() * EDGE_RECORD_SIZE;
        self.header.node_count = self.nodes.len() as i32;
        self.header.edge_count = self.edges.len() as i32;
        self.header.edge_offset = edge_offset as i64;
        self.header.module_stats_count = self.module_stats.len() as i32;
        self.header.module_stats_offset = if self.module_stats.is_empty() { 0 } else { stats_offset as i64 };
        self
    }

    pub fn encoded_len(&self) -> usize {
        required_capacity(self.nodes.len(), self.edges.len(), self.module_stats.len())
    }
}
