//! End-to-end tests for the snapshot protocol: exporter → region → reader,
//! over in-process and memory-mapped regions.

use chrono::{DateTime, TimeDelta, Utc};
use pretty_assertions::assert_eq;
use spacetime_rs::snapshot::{
    required_capacity, EdgeRecord, FileRegionOpener, MemoryRegion, MemoryRegistry, ModuleStatsEntry, NodeRecord,
    ReaderState, RegionOpener, SharedRegion, SimulationStatus, SnapshotExporter, SnapshotFrame, SnapshotHeader,
    SnapshotReader, DEFAULT_REGION_NAME, HEADER_SIZE,
};
use spacetime_rs::{Error, Result};

fn sample_frame() -> SnapshotFrame {
    let header = SnapshotHeader {
        iteration: 42,
        system_energy: 1.25,
        status: SimulationStatus::Running,
        last_update_ms: 1_700_000_000_123,
        cluster_count: 2,
        busy_workers: 4,
        total_workers: 8,
        spectral_dimension: 3.5,
        latest_energy: 0.75,
        excited_nodes: 1,
        heavy_mass: 2.0,
        largest_cluster: 2,
        strong_edges: 1,
        norm: 1.0,
        entanglement: 0.5,
        correlation: -0.25,
        temperature: 0.125,
        effective_coupling: 0.875,
        total_steps: 1000,
        ..Default::default()
    };
    SnapshotFrame {
        header,
        nodes: vec![
            NodeRecord { position: [0.0, 1.0, 2.0], color: [1.0, 0.0, 0.0], id: 0 },
            NodeRecord { position: [-1.5, 0.5, 0.25], color: [0.0, 0.5, 1.0], id: 1 },
            NodeRecord { position: [3.0, 3.0, 3.0], color: [0.25, 0.25, 0.25], id: 2 },
        ],
        edges: vec![EdgeRecord { from: 0, to: 1, weight: 0.9 }, EdgeRecord { from: 1, to: 2, weight: 0.125 }],
        module_stats: vec![
            ModuleStatsEntry { name_hash: 17, avg_duration_ms: 0.5, invocations: 10, errors: 0 },
            ModuleStatsEntry { name_hash: -3, avg_duration_ms: 2.25, invocations: 4, errors: 1 },
        ],
    }
    .finalize()
}

// ============================================================================
// 1. Round trip
// ============================================================================

#[test]
fn test_round_trip_is_byte_identical() {
    let frame = sample_frame();
    let len = required_capacity(3, 2, 2);
    let registry = MemoryRegistry::new();
    let first = registry.create("first", len);
    SnapshotExporter::new(first.clone()).publish(frame.clone()).unwrap();

    let mut reader = SnapshotReader::new(registry.clone(), "first");
    assert!(reader.connect().unwrap());
    let read = reader.read_frame().unwrap().unwrap();
    assert_eq!(read, frame);

    let second = registry.create("second", len);
    SnapshotExporter::new(second.clone()).publish(read).unwrap();
    assert_eq!(first.to_vec(), second.to_vec());
}

#[test]
fn test_frame_without_module_stats() {
    let mut frame = sample_frame();
    frame.module_stats.clear();
    let frame = frame.finalize();
    assert_eq!(frame.header.module_stats_offset, 0);

    let registry = MemoryRegistry::new();
    let region = registry.create(DEFAULT_REGION_NAME, required_capacity(3, 2, 0));
    SnapshotExporter::new(region).publish(frame.clone()).unwrap();

    let mut reader = SnapshotReader::new(registry, DEFAULT_REGION_NAME);
    reader.connect().unwrap();
    assert_eq!(reader.read_frame().unwrap().unwrap(), frame);
}

#[test]
fn test_memory_mapped_round_trip() {
    let dir = std::env::temp_dir().join(format!("spacetime-rs-e2e-snapshot-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let opener = FileRegionOpener::new(&dir);

    let mut reader = SnapshotReader::new(opener.clone(), "feed");
    assert!(!reader.connect().unwrap());

    let region = opener.create("feed", required_capacity(3, 2, 2)).unwrap();
    let mut exporter = SnapshotExporter::new(region);
    exporter.publish(sample_frame()).unwrap();

    assert!(reader.connect().unwrap());
    assert_eq!(reader.read_frame().unwrap().unwrap(), sample_frame());

    let mut next = sample_frame();
    next.header.iteration = 43;
    exporter.publish(next).unwrap();
    assert_eq!(reader.read_header().unwrap().unwrap().iteration, 43);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_writer_restart_with_smaller_region() {
    let dir = std::env::temp_dir().join(format!("spacetime-rs-e2e-restart-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let opener = FileRegionOpener::new(&dir);

    let mut exporter = SnapshotExporter::new(opener.create("feed", 64 * 1024).unwrap());
    exporter.publish(sample_frame()).unwrap();
    let mut reader = SnapshotReader::new(opener.clone(), "feed");
    assert!(reader.connect().unwrap());
    assert_eq!(reader.read_frame().unwrap().unwrap(), sample_frame());

    // Restarted writer asks for less space; the live mapping stays readable
    // and shows an unpublished region until the next publish.
    let mut restarted = SnapshotExporter::new(opener.create("feed", 4096).unwrap());
    assert!(reader.read_frame().unwrap().is_none());
    assert!(reader.is_connected());

    restarted.publish(sample_frame()).unwrap();
    assert_eq!(reader.read_frame().unwrap().unwrap(), sample_frame());

    std::fs::remove_dir_all(&dir).unwrap();
}

// ============================================================================
// 2. Staleness
// ============================================================================

#[test]
fn test_staleness_boundary() {
    let header = sample_frame().header;
    let last: DateTime<Utc> = header.last_update().unwrap();
    let max_age = TimeDelta::milliseconds(500);

    assert!(!header.is_stale(last, max_age));
    assert!(!header.is_stale(last + max_age, max_age));
    assert!(header.is_stale(last + max_age + TimeDelta::milliseconds(1), max_age));
}

// ============================================================================
// 3. Reader state machine
// ============================================================================

struct FlakyRegion;

impl SharedRegion for FlakyRegion {
    fn name(&self) -> &str {
        "flaky"
    }

    fn len(&self) -> usize {
        HEADER_SIZE
    }

    fn read_at(&self, _offset: usize, _buf: &mut [u8]) -> Result<()> {
        Err(Error::Io(std::io::Error::other("device went away")))
    }
}

struct FlakyOpener;

impl RegionOpener for FlakyOpener {
    type Region = FlakyRegion;

    fn open(&self, _name: &str) -> Result<Option<FlakyRegion>> {
        Ok(Some(FlakyRegion))
    }
}

#[test]
fn test_io_failure_disconnects() {
    let mut reader = SnapshotReader::new(FlakyOpener, "flaky");
    assert!(reader.connect().unwrap());
    assert_eq!(reader.state(), ReaderState::Connected);

    assert!(matches!(reader.read_header(), Err(Error::Io(_))));
    assert_eq!(reader.state(), ReaderState::Disconnected);

    // reconnection is up to the caller
    assert!(reader.connect().unwrap());
    assert_eq!(reader.state(), ReaderState::Connected);
}

#[test]
fn test_undersized_region_reads_nothing() {
    let registry = MemoryRegistry::new();
    registry.create("tiny", 16);
    let mut reader = SnapshotReader::new(registry, "tiny");
    assert!(reader.connect().unwrap());
    assert!(reader.read_frame().unwrap().is_none());
}

#[test]
fn test_foreign_schema_is_an_error() {
    let registry = MemoryRegistry::new();
    let region: MemoryRegion = registry.create("foreign", HEADER_SIZE);
    let mut exporter = SnapshotExporter::new(region);
    exporter.publish(SnapshotFrame::default()).unwrap();
    let mut region = exporter.into_region();
    spacetime_rs::snapshot::WritableRegion::write_at(&mut region, 4, &99u32.to_le_bytes()).unwrap();

    let mut reader = SnapshotReader::new(registry, "foreign");
    reader.connect().unwrap();
    assert!(matches!(reader.read_header(), Err(Error::Snapshot(_))));
    assert!(reader.is_connected());
}
