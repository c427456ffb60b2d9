//! Writer side of the snapshot protocol.

use bytes::BytesMut;

use super::region::WritableRegion;
use super::{SnapshotFrame, HEADER_SIZE};
use crate::{Error, Result};

/// Sole writer of one region.
#[derive(Debug)]
pub struct SnapshotExporter<R: WritableRegion> {
    region: R,
    publishes: u64,
    scratch: BytesMut,
}

impl<R: WritableRegion> SnapshotExporter<R> {
    pub fn new(region: R) -> Self {
        Self { region, publishes: 0, scratch: BytesMut::new() }
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn into_region(self) -> R {
        self.region
    }

    pub fn publish_count(&self) -> u64 {
        self.publishes
    }

    /// Write one frame: header, then nodes, edges and module stats at the
    /// offsets the header announces. The frame is finalized first, so
    /// callers need not fill counts or offsets.
    pub fn publish(&mut self, frame: SnapshotFrame) -> Result<()> {
        let frame = frame.finalize();
        let needed = frame.encoded_len();
        if needed > self.region.len() {
            return Err(Error::Snapshot(format!(
                "frame needs {needed} bytes, region {} has {}",
                self.region.name(),
                self.region.len()
            )));
        }

        self.scratch.clear();
        frame.header.encode(&mut self.scratch);
        self.region.write_at(0, &self.scratch)?;

        self.scratch.clear();
        for node in &frame.nodes {
            node.encode(&mut self.scratch);
        }
        self.region.write_at(HEADER_SIZE, &self.scratch)?;

        self.scratch.clear();
        for edge in &frame.edges {
            edge.encode(&mut self.scratch);
        }
        self.region.write_at(frame.header.edge_offset as usize, &self.scratch)?;

        if !frame.module_stats.is_empty() {
            self.scratch.clear();
            for entry in &frame.module_stats {
                entry.encode(&mut self.scratch);
            }
            self.region.write_at(frame.header.module_stats_offset as usize, &self.scratch)?;
        }

        self.region.flush()?;
        self.publishes += 1;
        tracing::trace!(
            iteration = frame.header.iteration,
            nodes = frame.nodes.len(),
            edges = frame.edges.len(),
            "published snapshot"
        );
        Ok(())
    }
}
