//! Reader side of the snapshot protocol.
//!
//! ```text
//!   Disconnected ──connect() finds region──▶ Connected
//!        ▲                                      │
//!        └────── disconnect() / read error ─────┘
//! ```
//!
//! Reads are uncoordinated with the writer. Counts and offsets that are
//! non-positive, above the caps, or outside the mapped length are treated
//! as "no data" rather than errors, since they are what a torn read looks
//! like.

use serde::{Deserialize, Serialize};

use super::region::{RegionOpener, SharedRegion};
use super::{
    EdgeRecord, ModuleStatsEntry, NodeRecord, SnapshotFrame, SnapshotHeader, EDGE_RECORD_SIZE, HEADER_SIZE,
    MAX_EDGES, MAX_MODULE_STATS, MAX_NODES, MODULE_STATS_RECORD_SIZE, NODE_RECORD_SIZE,
};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderState {
    Disconnected,
    Connected,
}

pub struct SnapshotReader<O: RegionOpener> {
    opener: O,
    name: String,
    region: Option<O::Region>,
}

impl<O: RegionOpener> SnapshotReader<O> {
    pub fn new(opener: O, name: impl Into<String>) -> Self {
        Self { opener, name: name.into(), region: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ReaderState {
        if self.region.is_some() { ReaderState::Connected } else { ReaderState::Disconnected }
    }

    pub fn is_connected(&self) -> bool {
        self.region.is_some()
    }

    /// Try to attach. `Ok(false)` when the region does not exist yet; any
    /// other failure leaves the reader disconnected and is returned.
    pub fn connect(&mut self) -> Result<bool> {
        if self.region.is_some() {
            return Ok(true);
        }
        match self.opener.open(&self.name)? {
            Some(region) => {
                tracing::debug!(region = %self.name, len = region.len(), "snapshot reader connected");
                self.region = Some(region);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn disconnect(&mut self) {
        if self.region.take().is_some() {
            tracing::debug!(region = %self.name, "snapshot reader disconnected");
        }
    }

    fn read_bytes(&mut self, offset: usize, len: usize) -> Result<Option<Vec<u8>>> {
        let Some(region) = &self.region else {
            return Ok(None);
        };
        let mut buf = vec![0u8; len];
        if let Err(e) = region.read_at(offset, &mut buf) {
            tracing::debug!(region = %self.name, error = %e, "snapshot read failed");
            self.disconnect();
            return Err(e);
        }
        Ok(Some(buf))
    }

    /// Byte range of an array, or `None` if the header values are unusable.
    fn array_range(&self, offset: i64, count: i32, cap: usize, record: usize) -> Option<(usize, usize)> {
        let region_len = self.region.as_ref()?.len();
        if offset <= 0 || count <= 0 || count as usize > cap {
            return None;
        }
        let offset = usize::try_from(offset).ok()?;
        let len = count as usize * record;
        let end = offset.checked_add(len)?;
        (end <= region_len).then_some((offset, len))
    }

    /// `Ok(None)` when disconnected or nothing was published yet.
    pub fn read_header(&mut self) -> Result<Option<SnapshotHeader>> {
        if self.region.as_ref().is_some_and(|r| r.len() < HEADER_SIZE) {
            return Ok(None);
        }
        match self.read_bytes(0, HEADER_SIZE)? {
            Some(bytes) => SnapshotHeader::decode(&bytes),
            None => Ok(None),
        }
    }

    pub fn read_nodes(&mut self, header: &SnapshotHeader) -> Result<Vec<NodeRecord>> {
        let Some((offset, len)) = self.array_range(HEADER_SIZE as i64, header.node_count, MAX_NODES, NODE_RECORD_SIZE)
        else {
            return Ok(Vec::new());
        };
        let Some(bytes) = self.read_bytes(offset, len)? else {
            return Ok(Vec::new());
        };
        let mut buf = bytes.as_slice();
        Ok((0..header.node_count).map(|_| NodeRecord::decode(&mut buf)).collect())
    }

    pub fn read_edges(&mut self, header: &SnapshotHeader) -> Result<Vec<EdgeRecord>> {
        let Some((offset, len)) = self.array_range(header.edge_offset, header.edge_count, MAX_EDGES, EDGE_RECORD_SIZE)
        else {
            return Ok(Vec::new());
        };
        let Some(bytes) = self.read_bytes(offset, len)? else {
            return Ok(Vec::new());
        };
        let mut buf = bytes.as_slice();
        Ok((0..header.edge_count).map(|_| EdgeRecord::decode(&mut buf)).collect())
    }

    pub fn read_module_stats(&mut self, header: &SnapshotHeader) -> Result<Vec<ModuleStatsEntry>> {
        let Some((offset, len)) = self.array_range(
            header.module_stats_offset,
            header.module_stats_count,
            MAX_MODULE_STATS,
            MODULE_STATS_RECORD_SIZE,
        ) else {
            return Ok(Vec::new());
        };
        let Some(bytes) = self.read_bytes(offset, len)? else {
            return Ok(Vec::new());
        };
        let mut buf = bytes.as_slice();
        Ok((0..header.module_stats_count).map(|_| ModuleStatsEntry::decode(&mut buf)).collect())
    }

    /// Header plus every array it announces.
    pub fn read_frame(&mut self) -> Result<Option<SnapshotFrame>> {
        let Some(header) = self.read_header()? else {
            return Ok(None);
        };
        let nodes = self.read_nodes(&header)?;
        let edges = self.read_edges(&header)?;
        let module_stats = self.read_module_stats(&header)?;
        Ok(Some(SnapshotFrame { header, nodes, edges, module_stats }))
    }
}
