//! In-process regions, for tests and single-process embedding.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use super::region::{check_range, RegionOpener, SharedRegion, WritableRegion};
use crate::Result;

/// Heap-backed region. Clones share the same bytes.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    name: Arc<str>,
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl MemoryRegion {
    pub fn new(name: &str, len: usize) -> Self {
        Self { name: Arc::from(name), bytes: Arc::new(RwLock::new(vec![0; len])) }
    }

    /// Copy of the whole region.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl SharedRegion for MemoryRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.bytes.read().len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.read();
        check_range(&self.name, bytes.len(), offset, buf.len())?;
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }
}

impl WritableRegion for MemoryRegion {
    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.write();
        check_range(&self.name, bytes.len(), offset, data.len())?;
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Name → region table standing in for the OS namespace.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    regions: Arc<RwLock<HashMap<String, MemoryRegion>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a zeroed region.
    pub fn create(&self, name: &str, len: usize) -> MemoryRegion {
        let region = MemoryRegion::new(name, len);
        self.regions.write().insert(name.to_string(), region.clone());
        region
    }

    pub fn remove(&self, name: &str) -> bool {
        self.regions.write().remove(name).is_some()
    }
}

impl RegionOpener for MemoryRegistry {
    type Region = MemoryRegion;

    fn open(&self, name: &str) -> Result<Option<MemoryRegion>> {
        Ok(self.regions.read().get(name).cloned())
    }
}
