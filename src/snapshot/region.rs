//! Named shared byte regions.
//!
//! The exporter owns a [`WritableRegion`]; readers only ever see a
//! [`SharedRegion`] handed out by a [`RegionOpener`], so the read side has
//! no write path at all.

use crate::{Error, Result};

/// A fixed-length byte region readable at arbitrary offsets.
pub trait SharedRegion: Send + Sync {
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `buf.len()` bytes starting at `offset`.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()>;
}

/// The writer side of a region.
pub trait WritableRegion: SharedRegion {
    fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Looks up regions by name.
pub trait RegionOpener {
    type Region: SharedRegion;

    /// `Ok(None)` when no region with that name exists yet.
    fn open(&self, name: &str) -> Result<Option<Self::Region>>;
}

/// Range check shared by the region implementations.
pub(crate) fn check_range(region: &str, len: usize, offset: usize, count: usize) -> Result<()> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("region {region}: range {offset}+{count} exceeds length {len}"),
        ))),
    }
}
