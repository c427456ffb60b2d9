//! File-backed regions via memmap2.
//!
//! On Linux the default directory is `/dev/shm`, which makes the mapping a
//! POSIX shared-memory object visible to any process on the host.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};

use super::region::{check_range, RegionOpener, SharedRegion, WritableRegion};
use super::HEADER_SIZE;
use crate::{Error, Result};

enum Mapping {
    Writable(MmapMut),
    ReadOnly(Mmap),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Mapping::Writable(m) => &m[..],
            Mapping::ReadOnly(m) => &m[..],
        }
    }
}

pub struct MmapRegion {
    name: String,
    path: PathBuf,
    file: File,
    map: Mapping,
}

impl std::fmt::Debug for MmapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapRegion")
            .field("path", &self.path)
            .field("len", &self.map.bytes().len())
            .field("writable", &matches!(self.map, Mapping::Writable(_)))
            .finish()
    }
}

fn region_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl MmapRegion {
    /// Create the file, or reuse an existing one, with at least `len` bytes
    /// and map it writable. The header is zeroed so readers see an
    /// unpublished region until the first publish.
    ///
    /// An existing file is never shrunk: readers that still map the old
    /// length would fault on the pages cut off.
    pub fn create(path: impl AsRef<Path>, len: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;
        if file.metadata()?.len() < len as u64 {
            file.set_len(len as u64)?;
        }
        // SAFETY: only this writer resizes the file, and only upwards; other
        // processes map it read-only.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        let header = map.len().min(HEADER_SIZE);
        map[..header].fill(0);
        tracing::debug!(path = %path.display(), len = map.len(), "created snapshot region");
        Ok(Self { name: region_name(&path), path, file, map: Mapping::Writable(map) })
    }

    /// Map an existing file read-only. `Ok(None)` if it does not exist.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // SAFETY: the writer may change bytes underneath us; readers copy
        // out of the mapping and tolerate torn values.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Some(Self { name: region_name(&path), path, file, map: Mapping::ReadOnly(map) }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.map, Mapping::Writable(_))
    }
}

impl SharedRegion for MmapRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.map.bytes().len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let bytes = self.map.bytes();
        check_range(&self.name, bytes.len(), offset, buf.len())?;
        if let Mapping::ReadOnly(_) = self.map {
            // Pages past the current end of file fault; report them as EOF.
            let file_len = usize::try_from(self.file.metadata()?.len()).unwrap_or(usize::MAX);
            check_range(&self.name, file_len, offset, buf.len())?;
        }
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }
}

impl WritableRegion for MmapRegion {
    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let Mapping::Writable(map) = &mut self.map else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("region {} is mapped read-only", self.name),
            )));
        };
        check_range(&self.name, map.len(), offset, data.len())?;
        map[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Mapping::Writable(map) = &self.map {
            map.flush_async()?;
        }
        Ok(())
    }
}

/// Resolves region names to files in one directory.
#[derive(Debug, Clone)]
pub struct FileRegionOpener {
    dir: PathBuf,
}

impl Default for FileRegionOpener {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}

impl FileRegionOpener {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `/dev/shm` when present, the temp directory otherwise.
    pub fn default_dir() -> PathBuf {
        let shm = Path::new("/dev/shm");
        if shm.is_dir() { shm.to_path_buf() } else { std::env::temp_dir() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Writer-side helper: create the named region.
    pub fn create(&self, name: &str, len: usize) -> Result<MmapRegion> {
        MmapRegion::create(self.path_for(name), len)
    }
}

impl RegionOpener for FileRegionOpener {
    type Region = MmapRegion;

    fn open(&self, name: &str) -> Result<Option<MmapRegion>> {
        MmapRegion::open_read_only(self.path_for(name))
    }
}
