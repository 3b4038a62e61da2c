use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use memmap2::Mmap;
use tracing::debug;

use crate::error::{ImageError, Result};

/// A read-only memory map of a whole file.
pub struct MappedFile {
    path: PathBuf,
    map: Mmap,
}

impl MappedFile {
    pub fn open(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|e| ImageError::io(&display, e))?;
        let map = unsafe { Mmap::map(&file) }.map_err(|e| ImageError::io(&display, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Per-filename cache of memory maps.
///
/// Repeated single-frame reads of the same file share one mapping. The lock
/// is held while a missing file is mapped, so each path is mapped at most
/// once even under concurrent first access. Handles live until
/// [`MapCache::invalidate`] or [`MapCache::clear`].
#[derive(Default)]
pub struct MapCache {
    handles: Mutex<HashMap<PathBuf, Arc<MappedFile>>>,
}

impl MapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached mapping of `path`, mapping it on first use.
    pub fn get_or_map(&self, path: &Path) -> Result<Arc<MappedFile>> {
        let mut handles = self.lock();
        if let Some(mapped) = handles.get(path) {
            return Ok(mapped.clone());
        }

        let mapped = Arc::new(MappedFile::open(path)?);
        debug!("Mapped {} ({} bytes)", path.display(), mapped.len());
        handles.insert(path.to_path_buf(), mapped.clone());
        Ok(mapped)
    }

    /// Drop the mapping of `path`, if any. Callers still holding it keep a valid map.
    pub fn invalidate(&self, path: &Path) {
        if self.lock().remove(path).is_some() {
            debug!("Dropped mapping of {}", path.display());
        }
    }

    /// Drop every mapping.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<MappedFile>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
