//! Format registry: extension dispatch, fallback and decode caching.
//!
//! The registry provides:
//! - An extension → reader table where the most recent registration wins
//! - A fallback reader for unknown extensions, so resolution never fails
//! - A decode cache for whole-file reads, keyed by location string
//! - Singleflight population of that cache: concurrent first reads of the
//!   same location decode once
//!
//! # Example
//!
//! ```no_run
//! use em_imageio::Registry;
//!
//! let registry = Registry::with_defaults();
//! let stack = registry.open("particles.mrcs")?;
//! println!("{} frames", stack.len());
//! # Ok::<(), em_imageio::ImageError>(())
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::Result;
use crate::format::{
    ExternalReader, ExternalTool, MrcReader, MultiPageReader, SimpleImageReader, SpiderReader,
};
use crate::location::{extension_of, IntoLocation, Location};
use crate::stack::ImageStack;

use super::cache::DecodeCache;
use super::reader::FormatReader;

// =============================================================================
// Registry
// =============================================================================

/// Registered readers in registration order plus the dispatch table.
#[derive(Default)]
struct ReaderTable {
    by_extension: HashMap<String, Arc<dyn FormatReader>>,
    order: Vec<Arc<dyn FormatReader>>,
}

/// State for an in-flight decode.
struct InFlight {
    result: Mutex<Option<Result<Arc<ImageStack>>>>,
    done: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, result: Result<Arc<ImageStack>>) {
        *lock(&self.result) = Some(result);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<Arc<ImageStack>> {
        let mut guard = lock(&self.result);
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = self
                .done
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Extension-dispatching front end over a set of [`FormatReader`]s.
pub struct Registry {
    table: RwLock<ReaderTable>,
    fallback: Arc<dyn FormatReader>,
    cache: DecodeCache,
    in_flight: Mutex<HashMap<String, Arc<InFlight>>>,
}

impl Registry {
    /// Create an empty registry that resolves everything to `fallback`.
    pub fn new(fallback: Arc<dyn FormatReader>) -> Self {
        Self {
            table: RwLock::new(ReaderTable::default()),
            fallback,
            cache: DecodeCache::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with the built-in codecs and no external collaborator.
    pub fn with_defaults() -> Self {
        Self::with_external_tool(None)
    }

    /// Registry with the built-in codecs.
    ///
    /// Registration order is MRC, SPIDER, external, simple image, multi-page,
    /// so later codecs win on shared extensions. MRC is the fallback.
    pub fn with_external_tool(tool: Option<Arc<dyn ExternalTool>>) -> Self {
        let mrc: Arc<dyn FormatReader> = Arc::new(MrcReader::new());
        let registry = Self::new(mrc.clone());
        registry.register(mrc);
        registry.register(Arc::new(SpiderReader::new()));
        registry.register(Arc::new(ExternalReader::new(tool)));
        registry.register(Arc::new(SimpleImageReader::new()));
        registry.register(Arc::new(MultiPageReader::new()));
        registry
    }

    /// Bound the decode cache to `capacity` stacks (zero = unbounded).
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = DecodeCache::with_capacity(capacity);
        self
    }

    /// Register `reader` for each of its extensions, replacing earlier entries.
    pub fn register(&self, reader: Arc<dyn FormatReader>) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        for ext in reader.supported_extensions() {
            let ext = ext.to_ascii_lowercase();
            if let Some(previous) = table.by_extension.insert(ext.clone(), reader.clone()) {
                debug!(
                    "Extension '{}' moved from {} to {}",
                    ext,
                    previous.name(),
                    reader.name()
                );
            }
        }
        debug!("Registered {} reader", reader.name());
        table.order.push(reader);
    }

    /// Reader for `path`'s extension, or the fallback. Never fails.
    pub fn resolve(&self, path: &str) -> Arc<dyn FormatReader> {
        let ext = extension_of(path);
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(reader) = ext.as_deref().and_then(|ext| table.by_extension.get(ext)) {
            return reader.clone();
        }

        warn!(
            "No reader registered for '{}', using {}",
            path,
            self.fallback.name()
        );
        self.fallback.clone()
    }

    /// Reader for a location's (hint-stripped) path.
    pub fn resolve_location(&self, location: &Location) -> Arc<dyn FormatReader> {
        self.resolve(location.path())
    }

    /// Decode `location`, memoized by its literal address string.
    ///
    /// Concurrent callers asking for the same uncached location wait for a
    /// single decode and share its result.
    pub fn open<L: IntoLocation>(&self, location: L) -> Result<Arc<ImageStack>> {
        let location = location.into_location()?;
        let key = location.to_address_string();

        // Fast path: check cache
        if let Some(stack) = self.cache.get(&key) {
            debug!("Decode cache hit for {}", key);
            return Ok(stack);
        }

        // Slow path: join an in-flight decode or become its leader
        let state = {
            let mut in_flight = lock(&self.in_flight);

            // A leader may have finished since the fast path
            if let Some(stack) = self.cache.get(&key) {
                return Ok(stack);
            }

            if let Some(state) = in_flight.get(&key) {
                Some(state.clone())
            } else {
                in_flight.insert(key.clone(), Arc::new(InFlight::new()));
                None
            }
        };

        if let Some(state) = state {
            debug!("Waiting for in-flight decode of {}", key);
            return state.wait();
        }

        debug!("Decode cache miss for {}", key);
        let result = self
            .resolve_location(&location)
            .open(&location)
            .map(Arc::new);

        if let Ok(stack) = &result {
            self.cache.put(key.clone(), stack.clone());
        }

        let state = lock(&self.in_flight).remove(&key);
        if let Some(state) = state {
            state.complete(result.clone());
        }

        result
    }

    /// Encode `stack` to `path` through its resolved reader. Not cached.
    pub fn write(&self, stack: &ImageStack, path: &str, is_stack: bool) -> Result<()> {
        let location = Location::new(path);
        self.resolve(location.path())
            .write(stack, location.path(), is_stack)
    }

    /// Registered readers, in registration order.
    pub fn readers(&self) -> Vec<Arc<dyn FormatReader>> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone()
    }

    pub fn fallback(&self) -> Arc<dyn FormatReader> {
        self.fallback.clone()
    }

    /// Number of decoded stacks held by the cache.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Drop the cached decode of `location`, if any.
    pub fn evict<L: IntoLocation>(&self, location: L) -> Result<bool> {
        let location = location.into_location()?;
        Ok(self.cache.remove(&location.to_address_string()))
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Clear the decode cache and release every reader's resources.
    pub fn close(&self) {
        self.clear_cache();
        let readers = self.readers();
        for reader in &readers {
            reader.close();
        }
        if !readers.iter().any(|r| Arc::ptr_eq(r, &self.fallback)) {
            self.fallback.close();
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Tests
// =============================================================================
