//! LRU cache of classified tiles.

use lru::LruCache;
use pixclass_algorithms::ClassifiedRegion;
use pixclass_core::{Error, Result};
use pixclass_parallel::TileId;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// State of one tile in the cache.
#[derive(Debug, Clone)]
pub enum TileCell {
    /// Scheduled, result not yet applied
    Pending,
    Ready(Arc<ClassifiedRegion>),
    /// Computation failed; the next request schedules it again
    Failed(String),
}

impl TileCell {
    pub fn is_pending(&self) -> bool {
        matches!(self, TileCell::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, TileCell::Ready(_))
    }
}

/// LRU cache of tile cells, owned by exactly one overlay.
#[derive(Debug)]
pub struct TileCache {
    inner: LruCache<TileId, TileCell>,
}

impl TileCache {
    /// Create a new cache holding at most `capacity` tiles.
    pub fn new(capacity: usize) -> Result<Self> {
        let cap = NonZeroUsize::new(capacity)
            .ok_or_else(|| Error::invalid_parameter("cache_capacity", capacity, "must be > 0"))?;
        Ok(Self {
            inner: LruCache::new(cap),
        })
    }

    /// Look up a tile, marking it recently used.
    pub fn get(&mut self, tile: &TileId) -> Option<&TileCell> {
        self.inner.get(tile)
    }

    /// Look up a tile without touching its recency.
    pub fn peek(&self, tile: &TileId) -> Option<&TileCell> {
        self.inner.peek(tile)
    }

    /// Mark a tile pending. Returns `false` when it is already pending or
    /// ready, i.e. when nothing needs to be scheduled.
    pub fn mark_pending(&mut self, tile: TileId) -> bool {
        match self.inner.get(&tile) {
            Some(TileCell::Pending) | Some(TileCell::Ready(_)) => false,
            Some(TileCell::Failed(_)) | None => {
                self.inner.put(tile, TileCell::Pending);
                true
            }
        }
    }

    /// Store the outcome of a tile computation.
    pub fn complete(&mut self, tile: TileId, outcome: std::result::Result<ClassifiedRegion, String>) {
        let cell = match outcome {
            Ok(region) => TileCell::Ready(Arc::new(region)),
            Err(reason) => TileCell::Failed(reason),
        };
        self.inner.put(tile, cell);
    }

    /// Number of tiles currently cached, in any state.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Number of tiles with a finished result
    pub fn n_ready(&self) -> usize {
        self.inner.iter().filter(|(_, c)| c.is_ready()).count()
    }

    /// Number of tiles waiting for a result
    pub fn n_pending(&self) -> usize {
        self.inner.iter().filter(|(_, c)| c.is_pending()).count()
    }

    /// Clear all cached tiles.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
