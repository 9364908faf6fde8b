//! Overlay state machine
//!
//! An overlay binds one trained [`PixelClassifier`] to a tile grid and a tile
//! cache. It moves `Idle → Computing → Ready` as tiles are scheduled and
//! completed, and `→ Stopping → Stopped` once replaced. A retired overlay
//! keeps counting its in-flight tiles so it knows when it is fully stopped,
//! but never stores their results.

use crate::cache::{TileCache, TileCell};
use pixclass_algorithms::{ClassifiedRegion, PixelClassifier};
use pixclass_core::Result;
use pixclass_parallel::{TileGrid, TileId};
use std::fmt;
use std::sync::Arc;

/// Generation number of an overlay within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OverlayId(pub u64);

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "overlay#{}", self.0)
    }
}

/// Lifecycle of an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    /// Installed, nothing requested yet
    Idle,
    /// At least one tile in flight
    Computing,
    /// Every requested tile has a result
    Ready,
    /// Replaced; in-flight tiles are still running and will be discarded
    Stopping,
    /// Replaced and drained
    Stopped,
}

impl OverlayState {
    /// Whether the overlay still accepts results
    pub fn is_live(&self) -> bool {
        matches!(self, OverlayState::Idle | OverlayState::Computing | OverlayState::Ready)
    }
}

/// A classifier bound to a tile grid and its own cache.
#[derive(Debug)]
pub struct Overlay {
    id: OverlayId,
    classifier: Arc<PixelClassifier>,
    grid: TileGrid,
    cache: TileCache,
    state: OverlayState,
    in_flight: usize,
}

impl Overlay {
    /// Tiles follow the classifier's input size at its working resolution.
    pub(crate) fn new(
        id: OverlayId,
        classifier: Arc<PixelClassifier>,
        image_width: usize,
        image_height: usize,
        cache_capacity: usize,
    ) -> Result<Self> {
        let metadata = classifier.metadata();
        let grid = TileGrid::new(
            image_width,
            image_height,
            metadata.resolution.downsample(),
            metadata.input_width.max(metadata.input_height),
        )?;
        Ok(Self {
            id,
            classifier,
            grid,
            cache: TileCache::new(cache_capacity)?,
            state: OverlayState::Idle,
            in_flight: 0,
        })
    }

    pub fn id(&self) -> OverlayId {
        self.id
    }

    pub fn classifier(&self) -> &Arc<PixelClassifier> {
        &self.classifier
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    /// Tiles scheduled whose results have not come back
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Current cell of a tile, if any.
    pub(crate) fn lookup(&mut self, tile: &TileId) -> Option<TileCell> {
        self.cache.get(tile).cloned()
    }

    /// Mark a tile pending. Returns `true` when it must be computed.
    pub(crate) fn schedule(&mut self, tile: TileId) -> bool {
        if !self.state.is_live() || !self.cache.mark_pending(tile) {
            return false;
        }
        self.in_flight += 1;
        self.state = OverlayState::Computing;
        true
    }

    /// Store a finished tile.
    pub(crate) fn complete(&mut self, tile: TileId, outcome: std::result::Result<ClassifiedRegion, String>) {
        self.cache.complete(tile, outcome);
        self.task_finished();
    }

    /// Account for a finished task without storing it.
    pub(crate) fn task_finished(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.state = match (self.state, self.in_flight) {
            (OverlayState::Computing, 0) => OverlayState::Ready,
            (OverlayState::Stopping, 0) => OverlayState::Stopped,
            (state, _) => state,
        };
    }

    /// Take the overlay out of service and drop its cache.
    pub(crate) fn retire(&mut self) {
        self.cache.clear();
        self.state = if self.in_flight > 0 {
            OverlayState::Stopping
        } else {
            OverlayState::Stopped
        };
    }
}
