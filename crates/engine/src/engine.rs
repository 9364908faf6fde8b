//! Tiled inference
//!
//! Tiles are computed on a dedicated worker pool and their results sent back
//! over a channel. [`TiledInferenceEngine::apply_completed`] (and the blocking
//! waits built on it) is the only place results are written into a cache.
//! Each result carries the id of the overlay it was computed for; results
//! whose overlay is no longer current are discarded at write time.

use crate::cache::TileCell;
use crate::overlay::{Overlay, OverlayId, OverlayState};
use crossbeam_channel::{Receiver, Sender};
use ndarray::Array3;
use pixclass_algorithms::{class_value, ClassifiedRegion, PixelClassifier};
use pixclass_core::{BandStack, Error, ImageServer, Raster, RegionRequest, Result};
use pixclass_parallel::{ProcessingMode, TileGrid, TileId};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default number of tiles kept per overlay
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

/// A finished tile computation.
#[derive(Debug)]
pub struct TileResult {
    pub overlay: OverlayId,
    pub tile: TileId,
    pub outcome: std::result::Result<ClassifiedRegion, String>,
}

/// What happened to a [`TileResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Stored as ready
    Applied,
    /// Stored as failed; a later request retries it
    Failed,
    /// Computed for a replaced overlay and dropped
    Discarded,
}

/// Status of a tile as seen by a caller.
#[derive(Debug, Clone)]
pub enum TileStatus {
    Ready(Arc<ClassifiedRegion>),
    /// Being computed
    Pending,
    /// Last computation failed
    Failed(String),
    /// Not computed, or no classifier installed
    Unavailable,
}

impl From<Option<TileCell>> for TileStatus {
    fn from(cell: Option<TileCell>) -> Self {
        match cell {
            Some(TileCell::Ready(region)) => TileStatus::Ready(region),
            Some(TileCell::Pending) => TileStatus::Pending,
            Some(TileCell::Failed(reason)) => TileStatus::Failed(reason),
            None => TileStatus::Unavailable,
        }
    }
}

/// Schedules tile classification and owns the current overlay.
pub struct TiledInferenceEngine {
    image: Arc<dyn ImageServer>,
    pool: rayon::ThreadPool,
    sender: Sender<TileResult>,
    receiver: Receiver<TileResult>,
    current: Option<Overlay>,
    retired: Vec<Overlay>,
    next_id: u64,
    cache_capacity: usize,
}

impl TiledInferenceEngine {
    pub fn new(image: Arc<dyn ImageServer>, mode: ProcessingMode, cache_capacity: usize) -> Result<Self> {
        if cache_capacity == 0 {
            return Err(Error::invalid_parameter("cache_capacity", cache_capacity, "must be > 0"));
        }
        let pool = mode.build_pool("pixclass-tile")?;
        let (sender, receiver) = crossbeam_channel::unbounded();
        Ok(Self {
            image,
            pool,
            sender,
            receiver,
            current: None,
            retired: Vec::new(),
            next_id: 0,
            cache_capacity,
        })
    }

    pub fn image(&self) -> &Arc<dyn ImageServer> {
        &self.image
    }

    /// The live overlay, if a classifier is installed.
    pub fn overlay(&self) -> Option<&Overlay> {
        self.current.as_ref()
    }

    /// Replaced overlays that still have tiles in flight
    pub fn retired(&self) -> &[Overlay] {
        &self.retired
    }

    /// Replace the live overlay with a fresh one for `classifier`.
    ///
    /// The previous overlay stops: its cache is dropped and results of its
    /// in-flight tiles will be discarded.
    pub fn install(&mut self, classifier: Arc<PixelClassifier>) -> Result<OverlayId> {
        self.next_id += 1;
        let id = OverlayId(self.next_id);
        let overlay = Overlay::new(
            id,
            classifier,
            self.image.width(),
            self.image.height(),
            self.cache_capacity,
        )?;
        self.stop();
        info!(overlay = %id, tile_size = overlay.grid().tile_size(), "installed overlay");
        self.current = Some(overlay);
        Ok(id)
    }

    /// Stop the live overlay without a replacement.
    pub fn stop(&mut self) {
        let Some(mut old) = self.current.take() else {
            return;
        };
        old.retire();
        debug!(overlay = %old.id(), in_flight = old.in_flight(), "stopping overlay");
        if old.state() == OverlayState::Stopping {
            self.retired.push(old);
        }
    }

    /// Look up a tile without scheduling it.
    pub fn lookup_tile(&mut self, tile: &TileId) -> TileStatus {
        self.current.as_mut().and_then(|o| o.lookup(tile)).into()
    }

    /// Return a cached tile or schedule its computation.
    pub fn request_tile(&mut self, tile: TileId) -> TileStatus {
        let Some(overlay) = self.current.as_mut() else {
            return TileStatus::Unavailable;
        };
        if let Some(TileCell::Ready(region)) = overlay.lookup(&tile) {
            return TileStatus::Ready(region);
        }
        if overlay.schedule(tile) {
            let (id, classifier) = (overlay.id(), Arc::clone(overlay.classifier()));
            self.spawn(id, classifier, tile);
        }
        TileStatus::Pending
    }

    fn spawn(&self, overlay: OverlayId, classifier: Arc<PixelClassifier>, tile: TileId) {
        let image = Arc::clone(&self.image);
        let sender = self.sender.clone();
        self.pool.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                classifier.classify_region(image.as_ref(), &tile.request())
            }));
            let outcome = match outcome {
                Ok(Ok(region)) => Ok(region),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("tile computation panicked".to_string()),
            };
            // The engine may be gone already
            let _ = sender.send(TileResult {
                overlay,
                tile,
                outcome,
            });
        });
    }

    fn apply(&mut self, result: TileResult) -> ApplyOutcome {
        if let Some(overlay) = self.current.as_mut().filter(|o| o.id() == result.overlay) {
            let failed = result.outcome.is_err();
            if let Err(reason) = &result.outcome {
                warn!(overlay = %result.overlay, x = result.tile.x, y = result.tile.y, %reason, "tile failed");
            }
            overlay.complete(result.tile, result.outcome);
            return if failed {
                ApplyOutcome::Failed
            } else {
                ApplyOutcome::Applied
            };
        }

        debug!(
            overlay = %result.overlay,
            x = result.tile.x,
            y = result.tile.y,
            "discarding tile from replaced overlay"
        );
        if let Some(old) = self.retired.iter_mut().find(|o| o.id() == result.overlay) {
            old.task_finished();
        }
        self.retired.retain(|o| o.state() != OverlayState::Stopped);
        ApplyOutcome::Discarded
    }

    /// Apply every result that has arrived, without blocking.
    pub fn apply_completed(&mut self) -> usize {
        let results: Vec<TileResult> = self.receiver.try_iter().collect();
        let n = results.len();
        for result in results {
            self.apply(result);
        }
        n
    }

    /// Block until one result arrives and apply it.
    pub fn wait_one(&mut self) -> Result<(TileId, ApplyOutcome)> {
        let result = self
            .receiver
            .recv()
            .map_err(|_| Error::Other("tile result channel closed".into()))?;
        let tile = result.tile;
        Ok((tile, self.apply(result)))
    }

    /// Block until no tile of any overlay is in flight.
    pub fn wait_idle(&mut self) -> Result<()> {
        while self.current.as_ref().is_some_and(|o| o.in_flight() > 0) || !self.retired.is_empty() {
            self.wait_one()?;
        }
        Ok(())
    }

    /// Classify a region through the tile cache, waiting for missing tiles.
    ///
    /// The request is read at the installed classifier's resolution,
    /// whatever its own downsample.
    pub fn classify(&mut self, region: &RegionRequest) -> Result<ClassifiedRegion> {
        let overlay = self
            .current
            .as_ref()
            .ok_or_else(|| Error::insufficient("no classifier has been trained"))?;
        let grid = overlay.grid().clone();
        let channels = overlay.classifier().metadata().channels.len();
        let request = region.at_downsample(grid.downsample());
        self.image.check_request(&request)?;

        let tiles = grid.tiles_for_region(&request);
        let mut ready: HashMap<TileId, Arc<ClassifiedRegion>> = HashMap::with_capacity(tiles.len());
        let mut waiting: HashSet<TileId> = HashSet::new();
        for &tile in &tiles {
            match self.request_tile(tile) {
                TileStatus::Ready(region) => {
                    ready.insert(tile, region);
                }
                _ => {
                    waiting.insert(tile);
                }
            }
        }

        while !waiting.is_empty() {
            let (tile, outcome) = self.wait_one()?;
            if !waiting.contains(&tile) || outcome == ApplyOutcome::Discarded {
                continue;
            }
            match self.lookup_tile(&tile) {
                TileStatus::Ready(region) => {
                    waiting.remove(&tile);
                    ready.insert(tile, region);
                }
                TileStatus::Failed(reason) => return Err(Error::Algorithm(reason)),
                _ => {}
            }
        }

        assemble(&request, &grid, &ready, channels)
    }
}

/// Stitch tile results into one raster covering `request`.
fn assemble(
    request: &RegionRequest,
    grid: &TileGrid,
    tiles: &HashMap<TileId, Arc<ClassifiedRegion>>,
    channels: usize,
) -> Result<ClassifiedRegion> {
    let (rows, cols) = (request.output_height(), request.output_width());
    let d = request.downsample;
    let x_max = (request.x + request.width as i64) as f64;
    let y_max = (request.y + request.height as i64) as f64;

    // Tile and tile-local position of each output pixel centre
    let locate = |row: usize, col: usize| -> Result<(&ClassifiedRegion, usize, usize)> {
        let x = (request.x as f64 + (col as f64 + 0.5) * d).min(x_max - 0.5);
        let y = (request.y as f64 + (row as f64 + 0.5) * d).min(y_max - 0.5);
        let tile = grid
            .tile_for_pixel(x, y, request.z, request.t)
            .ok_or(Error::IndexOutOfBounds { row, col, rows, cols })?;
        let region = tiles
            .get(&tile)
            .ok_or_else(|| Error::Other(format!("tile at ({}, {}) missing", tile.x, tile.y)))?;
        let (lr, lc) = tile
            .to_local(x, y)
            .ok_or(Error::IndexOutOfBounds { row, col, rows, cols })?;
        Ok((region.as_ref(), lr.min(region.rows() - 1), lc.min(region.cols() - 1)))
    };

    let probability = tiles
        .values()
        .next()
        .is_some_and(|r| matches!(r.as_ref(), ClassifiedRegion::Probability(_)));
    if !probability {
        let mut out = Raster::<u8>::new(rows, cols);
        for row in 0..rows {
            for col in 0..cols {
                let (region, lr, lc) = locate(row, col)?;
                out.set(row, col, class_value(region.class_at(lr, lc)?)?)?;
            }
        }
        return Ok(ClassifiedRegion::Classification(out));
    }

    let mut data = Array3::<f32>::zeros((channels, rows, cols));
    let mut names = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            let (region, lr, lc) = locate(row, col)?;
            if let ClassifiedRegion::Probability(bands) = region {
                if names.is_empty() {
                    names = bands.names().to_vec();
                }
                for c in 0..channels {
                    data[[c, row, col]] = bands.get(c, lr, lc)?;
                }
            }
        }
    }
    Ok(ClassifiedRegion::Probability(BandStack::with_names(data, names)?))
}
