//! Pixel classification session
//!
//! [`PixelClassifierSession`] owns everything one interactive classification
//! workflow needs: the configuration, the object hierarchy and its change
//! feed, the model being trained, the incremental sample builder and the
//! inference engine. Training runs on its own thread; the session's owner
//! calls [`poll`](PixelClassifierSession::poll) to pick up finished training
//! runs, annotation changes and finished tiles.

use crate::engine::{TileStatus, TiledInferenceEngine, DEFAULT_CACHE_CAPACITY};
use crate::overlay::OverlayState;
use crate::query::PixelQuery;
use crossbeam_channel::{Receiver, TryRecvError};
use geo::{BoundingRect, Centroid, Polygon};
use pixclass_algorithms::classification::{ClassifierModel, ModelConfig, TrainingReport};
use pixclass_algorithms::extraction::{extract_objects, ExtractionParams, RasterPlacement};
use pixclass_algorithms::features::FeatureConfig;
use pixclass_algorithms::persist::{default_classifier_name, ModelStore};
use pixclass_algorithms::preprocess::PreprocessorParams;
use pixclass_algorithms::training::{BoundaryStrategy, TrainingSampleBuilder};
use pixclass_algorithms::vector::SimplifyParams;
use pixclass_algorithms::{
    ClassifiedRegion, OutputType, PixelClassifier, TrainingConfig, TrainingOutcome,
};
use pixclass_core::image::MAX_REGION_VALUES;
use pixclass_core::{
    Error, HierarchyEvent, ImageServer, ObjectHierarchy, ObjectId, ObjectKind, PathObject,
    PixelCalibration, RegionRequest, Resolution, Result,
};
use pixclass_parallel::{ProcessingMode, TileId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Which part of the image the overlay covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionMask {
    #[default]
    EntireImage,
    /// Only tiles touching an annotation
    AnnotationsOnly,
}

/// Units of a minimum object size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeUnits {
    /// Full-resolution pixels
    #[default]
    Pixels,
    /// µm², requires a calibrated image
    Microns,
}

/// Options for creating objects from the classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectParams {
    pub kind: ObjectKind,
    pub min_size: f64,
    pub min_hole_size: f64,
    pub units: SizeUnits,
    /// One object per connected region instead of one per class
    pub split: bool,
    pub simplify: Option<SimplifyParams>,
}

impl Default for ObjectParams {
    fn default() -> Self {
        Self {
            kind: ObjectKind::Annotation,
            min_size: 0.0,
            min_hole_size: 0.0,
            units: SizeUnits::Pixels,
            split: false,
            simplify: None,
        }
    }
}

/// Everything the session needs to train and display a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub resolution: Resolution,
    pub features: FeatureConfig,
    pub model: ModelConfig,
    pub preprocessing: PreprocessorParams,
    pub boundary: BoundaryStrategy,
    pub output: OutputType,
    pub region_mask: RegionMask,
    /// Retrain automatically when annotations change
    pub live: bool,
    pub max_training_samples: usize,
    pub seed: u64,
    /// Tiles kept per overlay
    pub cache_capacity: usize,
    pub workers: ProcessingMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let training = TrainingConfig::new(Resolution::full(PixelCalibration::default()));
        Self {
            resolution: training.resolution,
            features: training.features,
            model: ModelConfig::default(),
            preprocessing: training.preprocessing,
            boundary: training.boundary,
            output: training.output,
            region_mask: RegionMask::default(),
            live: false,
            max_training_samples: training.max_training_samples,
            seed: training.seed,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            workers: ProcessingMode::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults at the full resolution of `image`.
    pub fn for_image(image: &dyn ImageServer) -> Self {
        Self {
            resolution: Resolution::full(image.pixel_calibration()),
            ..Self::default()
        }
    }

    /// The subset of settings a training run uses
    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            resolution: self.resolution.clone(),
            features: self.features.clone(),
            preprocessing: self.preprocessing.clone(),
            boundary: self.boundary.clone(),
            output: self.output,
            max_training_samples: self.max_training_samples,
            seed: self.seed,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Write the configuration as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// What a call to [`PixelClassifierSession::poll`] did.
#[derive(Debug, Default)]
pub struct SessionUpdate {
    /// Tile results applied (or discarded)
    pub tiles_applied: usize,
    /// A training run was started by an annotation change
    pub training_started: bool,
    /// A training run finished
    pub training: Option<Result<TrainingReport>>,
}

struct TrainingJob {
    receiver: Receiver<Result<TrainingOutcome>>,
    handle: JoinHandle<()>,
}

/// Interactive pixel classification of one image.
pub struct PixelClassifierSession {
    image: Arc<dyn ImageServer>,
    hierarchy: ObjectHierarchy,
    events: Receiver<HierarchyEvent>,
    config: SessionConfig,
    model: Arc<ClassifierModel>,
    builder: Arc<Mutex<TrainingSampleBuilder>>,
    engine: TiledInferenceEngine,
    classifier: Option<Arc<PixelClassifier>>,
    job: Option<TrainingJob>,
    retrain_queued: bool,
    report: Option<TrainingReport>,
    render_revision: u64,
}

fn run_training(
    image: &dyn ImageServer,
    annotations: &[PathObject],
    builder: &Mutex<TrainingSampleBuilder>,
    model: &ClassifierModel,
    config: &TrainingConfig,
) -> Result<TrainingOutcome> {
    let mut builder = builder
        .lock()
        .map_err(|_| Error::Other("training sample builder lock poisoned".into()))?;
    PixelClassifier::train(image, annotations, &mut builder, model, config)
}

impl PixelClassifierSession {
    pub fn new(image: Arc<dyn ImageServer>, mut hierarchy: ObjectHierarchy, config: SessionConfig) -> Result<Self> {
        config.boundary.validate()?;
        let events = hierarchy.subscribe();
        let engine = TiledInferenceEngine::new(Arc::clone(&image), config.workers, config.cache_capacity)?;
        Ok(Self {
            image,
            hierarchy,
            events,
            model: Arc::new(ClassifierModel::new(config.model.clone())),
            config,
            builder: Arc::new(Mutex::new(TrainingSampleBuilder::new())),
            engine,
            classifier: None,
            job: None,
            retrain_queued: false,
            report: None,
            render_revision: 0,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn image(&self) -> &Arc<dyn ImageServer> {
        &self.image
    }

    pub fn hierarchy(&self) -> &ObjectHierarchy {
        &self.hierarchy
    }

    /// Edit the hierarchy. Changes are picked up by the next [`poll`](Self::poll).
    pub fn hierarchy_mut(&mut self) -> &mut ObjectHierarchy {
        &mut self.hierarchy
    }

    pub fn engine(&self) -> &TiledInferenceEngine {
        &self.engine
    }

    pub fn model(&self) -> &Arc<ClassifierModel> {
        &self.model
    }

    /// Classifier behind the current overlay
    pub fn classifier(&self) -> Option<&Arc<PixelClassifier>> {
        self.classifier.as_ref()
    }

    /// Report of the last successful training run
    pub fn report(&self) -> Option<&TrainingReport> {
        self.report.as_ref()
    }

    pub fn overlay_state(&self) -> Option<OverlayState> {
        self.engine.overlay().map(|o| o.state())
    }

    /// Bumped whenever what is shown changes without new results
    pub fn render_revision(&self) -> u64 {
        self.render_revision
    }

    pub fn is_training(&self) -> bool {
        self.job.is_some()
    }

    /// Replace the configuration.
    ///
    /// A changed model variant starts from an untrained model; a changed
    /// worker count or cache size rebuilds the engine. In live mode any
    /// change to training settings retrains.
    pub fn set_config(&mut self, config: SessionConfig) -> Result<()> {
        config.boundary.validate()?;
        if config.workers != self.config.workers || config.cache_capacity != self.config.cache_capacity {
            let mut engine =
                TiledInferenceEngine::new(Arc::clone(&self.image), config.workers, config.cache_capacity)?;
            if let Some(classifier) = &self.classifier {
                engine.install(Arc::clone(classifier))?;
            }
            self.engine = engine;
        }
        if config.model != self.config.model {
            self.model = Arc::new(ClassifierModel::new(config.model.clone()));
        }
        if config.region_mask != self.config.region_mask {
            self.render_revision += 1;
        }
        let retrain = config.training_config() != self.config.training_config()
            || config.model != self.config.model;
        self.config = config;
        if retrain && self.config.live {
            self.retrain()?;
        }
        Ok(())
    }

    /// Stop the stale overlay and start training in the background.
    fn retrain(&mut self) -> Result<()> {
        self.engine.stop();
        self.spawn_training()
    }

    fn install(&mut self, classifier: PixelClassifier) -> Result<()> {
        let classifier = Arc::new(classifier);
        self.engine.install(Arc::clone(&classifier))?;
        self.classifier = Some(classifier);
        Ok(())
    }

    fn finish_training(&mut self, result: Result<TrainingOutcome>) -> Result<TrainingReport> {
        match result {
            Ok(outcome) => {
                self.install(outcome.classifier)?;
                info!(accuracy = outcome.report.accuracy, "training finished");
                self.report = Some(outcome.report.clone());
                Ok(outcome.report)
            }
            Err(e) => {
                warn!(error = %e, "training failed");
                // A live retrain stopped the overlay; show the last good classifier again
                if self.engine.overlay().is_none()
                    && let Some(previous) = self.classifier.clone()
                {
                    self.engine.install(previous)?;
                }
                Err(e)
            }
        }
    }

    /// Train on the current annotations on the calling thread and install
    /// the result. On error the previous classifier stays installed.
    pub fn train(&mut self) -> Result<TrainingReport> {
        let annotations = self.hierarchy.annotations();
        let config = self.config.training_config();
        let result = run_training(
            self.image.as_ref(),
            &annotations,
            &self.builder,
            &self.model,
            &config,
        );
        self.finish_training(result)
    }

    /// Start training on a background thread. If a run is already going,
    /// another one is queued behind it.
    pub fn spawn_training(&mut self) -> Result<()> {
        if self.job.is_some() {
            self.retrain_queued = true;
            return Ok(());
        }
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let image = Arc::clone(&self.image);
        let annotations = self.hierarchy.annotations();
        let builder = Arc::clone(&self.builder);
        let model = Arc::clone(&self.model);
        let config = self.config.training_config();
        debug!(annotations = annotations.len(), "starting training");
        let handle = std::thread::Builder::new()
            .name("pixclass-training".into())
            .spawn(move || {
                let result = run_training(image.as_ref(), &annotations, &builder, &model, &config);
                let _ = sender.send(result);
            })?;
        self.job = Some(TrainingJob { receiver, handle });
        Ok(())
    }

    fn complete_job(&mut self, job: TrainingJob, result: Option<Result<TrainingOutcome>>) -> Result<TrainingReport> {
        let joined = job.handle.join();
        let result = result.unwrap_or_else(|| {
            Err(Error::Other(match joined {
                Err(_) => "training thread panicked".into(),
                Ok(()) => "training thread exited without a result".into(),
            }))
        });
        let report = self.finish_training(result);
        if std::mem::take(&mut self.retrain_queued) {
            self.spawn_training()?;
        }
        report
    }

    /// Block until no training run is going. Returns the result of the last
    /// run that finished, if any ran.
    pub fn wait_for_training(&mut self) -> Option<Result<TrainingReport>> {
        let mut last = None;
        while let Some(job) = self.job.take() {
            let result = job.receiver.recv().ok();
            last = Some(self.complete_job(job, result));
        }
        last
    }

    /// Handle annotation changes, finished training and finished tiles.
    pub fn poll(&mut self) -> SessionUpdate {
        let mut update = SessionUpdate::default();

        let changed = self.events.try_iter().fold(false, |acc, e| acc | e.affects_training());
        if changed && self.config.live {
            info!("annotations changed, retraining");
            match self.retrain() {
                Ok(()) => update.training_started = true,
                Err(e) => update.training = Some(Err(e)),
            }
        }

        if let Some(job) = self.job.take() {
            match job.receiver.try_recv() {
                Ok(result) => update.training = Some(self.complete_job(job, Some(result))),
                Err(TryRecvError::Disconnected) => update.training = Some(self.complete_job(job, None)),
                Err(TryRecvError::Empty) => self.job = Some(job),
            }
        }

        update.tiles_applied = self.engine.apply_completed();
        update
    }

    /// Switch live prediction. Turning it on trains immediately.
    pub fn set_live_mode(&mut self, live: bool) -> Result<()> {
        if live == self.config.live {
            return Ok(());
        }
        self.config.live = live;
        info!(live, "live prediction");
        if live {
            self.spawn_training()?;
        }
        Ok(())
    }

    /// Restrict which tiles are computed and shown. Keeps the cache and model.
    pub fn set_region_mask(&mut self, mask: RegionMask) {
        if mask != self.config.region_mask {
            self.config.region_mask = mask;
            self.render_revision += 1;
        }
    }

    fn tile_visible(&self, tile: &TileId) -> bool {
        match self.config.region_mask {
            RegionMask::EntireImage => true,
            RegionMask::AnnotationsOnly => {
                let (x0, y0) = (tile.x as f64, tile.y as f64);
                let (x1, y1) = (x0 + tile.width as f64, y0 + tile.height as f64);
                self.hierarchy
                    .objects()
                    .iter()
                    .filter(|o| o.is_annotation() && o.z == tile.z && o.t == tile.t)
                    .filter_map(|o| o.bounds())
                    .any(|b| b.min().x < x1 && b.max().x > x0 && b.min().y < y1 && b.max().y > y0)
            }
        }
    }

    /// Tiles of a region to display, scheduling those not yet computed.
    /// Tiles outside the region mask are left out.
    pub fn request_tiles(&mut self, region: &RegionRequest) -> Vec<(TileId, TileStatus)> {
        self.engine.apply_completed();
        let Some(overlay) = self.engine.overlay() else {
            return Vec::new();
        };
        let request = region.at_downsample(overlay.grid().downsample());
        let tiles: Vec<TileId> = overlay
            .grid()
            .tiles_for_region(&request)
            .into_iter()
            .filter(|t| self.tile_visible(t))
            .collect();
        tiles
            .into_iter()
            .map(|t| (t, self.engine.request_tile(t)))
            .collect()
    }

    /// Classify a region at the working resolution, waiting for missing tiles.
    pub fn classify(&mut self, region: &RegionRequest) -> Result<ClassifiedRegion> {
        self.engine.apply_completed();
        self.engine.classify(region)
    }

    /// Prediction at a full-resolution point. Never blocks: returns
    /// [`PixelQuery::Unavailable`] unless the owning tile is cached.
    pub fn query_pixel(&mut self, x: f64, y: f64, z: usize, t: usize) -> PixelQuery {
        self.engine.apply_completed();
        let Some(overlay) = self.engine.overlay() else {
            return PixelQuery::Unavailable;
        };
        let channels = overlay.classifier().metadata().channels.clone();
        let Some(tile) = overlay.grid().tile_for_pixel(x, y, z, t) else {
            return PixelQuery::Unavailable;
        };
        if !self.tile_visible(&tile) {
            return PixelQuery::Unavailable;
        }
        let TileStatus::Ready(region) = self.engine.lookup_tile(&tile) else {
            return PixelQuery::Unavailable;
        };
        tile.to_local(x, y)
            .and_then(|(row, col)| PixelQuery::from_region(&region, &channels, row, col).ok())
            .unwrap_or(PixelQuery::Unavailable)
    }

    /// Create objects from the classification, inside `roi` or over the
    /// whole plane `(z, t)`. Live prediction is switched off first so the
    /// new objects do not trigger retraining.
    pub fn extract_objects(
        &mut self,
        roi: Option<&Polygon<f64>>,
        z: usize,
        t: usize,
        params: &ObjectParams,
    ) -> Result<Vec<ObjectId>> {
        if self.config.live {
            info!("turning off live prediction before creating objects");
            self.set_live_mode(false)?;
        }
        let classifier = self
            .classifier
            .clone()
            .ok_or_else(|| Error::insufficient("no classifier has been trained"))?;
        let d = classifier.resolution().downsample();

        let (width, height) = (self.image.width(), self.image.height());
        let (x0, y0, x1, y1) = match roi.and_then(|r| r.bounding_rect()) {
            Some(b) => (
                (b.min().x.floor().max(0.0) as usize).min(width),
                (b.min().y.floor().max(0.0) as usize).min(height),
                (b.max().x.ceil().max(0.0) as usize).min(width),
                (b.max().y.ceil().max(0.0) as usize).min(height),
            ),
            None => (0, 0, width, height),
        };
        if x1 <= x0 || y1 <= y0 {
            return Ok(Vec::new());
        }
        let request = RegionRequest::new(x0 as i64, y0 as i64, x1 - x0, y1 - y0)
            .at_downsample(d)
            .on_plane(z, t);
        let pixels = request.output_width() as u128 * request.output_height() as u128;
        if pixels > MAX_REGION_VALUES {
            return Err(Error::ResourceLimit {
                requested: pixels,
                limit: MAX_REGION_VALUES,
            });
        }

        // Minimum sizes are given at full resolution; extraction counts working pixels
        let to_working = match params.units {
            SizeUnits::Pixels => 1.0 / (d * d),
            SizeUnits::Microns => {
                let area = self.image.pixel_calibration().pixel_area_microns().ok_or_else(|| {
                    Error::invalid_parameter("units", "microns", "image has no pixel size in µm")
                })?;
                1.0 / (area * d * d)
            }
        };
        let extraction = ExtractionParams {
            min_area_pixels: params.min_size * to_working,
            min_hole_area_pixels: params.min_hole_size * to_working,
            split: params.split,
            simplify: params.simplify,
            ..Default::default()
        };

        let raster = self.engine.classify(&request)?.to_classification()?;
        let placement = RasterPlacement {
            x: x0 as f64,
            y: y0 as f64,
            downsample: d,
        };
        let extracted = extract_objects(
            &raster,
            &classifier.metadata().channels,
            &placement,
            roi,
            &extraction,
        )?;
        let objects: Vec<PathObject> = extracted
            .into_iter()
            .map(|o| {
                let object = match params.kind {
                    ObjectKind::Annotation => PathObject::annotation(o.roi, Some(o.class)),
                    ObjectKind::Detection => PathObject::detection(o.roi, Some(o.class)),
                };
                object.on_plane(z, t)
            })
            .collect();
        info!(objects = objects.len(), kind = ?params.kind, "created objects");
        Ok(self.hierarchy.add_objects(objects))
    }

    /// Set each detection's class to the prediction at its centroid.
    /// Returns the number of detections updated.
    pub fn classify_detections(&mut self) -> Result<usize> {
        let channels = match &self.classifier {
            Some(c) => c.metadata().channels.clone(),
            None => return Err(Error::insufficient("no classifier has been trained")),
        };
        let (width, height) = (self.image.width() as f64, self.image.height() as f64);
        let targets: Vec<(ObjectId, f64, f64, usize, usize)> = self
            .hierarchy
            .objects()
            .iter()
            .filter(|o| o.is_detection())
            .filter_map(|o| {
                let c = o.roi.centroid()?;
                Some((o.id(), c.x(), c.y(), o.z, o.t))
            })
            .filter(|&(_, x, y, _, _)| x >= 0.0 && y >= 0.0 && x < width && y < height)
            .collect();

        let mut updates = Vec::with_capacity(targets.len());
        for (id, x, y, z, t) in targets {
            let request = RegionRequest::new(x.floor() as i64, y.floor() as i64, 1, 1).on_plane(z, t);
            let region = self.engine.classify(&request)?;
            updates.push((id, channels.get(region.class_at(0, 0)?).cloned()));
        }
        Ok(self.hierarchy.set_classes(&updates))
    }

    /// Select every object of one kind.
    pub fn select_objects_by_kind(&mut self, kind: ObjectKind) -> Vec<ObjectId> {
        self.hierarchy.select_by_kind(kind).to_vec()
    }

    /// Save the installed classifier. Without a name the model's default
    /// name is used. Returns the name saved under.
    pub fn save_classifier(&self, store: &dyn ModelStore, name: Option<&str>) -> Result<String> {
        let classifier = self
            .classifier
            .as_ref()
            .ok_or_else(|| Error::insufficient("no classifier has been trained"))?;
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| default_classifier_name(self.model.config()));
        store.save(&name, &classifier.snapshot())?;
        info!(%name, "saved classifier");
        Ok(name)
    }

    /// Load a saved classifier and install it. The session configuration
    /// takes the loaded model variant and training settings. Live prediction
    /// is switched off so the loaded classifier is not replaced by a retrain.
    pub fn load_classifier(&mut self, store: &dyn ModelStore, name: &str) -> Result<()> {
        let classifier = store.load_classifier(name)?;
        self.set_live_mode(false)?;
        let metadata = classifier.metadata();
        self.config.resolution = metadata.resolution.clone();
        self.config.output = metadata.output_type;
        self.config.features = classifier.feature_calculator().config();
        self.config.model = classifier.model().config();
        self.model = Arc::new(ClassifierModel::with_fitted(
            self.config.model.clone(),
            Arc::clone(classifier.model()),
        ));
        info!(%name, model = classifier.model().name(), "loaded classifier");
        self.install(classifier)
    }
}
