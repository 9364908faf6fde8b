//! Overlay replacement, live retraining and object creation through the
//! public engine and session APIs.

use geo::{polygon, Polygon};
use ndarray::Array3;
use pixclass_algorithms::classification::{ClassifierModel, ModelConfig};
use pixclass_algorithms::features::{FeatureConfig, NeighborParams};
use pixclass_algorithms::training::TrainingSampleBuilder;
use pixclass_algorithms::{PixelClassifier, TrainingConfig};
use pixclass_core::{
    BandStack, Error, ErrorKind, ImageServer, InMemoryImage, ObjectHierarchy, ObjectId, PathClass,
    PathObject, PixelCalibration, RegionRequest, Resolution, Result,
};
use pixclass_engine::{
    ApplyOutcome, ObjectParams, OverlayState, PixelClassifierSession, SessionConfig,
    TileStatus, TiledInferenceEngine,
};
use pixclass_parallel::ProcessingMode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Image whose reads block while the test holds the gate for writing.
struct GatedImage {
    inner: InMemoryImage,
    gate: RwLock<()>,
}

impl ImageServer for GatedImage {
    fn width(&self) -> usize {
        self.inner.width()
    }

    fn height(&self) -> usize {
        self.inner.height()
    }

    fn n_channels(&self) -> usize {
        self.inner.n_channels()
    }

    fn pixel_calibration(&self) -> PixelCalibration {
        self.inner.pixel_calibration()
    }

    fn read_region(&self, request: &RegionRequest) -> Result<BandStack> {
        let _open = self.gate.read().unwrap();
        self.inner.read_region(request)
    }
}

/// Image whose next `failures` reads return an error.
struct FlakyImage {
    inner: InMemoryImage,
    failures: AtomicUsize,
}

impl ImageServer for FlakyImage {
    fn width(&self) -> usize {
        self.inner.width()
    }

    fn height(&self) -> usize {
        self.inner.height()
    }

    fn n_channels(&self) -> usize {
        self.inner.n_channels()
    }

    fn pixel_calibration(&self) -> PixelCalibration {
        self.inner.pixel_calibration()
    }

    fn read_region(&self, request: &RegionRequest) -> Result<BandStack> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::Other("slide read failed".into()));
        }
        self.inner.read_region(request)
    }
}

fn halves() -> InMemoryImage {
    InMemoryImage::new(Array3::from_shape_fn((1, 64, 64), |(_, r, c)| {
        let noise = ((r * 5 + c) % 3) as f32;
        if c < 32 { 20.0 + noise } else { 180.0 + noise }
    }))
}

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
    polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
}

fn hierarchy() -> ObjectHierarchy {
    let mut hierarchy = ObjectHierarchy::new();
    hierarchy.add_objects(vec![
        PathObject::annotation(rect(4.0, 4.0, 24.0, 60.0), Some(PathClass::new("Stroma"))),
        PathObject::annotation(rect(40.0, 4.0, 60.0, 60.0), Some(PathClass::new("Tumor"))),
    ]);
    hierarchy
}

fn features() -> FeatureConfig {
    FeatureConfig::Neighbors(NeighborParams {
        radius: 0,
        circular: false,
        tile_size: 16,
    })
}

fn classifier(image: &dyn ImageServer) -> Arc<PixelClassifier> {
    let mut config = TrainingConfig::new(Resolution::full(PixelCalibration::default()));
    config.features = features();
    let model = ClassifierModel::new(ModelConfig::MaximumLikelihood);
    let outcome = PixelClassifier::train(
        image,
        &hierarchy().annotations(),
        &mut TrainingSampleBuilder::new(),
        &model,
        &config,
    )
    .unwrap();
    Arc::new(outcome.classifier)
}

fn session_config() -> SessionConfig {
    SessionConfig {
        features: features(),
        model: ModelConfig::MaximumLikelihood,
        workers: ProcessingMode::ParallelWith(2),
        ..SessionConfig::default()
    }
}

#[test]
fn test_replaced_overlay_never_fills_new_cache() {
    let image = Arc::new(GatedImage {
        inner: halves(),
        gate: RwLock::new(()),
    });
    let first = classifier(image.as_ref());
    let second = classifier(image.as_ref());
    let mut engine =
        TiledInferenceEngine::new(image.clone(), ProcessingMode::ParallelWith(2), 64).unwrap();

    let closed = image.gate.write().unwrap();
    engine.install(first).unwrap();
    let grid = engine.overlay().unwrap().grid().clone();
    for tile in grid.iter(0, 0) {
        engine.request_tile(tile);
    }
    assert_eq!(engine.overlay().unwrap().in_flight(), 16);
    assert_eq!(engine.overlay().unwrap().state(), OverlayState::Computing);

    engine.install(second).unwrap();
    assert!(engine.overlay().unwrap().cache().is_empty());
    assert_eq!(engine.retired().len(), 1);
    assert_eq!(engine.retired()[0].state(), OverlayState::Stopping);

    drop(closed);
    let mut discarded = 0;
    while !engine.retired().is_empty() {
        let (_, outcome) = engine.wait_one().unwrap();
        assert_eq!(outcome, ApplyOutcome::Discarded);
        discarded += 1;
    }
    assert_eq!(discarded, 16);
    let current = engine.overlay().unwrap();
    assert!(current.cache().is_empty());
    assert_eq!(current.state(), OverlayState::Idle);
}

#[test]
fn test_live_retrain_after_annotation_change() {
    let image: Arc<dyn ImageServer> = Arc::new(halves());
    let mut session = PixelClassifierSession::new(image, hierarchy(), session_config()).unwrap();
    session.set_live_mode(true).unwrap();
    let first = session.wait_for_training().unwrap().unwrap();
    assert_eq!(first.class_counts.len(), 2);
    let before = session.overlay_state();
    assert_eq!(before, Some(OverlayState::Idle));
    session.classify(&RegionRequest::new(0, 0, 32, 32)).unwrap();

    session
        .hierarchy_mut()
        .add_object(PathObject::annotation(rect(8.0, 8.0, 16.0, 16.0), Some(PathClass::new("Necrosis"))));
    let update = session.poll();
    assert!(update.training_started);
    // The stale overlay stops as soon as retraining starts
    assert!(session.overlay_state().is_none());

    let report = session.wait_for_training().unwrap().unwrap();
    assert_eq!(report.class_counts.len(), 3);
    assert_eq!(session.classifier().unwrap().metadata().channels.len(), 3);
    assert_eq!(session.overlay_state(), Some(OverlayState::Idle));
    assert!(session.engine().overlay().unwrap().cache().is_empty());
}

#[test]
fn test_failed_retrain_keeps_previous_classifier() {
    let image: Arc<dyn ImageServer> = Arc::new(halves());
    let mut session = PixelClassifierSession::new(image, hierarchy(), session_config()).unwrap();
    session.train().unwrap();
    session.set_live_mode(true).unwrap();
    session.wait_for_training().unwrap().unwrap();

    let ids: Vec<ObjectId> = session.hierarchy().objects().iter().map(|o| o.id()).collect();
    session.hierarchy_mut().remove_objects(&ids);
    assert!(session.poll().training_started);

    let err = session.wait_for_training().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Training);
    assert_eq!(session.overlay_state(), Some(OverlayState::Idle));
    let region = session.classify(&RegionRequest::new(48, 0, 8, 8)).unwrap();
    assert_eq!(region.class_at(0, 0).unwrap(), 1);
}

#[test]
fn test_split_objects_inside_roi() {
    let image: Arc<dyn ImageServer> = Arc::new(halves());
    let mut session = PixelClassifierSession::new(image, hierarchy(), session_config()).unwrap();
    session.train().unwrap();

    let roi = rect(24.0, 8.0, 40.0, 24.0);
    let params = ObjectParams {
        split: true,
        ..Default::default()
    };
    let ids = session.extract_objects(Some(&roi), 0, 0, &params).unwrap();
    assert_eq!(ids.len(), 2);
    let objects: Vec<&PathObject> = ids.iter().map(|&id| session.hierarchy().get(id).unwrap()).collect();
    assert_eq!(objects[0].class, Some(PathClass::new("Stroma")));
    assert_eq!(objects[1].class, Some(PathClass::new("Tumor")));
    for object in objects {
        assert!(object.is_annotation());
        approx::assert_relative_eq!(object.area(), 128.0);
    }

    // Objects smaller than the minimum size are dropped
    let params = ObjectParams {
        min_size: 200.0,
        ..Default::default()
    };
    assert!(session.extract_objects(Some(&roi), 0, 0, &params).unwrap().is_empty());
}

#[test]
fn test_failed_tile_is_rescheduled() {
    let image = Arc::new(FlakyImage {
        inner: halves(),
        failures: AtomicUsize::new(1),
    });
    let mut engine =
        TiledInferenceEngine::new(image.clone(), ProcessingMode::ParallelWith(2), 64).unwrap();
    engine.install(classifier(&halves())).unwrap();
    let tile = engine.overlay().unwrap().grid().tile(0, 0, 0, 0).unwrap();

    assert!(matches!(engine.request_tile(tile), TileStatus::Pending));
    assert_eq!(engine.wait_one().unwrap(), (tile, ApplyOutcome::Failed));
    match engine.lookup_tile(&tile) {
        TileStatus::Failed(reason) => assert!(reason.contains("slide read failed"), "{reason}"),
        other => panic!("expected a failed tile, got {other:?}"),
    }

    // The next request schedules the tile again
    assert!(matches!(engine.request_tile(tile), TileStatus::Pending));
    assert_eq!(engine.wait_one().unwrap(), (tile, ApplyOutcome::Applied));
    assert!(matches!(engine.lookup_tile(&tile), TileStatus::Ready(_)));
    assert_eq!(engine.overlay().unwrap().state(), OverlayState::Ready);
}

#[test]
fn test_classify_reports_failed_tile() {
    let image = Arc::new(FlakyImage {
        inner: halves(),
        failures: AtomicUsize::new(1),
    });
    let mut engine =
        TiledInferenceEngine::new(image.clone(), ProcessingMode::ParallelWith(2), 64).unwrap();
    engine.install(classifier(&halves())).unwrap();
    let region = RegionRequest::new(48, 0, 16, 16);

    let err = engine.classify(&region).unwrap_err();
    assert!(err.to_string().contains("slide read failed"), "{err}");
    let retried = engine.classify(&region).unwrap();
    assert_eq!(retried.class_at(0, 0).unwrap(), 1);
}
