//! # PixClass Engine
//!
//! Interactive side of PixClass: tiled inference with a per-overlay LRU
//! cache, the overlay lifecycle, and a session that ties annotations,
//! training and display together.
//!
//! ## Example
//!
//! ```ignore
//! use pixclass_engine::{PixelClassifierSession, SessionConfig};
//!
//! let config = SessionConfig::for_image(image.as_ref());
//! let mut session = PixelClassifierSession::new(image, hierarchy, config)?;
//! session.train()?;
//! let region = session.classify(&RegionRequest::new(0, 0, 512, 512))?;
//! ```

pub mod cache;
pub mod engine;
pub mod overlay;
pub mod query;
pub mod session;

pub use cache::{TileCache, TileCell};
pub use engine::{ApplyOutcome, TileResult, TileStatus, TiledInferenceEngine, DEFAULT_CACHE_CAPACITY};
pub use overlay::{Overlay, OverlayId, OverlayState};
pub use query::PixelQuery;
pub use session::{
    ObjectParams, PixelClassifierSession, RegionMask, SessionConfig, SessionUpdate, SizeUnits,
};

#[cfg(test)]
pub(crate) mod test_support {
    use geo::{polygon, Polygon};
    use ndarray::Array3;
    use pixclass_algorithms::classification::{ClassifierModel, ModelConfig};
    use pixclass_algorithms::features::{FeatureConfig, NeighborParams};
    use pixclass_algorithms::training::TrainingSampleBuilder;
    use pixclass_algorithms::{PixelClassifier, TrainingConfig};
    use pixclass_core::{
        InMemoryImage, ObjectHierarchy, PathClass, PathObject, PixelCalibration, Resolution,
    };
    use std::sync::Arc;

    /// 64x64, dark for columns < 32 and bright elsewhere.
    pub fn halves_image() -> InMemoryImage {
        InMemoryImage::new(Array3::from_shape_fn((1, 64, 64), |(_, r, c)| {
            let noise = ((r * 7 + c * 3) % 5) as f32;
            if c < 32 { 10.0 + noise } else { 200.0 + noise }
        }))
    }

    pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
    }

    /// Classifier over [`halves_image`] with classes Dark (0) and Bright (1).
    pub fn trained_classifier(tile_size: usize) -> Arc<PixelClassifier> {
        let mut hierarchy = ObjectHierarchy::new();
        hierarchy.add_objects(vec![
            PathObject::annotation(rect(2.0, 2.0, 20.0, 60.0), Some(PathClass::new("Dark"))),
            PathObject::annotation(rect(40.0, 2.0, 60.0, 60.0), Some(PathClass::new("Bright"))),
        ]);
        let mut config = TrainingConfig::new(Resolution::full(PixelCalibration::default()));
        config.features = FeatureConfig::Neighbors(NeighborParams {
            radius: 0,
            circular: false,
            tile_size,
        });
        let model = ClassifierModel::new(ModelConfig::MaximumLikelihood);
        let outcome = PixelClassifier::train(
            &halves_image(),
            &hierarchy.annotations(),
            &mut TrainingSampleBuilder::new(),
            &model,
            &config,
        )
        .unwrap();
        Arc::new(outcome.classifier)
    }
}
