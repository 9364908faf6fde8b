//! # PixClass Algorithms
//!
//! Pixel classification building blocks for PixClass.
//!
//! ## Modules
//!
//! - **features**: multiscale filter and neighbourhood feature calculators
//! - **training**: annotation rasterization, boundary strategies, training sets
//! - **preprocess**: normalization and PCA
//! - **classification**: random trees, k-nearest, logistic regression, maximum likelihood
//! - **pixel_classifier**: the trained feature/preprocessor/model bundle
//! - **persist**: named storage of trained classifiers
//! - **extraction**: classification raster to objects
//! - **vector**: ROI simplification

pub(crate) mod maybe_rayon;
pub(crate) mod rng;

pub mod classification;
pub mod extraction;
pub mod features;
pub mod persist;
pub mod pixel_classifier;
pub mod preprocess;
pub mod training;
pub mod vector;

pub use pixel_classifier::{
    class_value, ClassifiedRegion, OutputType, PixelClassifier, PixelClassifierMetadata,
    PixelClassifierSnapshot, TrainingConfig, TrainingOutcome,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classification::{
        ClassifierModel, KNearestParams, LogisticParams, ModelConfig, RandomTreesParams,
        StatModel, TrainingReport,
    };
    pub use crate::extraction::{extract_objects, ExtractedObject, ExtractionParams, RasterPlacement};
    pub use crate::features::{FeatureCalculator, FeatureConfig, MultiscaleParams, NeighborParams};
    pub use crate::persist::{default_classifier_name, DirectoryModelStore, ModelStore};
    pub use crate::pixel_classifier::{
        ClassifiedRegion, OutputType, PixelClassifier, TrainingConfig, TrainingOutcome,
    };
    pub use crate::preprocess::{FeaturePreprocessor, Normalization, PreprocessorParams};
    pub use crate::training::{BoundaryStrategy, TrainingSampleBuilder, TrainingSet};
    pub use pixclass_core::prelude::*;
}
