//! Trained pixel classifiers
//!
//! A [`PixelClassifier`] bundles everything needed to classify a region: the
//! feature calculator, the fitted preprocessor, the fitted model and the
//! metadata describing its input and output. It is immutable; retraining
//! produces a new one.

use crate::classification::{
    accuracy_percent, split_samples, ClassifierModel, ModelSnapshot, StatModel, TrainingReport,
    DEFAULT_MAX_TRAINING_SAMPLES, DEFAULT_SEED,
};
use crate::features::{FeatureCalculator, FeatureConfig};
use crate::preprocess::{FeaturePreprocessor, PreprocessorParams};
use crate::training::{BoundaryStrategy, TrainingSampleBuilder};
use ndarray::{Array2, Array3};
use pixclass_core::{
    BandStack, Error, ImageServer, PathClass, PathObject, Raster, RegionRequest, Resolution,
    Result,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Largest class count a `u8` classification raster can hold.
pub const MAX_CLASSIFICATION_CLASSES: usize = 256;

/// Class index as a classification raster value.
pub fn class_value(index: usize) -> Result<u8> {
    u8::try_from(index).map_err(|_| {
        Error::invalid_parameter(
            "class index",
            index,
            format!("classification output holds at most {MAX_CLASSIFICATION_CLASSES} classes"),
        )
    })
}

/// What the classifier writes per pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    /// One `u8` class index
    #[default]
    Classification,
    /// One `f32` score per class
    Probability,
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputType::Classification => f.write_str("Classification"),
            OutputType::Probability => f.write_str("Probability"),
        }
    }
}

/// Input and output description of a trained classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelClassifierMetadata {
    /// Working resolution
    pub resolution: Resolution,
    /// Preferred tile width in working pixels
    pub input_width: usize,
    /// Preferred tile height in working pixels
    pub input_height: usize,
    pub output_type: OutputType,
    /// Output channels, one per class index
    pub channels: Vec<PathClass>,
}

impl PixelClassifierMetadata {
    /// Name of output channel `index`
    pub fn channel(&self, index: usize) -> Option<&PathClass> {
        self.channels.get(index)
    }
}

/// Result of classifying one region.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedRegion {
    Classification(Raster<u8>),
    /// One band per output channel
    Probability(BandStack),
}

impl ClassifiedRegion {
    pub fn rows(&self) -> usize {
        match self {
            ClassifiedRegion::Classification(r) => r.rows(),
            ClassifiedRegion::Probability(b) => b.rows(),
        }
    }

    pub fn cols(&self) -> usize {
        match self {
            ClassifiedRegion::Classification(r) => r.cols(),
            ClassifiedRegion::Probability(b) => b.cols(),
        }
    }

    /// Class index at a pixel (argmax for probabilities).
    pub fn class_at(&self, row: usize, col: usize) -> Result<usize> {
        match self {
            ClassifiedRegion::Classification(r) => Ok(r.get(row, col)? as usize),
            ClassifiedRegion::Probability(b) => {
                let mut best = 0;
                let mut best_p = f32::NEG_INFINITY;
                for band in 0..b.n_bands() {
                    let p = b.get(band, row, col)?;
                    if p > best_p {
                        best = band;
                        best_p = p;
                    }
                }
                Ok(best)
            }
        }
    }

    /// Collapse to class indices.
    pub fn to_classification(&self) -> Result<Raster<u8>> {
        match self {
            ClassifiedRegion::Classification(r) => Ok(r.clone()),
            ClassifiedRegion::Probability(_) => {
                let (rows, cols) = (self.rows(), self.cols());
                let mut out = Raster::new(rows, cols);
                for row in 0..rows {
                    for col in 0..cols {
                        out.set(row, col, class_value(self.class_at(row, col)?)?)?;
                    }
                }
                Ok(out)
            }
        }
    }
}

/// Settings for one training run. The model variant lives in the
/// [`ClassifierModel`] being trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub resolution: Resolution,
    pub features: FeatureConfig,
    pub preprocessing: PreprocessorParams,
    pub boundary: BoundaryStrategy,
    pub output: OutputType,
    /// Cap on training samples; the excess becomes the held-out test set
    pub max_training_samples: usize,
    pub seed: u64,
}

impl TrainingConfig {
    /// Defaults at the given working resolution.
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            features: FeatureConfig::default(),
            preprocessing: PreprocessorParams::default(),
            boundary: BoundaryStrategy::default(),
            output: OutputType::default(),
            max_training_samples: DEFAULT_MAX_TRAINING_SAMPLES,
            seed: DEFAULT_SEED,
        }
    }
}

/// Immutable feature calculator + preprocessor + model triple.
#[derive(Debug, Clone)]
pub struct PixelClassifier {
    metadata: PixelClassifierMetadata,
    features: Arc<dyn FeatureCalculator>,
    preprocessor: FeaturePreprocessor,
    model: Arc<dyn StatModel>,
}

/// Serializable form of a [`PixelClassifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelClassifierSnapshot {
    pub metadata: PixelClassifierMetadata,
    pub features: FeatureConfig,
    pub preprocessor: FeaturePreprocessor,
    pub model: ModelSnapshot,
}

/// Output of [`PixelClassifier::train`].
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub classifier: PixelClassifier,
    pub report: TrainingReport,
}

impl PixelClassifier {
    /// Assemble a classifier. Probability output falls back to
    /// classification when the model cannot produce probabilities.
    pub fn new(
        mut metadata: PixelClassifierMetadata,
        features: Arc<dyn FeatureCalculator>,
        preprocessor: FeaturePreprocessor,
        model: Arc<dyn StatModel>,
    ) -> Result<Self> {
        if preprocessor.n_outputs() != model.n_features() {
            return Err(Error::FeatureCountMismatch {
                expected: model.n_features(),
                actual: preprocessor.n_outputs(),
            });
        }
        if metadata.channels.len() != model.n_classes() {
            return Err(Error::invalid_parameter(
                "channels",
                metadata.channels.len(),
                format!("model predicts {} classes", model.n_classes()),
            ));
        }
        if metadata.output_type == OutputType::Probability && !model.supports_probabilities() {
            warn!(
                model = model.name(),
                "probability output not supported, using classification"
            );
            metadata.output_type = OutputType::Classification;
        }
        if metadata.output_type == OutputType::Classification
            && metadata.channels.len() > MAX_CLASSIFICATION_CLASSES
        {
            return Err(Error::invalid_parameter(
                "channels",
                metadata.channels.len(),
                format!("classification output holds at most {MAX_CLASSIFICATION_CLASSES} classes"),
            ));
        }
        Ok(Self {
            metadata,
            features,
            preprocessor,
            model,
        })
    }

    /// Build a training set from `annotations`, fit the preprocessor on the
    /// training portion and train `model`.
    ///
    /// On error `model` keeps its previous state.
    pub fn train(
        image: &dyn ImageServer,
        annotations: &[PathObject],
        builder: &mut TrainingSampleBuilder,
        model: &ClassifierModel,
        config: &TrainingConfig,
    ) -> Result<TrainingOutcome> {
        let calculator = config.features.build()?;
        let set = builder.build(
            image,
            annotations,
            calculator.as_ref(),
            &config.resolution,
            &config.boundary,
        )?;
        if set.is_empty() {
            return Err(Error::insufficient("annotations produced no labeled pixels"));
        }
        if set.n_populated_classes() < 2 {
            return Err(Error::insufficient(format!(
                "at least 2 classes are needed, found {}",
                set.n_populated_classes()
            )));
        }

        let split = split_samples(set.n_samples(), config.max_training_samples, config.seed);
        let training = set.select(&split.train);
        let test = set.select(&split.test);

        let preprocessor = FeaturePreprocessor::fit(training.features().view(), &config.preprocessing)?;
        let x_train = preprocessor.apply_batch(training.features().view())?;
        let fitted = model.fit(x_train.view(), training.labels(), set.n_classes(), config.seed)?;

        let x_test = preprocessor.apply_batch(test.features().view())?;
        let predicted = fitted.predict(x_test.view())?;
        let accuracy = accuracy_percent(&predicted, test.labels());

        let report = TrainingReport {
            class_counts: set
                .classes()
                .iter()
                .cloned()
                .zip(training.class_counts())
                .collect(),
            test_set: TrainingReport::test_set_name(split.held_out).to_string(),
            accuracy,
            n_features: set.n_features(),
            n_training: training.n_samples(),
            n_test: test.n_samples(),
        };
        info!(
            model = fitted.name(),
            samples = training.n_samples(),
            classes = set.n_classes(),
            accuracy = format!("{accuracy:.2}%"),
            "trained pixel classifier"
        );

        let tile = calculator.input_tile_size();
        let metadata = PixelClassifierMetadata {
            resolution: config.resolution.clone(),
            input_width: tile,
            input_height: tile,
            output_type: config.output,
            channels: set.classes().to_vec(),
        };
        let classifier = PixelClassifier::new(metadata, calculator, preprocessor, Arc::clone(&fitted))?;
        model.install(fitted)?;
        Ok(TrainingOutcome { classifier, report })
    }

    pub fn metadata(&self) -> &PixelClassifierMetadata {
        &self.metadata
    }

    pub fn feature_calculator(&self) -> &Arc<dyn FeatureCalculator> {
        &self.features
    }

    pub fn preprocessor(&self) -> &FeaturePreprocessor {
        &self.preprocessor
    }

    pub fn model(&self) -> &Arc<dyn StatModel> {
        &self.model
    }

    pub fn output_type(&self) -> OutputType {
        self.metadata.output_type
    }

    pub fn resolution(&self) -> &Resolution {
        &self.metadata.resolution
    }

    /// Classify a region. `request.downsample` should match the working
    /// resolution.
    pub fn classify_region(
        &self,
        image: &dyn ImageServer,
        request: &RegionRequest,
    ) -> Result<ClassifiedRegion> {
        let bands = self.features.compute(image, request)?;
        let (n_bands, rows, cols) = bands.data().dim();
        let data = bands.data();
        let samples = Array2::from_shape_fn((rows * cols, n_bands), |(i, b)| {
            data[[b, i / cols, i % cols]]
        });
        let x = self.preprocessor.apply_batch(samples.view())?;

        match self.metadata.output_type {
            OutputType::Classification => {
                let labels = self.model.predict(x.view())?;
                let values = labels.into_iter().map(class_value).collect::<Result<Vec<u8>>>()?;
                Ok(ClassifiedRegion::Classification(Raster::from_vec(values, rows, cols)?))
            }
            OutputType::Probability => {
                let p = self.model.predict_probabilities(x.view())?;
                let k = p.ncols();
                let stacked = Array3::from_shape_fn((k, rows, cols), |(c, r, col)| {
                    p[[r * cols + col, c]]
                });
                let names = self.metadata.channels.iter().map(|c| c.to_string()).collect();
                Ok(ClassifiedRegion::Probability(BandStack::with_names(stacked, names)?))
            }
        }
    }

    pub fn snapshot(&self) -> PixelClassifierSnapshot {
        PixelClassifierSnapshot {
            metadata: self.metadata.clone(),
            features: self.features.config(),
            preprocessor: self.preprocessor.clone(),
            model: self.model.snapshot(),
        }
    }

    pub fn from_snapshot(snapshot: PixelClassifierSnapshot) -> Result<Self> {
        let features = snapshot.features.build()?;
        Self::new(
            snapshot.metadata,
            features,
            snapshot.preprocessor,
            snapshot.model.into_model(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::{KNearestParams, ModelConfig};
    use crate::features::NeighborParams;
    use geo::{polygon, Polygon};
    use ndarray::Array3;
    use pixclass_core::{InMemoryImage, ObjectHierarchy, PixelCalibration};

    /// Dark left half, bright right half.
    fn halves() -> InMemoryImage {
        InMemoryImage::new(Array3::from_shape_fn((1, 40, 40), |(_, _, c)| {
            if c < 20 { 10.0 } else { 200.0 }
        }))
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
    }

    fn annotations() -> Vec<PathObject> {
        let mut hierarchy = ObjectHierarchy::new();
        hierarchy.add_objects(vec![
            PathObject::annotation(rect(2.0, 2.0, 12.0, 38.0), Some(PathClass::new("Dark"))),
            PathObject::annotation(rect(28.0, 2.0, 38.0, 38.0), Some(PathClass::new("Bright"))),
        ]);
        hierarchy.annotations()
    }

    fn config() -> TrainingConfig {
        let mut config = TrainingConfig::new(Resolution::full(PixelCalibration::default()));
        config.features = FeatureConfig::Neighbors(NeighborParams {
            radius: 0,
            circular: false,
            tile_size: 16,
        });
        config
    }

    #[test]
    fn test_train_and_classify() {
        let image = halves();
        let mut builder = TrainingSampleBuilder::new();
        let model = ClassifierModel::new(ModelConfig::MaximumLikelihood);
        let outcome =
            PixelClassifier::train(&image, &annotations(), &mut builder, &model, &config()).unwrap();
        assert_eq!(outcome.report.test_set, TrainingReport::TRAINING);
        assert!(outcome.report.accuracy > 99.0);
        assert_eq!(
            outcome.classifier.metadata().channels,
            vec![PathClass::new("Dark"), PathClass::new("Bright")]
        );

        let out = outcome
            .classifier
            .classify_region(&image, &RegionRequest::new(16, 0, 8, 4))
            .unwrap();
        assert_eq!((out.rows(), out.cols()), (4, 8));
        assert_eq!(out.class_at(0, 0).unwrap(), 0);
        assert_eq!(out.class_at(3, 7).unwrap(), 1);
    }

    #[test]
    fn test_probability_falls_back_for_knn() {
        let image = halves();
        let mut cfg = config();
        cfg.output = OutputType::Probability;
        let model = ClassifierModel::new(ModelConfig::KNearest(KNearestParams::default()));
        let outcome = PixelClassifier::train(
            &image,
            &annotations(),
            &mut TrainingSampleBuilder::new(),
            &model,
            &cfg,
        )
        .unwrap();
        assert_eq!(outcome.classifier.output_type(), OutputType::Classification);
    }

    #[test]
    fn test_probability_output() {
        let image = halves();
        let mut cfg = config();
        cfg.output = OutputType::Probability;
        let model = ClassifierModel::new(ModelConfig::MaximumLikelihood);
        let outcome = PixelClassifier::train(
            &image,
            &annotations(),
            &mut TrainingSampleBuilder::new(),
            &model,
            &cfg,
        )
        .unwrap();
        let out = outcome
            .classifier
            .classify_region(&image, &RegionRequest::new(0, 0, 40, 2))
            .unwrap();
        let ClassifiedRegion::Probability(bands) = &out else {
            panic!("expected probabilities");
        };
        assert_eq!(bands.n_bands(), 2);
        assert_eq!(bands.names()[1], "Bright");
        let sum = bands.get(0, 1, 30).unwrap() + bands.get(1, 1, 30).unwrap();
        assert!((sum - 1.0).abs() < 1e-4);
        assert_eq!(out.to_classification().unwrap().get(1, 30).unwrap(), 1);
    }

    #[test]
    fn test_held_out_split_when_capped() {
        let image = halves();
        let mut cfg = config();
        cfg.max_training_samples = 50;
        let model = ClassifierModel::new(ModelConfig::MaximumLikelihood);
        let outcome = PixelClassifier::train(
            &image,
            &annotations(),
            &mut TrainingSampleBuilder::new(),
            &model,
            &cfg,
        )
        .unwrap();
        assert_eq!(outcome.report.test_set, TrainingReport::HELD_OUT);
        assert_eq!(outcome.report.n_training, 50);
        assert!(outcome.report.n_test > 0);
    }

    #[test]
    fn test_single_class_fails() {
        let image = halves();
        let only_dark = vec![annotations().remove(0)];
        let model = ClassifierModel::new(ModelConfig::MaximumLikelihood);
        let err = PixelClassifier::train(
            &image,
            &only_dark,
            &mut TrainingSampleBuilder::new(),
            &model,
            &config(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), pixclass_core::ErrorKind::Training);
        assert!(!model.is_trained());
    }

    #[test]
    fn test_class_value_range() {
        assert_eq!(class_value(255).unwrap(), 255);
        let err = class_value(MAX_CLASSIFICATION_CLASSES).unwrap_err();
        assert_eq!(err.kind(), pixclass_core::ErrorKind::Input);

        // Argmax over more channels than a class map can index
        let mut data = Array3::<f32>::zeros((300, 1, 2));
        data[[299, 0, 1]] = 1.0;
        let names = (0..300).map(|i| format!("Class {i}")).collect();
        let region = ClassifiedRegion::Probability(BandStack::with_names(data, names).unwrap());
        assert_eq!(region.class_at(0, 1).unwrap(), 299);
        assert!(region.to_classification().is_err());
    }

    #[test]
    fn test_rejected_classifier_keeps_previous_model() {
        let model = ClassifierModel::new(ModelConfig::KNearest(KNearestParams::default()));
        PixelClassifier::train(
            &halves(),
            &annotations(),
            &mut TrainingSampleBuilder::new(),
            &model,
            &config(),
        )
        .unwrap();
        let previous = model.fitted().unwrap();

        // One 2×2 annotation per class, more classes than a class map can hold
        let image = InMemoryImage::new(Array3::from_shape_fn((1, 64, 64), |(_, r, c)| {
            (r * 64 + c) as f32
        }));
        let many: Vec<PathObject> = (0..=MAX_CLASSIFICATION_CLASSES)
            .map(|i| {
                let (x, y) = ((i % 32) as f64 * 2.0, (i / 32) as f64 * 2.0);
                PathObject::annotation(
                    rect(x, y, x + 2.0, y + 2.0),
                    Some(PathClass::new(format!("Class {i}"))),
                )
            })
            .collect();
        let err = PixelClassifier::train(
            &image,
            &many,
            &mut TrainingSampleBuilder::new(),
            &model,
            &config(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), pixclass_core::ErrorKind::Input);
        assert!(Arc::ptr_eq(&model.fitted().unwrap(), &previous));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let image = halves();
        let model = ClassifierModel::new(ModelConfig::default());
        let outcome = PixelClassifier::train(
            &image,
            &annotations(),
            &mut TrainingSampleBuilder::new(),
            &model,
            &config(),
        )
        .unwrap();
        let json = serde_json::to_string(&outcome.classifier.snapshot()).unwrap();
        let restored =
            PixelClassifier::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        let request = RegionRequest::new(0, 0, 40, 40);
        assert_eq!(
            restored.classify_region(&image, &request).unwrap(),
            outcome.classifier.classify_region(&image, &request).unwrap()
        );
    }
}
