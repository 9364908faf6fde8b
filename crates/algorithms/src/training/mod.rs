//! Training data construction
//!
//! Converts classified annotations into `(feature vector, class index)` pairs
//! at a working resolution:
//! - [`rasterize_polygon`]: which working pixels an annotation covers
//! - [`BoundaryStrategy`]: how pixels near an annotation's outline are labelled
//! - [`TrainingSampleBuilder`]: incremental builder with stable class ordering

mod boundary;
mod builder;
mod labels;
mod rasterize;

pub use boundary::BoundaryStrategy;
pub use builder::{BuildStats, TrainingSampleBuilder};
pub use labels::ClassLabels;
pub use rasterize::{rasterize_polygon, working_bounds, PixelLabel, RasterizedRegion};
pub(crate) use rasterize::point_segment_distance;

use ndarray::{Array2, Axis};
use pixclass_core::{Error, PathClass, Result};

/// Labelled feature vectors.
///
/// Invariants: every row of `features` has `feature_names.len()` values and
/// every label indexes into `classes`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    features: Array2<f32>,
    labels: Vec<usize>,
    classes: Vec<PathClass>,
    feature_names: Vec<String>,
}

impl TrainingSet {
    pub fn new(
        features: Array2<f32>,
        labels: Vec<usize>,
        classes: Vec<PathClass>,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(Error::SizeMismatch {
                er: labels.len(),
                ec: feature_names.len(),
                ar: features.nrows(),
                ac: features.ncols(),
            });
        }
        if features.ncols() != feature_names.len() {
            return Err(Error::FeatureCountMismatch {
                expected: feature_names.len(),
                actual: features.ncols(),
            });
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= classes.len()) {
            return Err(Error::invalid_parameter(
                "labels",
                bad,
                format!("only {} classes", classes.len()),
            ));
        }
        Ok(Self {
            features,
            labels,
            classes,
            feature_names,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.labels.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn features(&self) -> &Array2<f32> {
        &self.features
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn classes(&self) -> &[PathClass] {
        &self.classes
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Number of samples per class index.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for &l in &self.labels {
            counts[l] += 1;
        }
        counts
    }

    /// Number of classes that have at least one sample.
    pub fn n_populated_classes(&self) -> usize {
        self.class_counts().iter().filter(|&&n| n > 0).count()
    }

    /// Samples at the given row indices, keeping classes and names.
    pub fn select(&self, indices: &[usize]) -> TrainingSet {
        TrainingSet {
            features: self.features.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            classes: self.classes.clone(),
            feature_names: self.feature_names.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_set_validation() {
        let classes = vec![PathClass::new("a"), PathClass::new("b")];
        let names = vec!["f".to_string()];
        assert!(TrainingSet::new(Array2::zeros((2, 1)), vec![0, 1], classes.clone(), names.clone()).is_ok());
        assert!(TrainingSet::new(Array2::zeros((2, 1)), vec![0], classes.clone(), names.clone()).is_err());
        assert!(TrainingSet::new(Array2::zeros((2, 2)), vec![0, 1], classes.clone(), names.clone()).is_err());
        assert!(TrainingSet::new(Array2::zeros((1, 1)), vec![2], classes, names).is_err());
    }

    #[test]
    fn test_select_and_counts() {
        let set = TrainingSet::new(
            Array2::from_shape_fn((4, 1), |(r, _)| r as f32),
            vec![0, 1, 1, 1],
            vec![PathClass::new("a"), PathClass::new("b")],
            vec!["f".into()],
        )
        .unwrap();
        assert_eq!(set.class_counts(), vec![1, 3]);
        let sub = set.select(&[3, 0]);
        assert_eq!(sub.labels(), &[1, 0]);
        assert_eq!(sub.features()[[0, 0]], 3.0);
        assert_eq!(sub.n_populated_classes(), 2);
    }
}
