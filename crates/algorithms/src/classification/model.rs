//! Classifier abstraction
//!
//! [`ModelConfig`] describes an untrained model; fitting it produces an
//! immutable [`StatModel`]. [`ClassifierModel`] holds the current fitted
//! state and swaps it atomically after each successful training run, so a
//! failed run never leaves a half-trained model behind.

use super::knn::{KNearest, KNearestParams};
use super::likelihood::MaximumLikelihood;
use super::logistic::{LogisticParams, LogisticRegression};
use super::rtrees::{RandomTrees, RandomTreesParams};
use crate::maybe_rayon::*;
use ndarray::{Array2, ArrayView2};
use pixclass_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

/// A fitted classifier.
pub trait StatModel: Send + Sync + fmt::Debug {
    /// Display name of the model variant
    fn name(&self) -> &'static str;

    /// Expected feature vector length
    fn n_features(&self) -> usize;

    /// Number of output classes
    fn n_classes(&self) -> usize;

    /// Whether [`probabilities_one`](Self::probabilities_one) returns values
    fn supports_probabilities(&self) -> bool {
        true
    }

    /// Class index for one vector
    fn predict_one(&self, x: &[f32]) -> usize;

    /// Per-class scores in `[0, 1]` summing to 1, or `None` if unsupported
    fn probabilities_one(&self, x: &[f32]) -> Option<Vec<f32>>;

    /// Serializable copy of the fitted state
    fn snapshot(&self) -> ModelSnapshot;

    /// Configuration this model was fitted with
    fn config(&self) -> ModelConfig;

    /// Class indices for every row.
    fn predict(&self, samples: ArrayView2<f32>) -> Result<Vec<usize>> {
        check_features(self.n_features(), samples.ncols())?;
        Ok((0..samples.nrows())
            .into_par_iter()
            .map(|i| {
                let row = samples.row(i).to_vec();
                self.predict_one(&row)
            })
            .collect())
    }

    /// `n_samples × n_classes` probabilities.
    fn predict_probabilities(&self, samples: ArrayView2<f32>) -> Result<Array2<f32>> {
        if !self.supports_probabilities() {
            return Err(Error::UnsupportedCapability {
                model: self.name().to_string(),
                capability: "probability output",
            });
        }
        check_features(self.n_features(), samples.ncols())?;
        let n_classes = self.n_classes();
        let rows: Vec<Vec<f32>> = (0..samples.nrows())
            .into_par_iter()
            .map(|i| {
                let row = samples.row(i).to_vec();
                self.probabilities_one(&row)
                    .unwrap_or_else(|| vec![0.0; n_classes])
            })
            .collect();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((samples.nrows(), n_classes), flat)
            .map_err(|e| Error::Other(e.to_string()))
    }
}

fn check_features(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::FeatureCountMismatch { expected, actual });
    }
    Ok(())
}

/// Index of the largest score; ties go to the lowest index.
pub(crate) fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (i, &s) in scores.iter().enumerate() {
        if s > scores[best] {
            best = i;
        }
    }
    best
}

/// Untrained model description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelConfig {
    RandomTrees(RandomTreesParams),
    KNearest(KNearestParams),
    LogisticRegression(LogisticParams),
    MaximumLikelihood,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::RandomTrees(RandomTreesParams::default())
    }
}

impl ModelConfig {
    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            ModelConfig::RandomTrees(_) => RandomTrees::NAME,
            ModelConfig::KNearest(_) => KNearest::NAME,
            ModelConfig::LogisticRegression(_) => LogisticRegression::NAME,
            ModelConfig::MaximumLikelihood => MaximumLikelihood::NAME,
        }
    }

    /// Whether fitted models of this variant produce probabilities.
    pub fn supports_probabilities(&self) -> bool {
        !matches!(self, ModelConfig::KNearest(_))
    }

    /// Fit a new model.
    ///
    /// Fails with [`Error::InsufficientTrainingData`] when there are no
    /// samples or fewer than two distinct classes.
    pub fn fit(
        &self,
        features: ArrayView2<f32>,
        labels: &[usize],
        n_classes: usize,
        seed: u64,
    ) -> Result<Arc<dyn StatModel>> {
        if features.nrows() != labels.len() {
            return Err(Error::SizeMismatch {
                er: labels.len(),
                ec: features.ncols(),
                ar: features.nrows(),
                ac: features.ncols(),
            });
        }
        if labels.is_empty() {
            return Err(Error::insufficient("no training samples"));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= n_classes) {
            return Err(Error::invalid_parameter(
                "labels",
                bad,
                format!("only {n_classes} classes"),
            ));
        }
        let mut present = vec![false; n_classes];
        for &l in labels {
            present[l] = true;
        }
        let distinct = present.iter().filter(|&&p| p).count();
        if distinct < 2 {
            return Err(Error::insufficient(format!(
                "at least 2 classes are needed, found {distinct}"
            )));
        }

        Ok(match self {
            ModelConfig::RandomTrees(p) => {
                Arc::new(RandomTrees::fit(p, features, labels, n_classes, seed)?)
            }
            ModelConfig::KNearest(p) => Arc::new(KNearest::fit(p, features, labels, n_classes)?),
            ModelConfig::LogisticRegression(p) => {
                Arc::new(LogisticRegression::fit(p, features, labels, n_classes)?)
            }
            ModelConfig::MaximumLikelihood => {
                Arc::new(MaximumLikelihood::fit(features, labels, n_classes)?)
            }
        })
    }
}

/// Serializable fitted state of any variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSnapshot {
    RandomTrees(RandomTrees),
    KNearest(KNearest),
    LogisticRegression(LogisticRegression),
    MaximumLikelihood(MaximumLikelihood),
}

impl ModelSnapshot {
    pub fn into_model(self) -> Arc<dyn StatModel> {
        match self {
            ModelSnapshot::RandomTrees(m) => Arc::new(m),
            ModelSnapshot::KNearest(m) => Arc::new(m),
            ModelSnapshot::LogisticRegression(m) => Arc::new(m),
            ModelSnapshot::MaximumLikelihood(m) => Arc::new(m),
        }
    }
}

/// A model slot whose fitted state is replaced, never mutated.
#[derive(Debug)]
pub struct ClassifierModel {
    config: ModelConfig,
    state: RwLock<Option<Arc<dyn StatModel>>>,
}

impl ClassifierModel {
    /// An untrained model.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
        }
    }

    /// A model with an already fitted state.
    pub fn with_fitted(config: ModelConfig, fitted: Arc<dyn StatModel>) -> Self {
        Self {
            config,
            state: RwLock::new(Some(fitted)),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Fit a new state without installing it.
    pub fn fit(
        &self,
        features: ArrayView2<f32>,
        labels: &[usize],
        n_classes: usize,
        seed: u64,
    ) -> Result<Arc<dyn StatModel>> {
        self.config.fit(features, labels, n_classes, seed)
    }

    /// Replace the fitted state.
    pub fn install(&self, fitted: Arc<dyn StatModel>) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| Error::Other("model lock poisoned".into()))?;
        *state = Some(fitted);
        Ok(())
    }

    /// Fit and install a new state. On failure the previous state is kept.
    pub fn train(
        &self,
        features: ArrayView2<f32>,
        labels: &[usize],
        n_classes: usize,
        seed: u64,
    ) -> Result<Arc<dyn StatModel>> {
        let fitted = self.fit(features, labels, n_classes, seed)?;
        self.install(Arc::clone(&fitted))?;
        Ok(fitted)
    }

    /// Current fitted state, if trained.
    pub fn fitted(&self) -> Option<Arc<dyn StatModel>> {
        self.state.read().ok().and_then(|s| s.clone())
    }

    pub fn is_trained(&self) -> bool {
        self.fitted().is_some()
    }

    fn require_fitted(&self) -> Result<Arc<dyn StatModel>> {
        self.fitted()
            .ok_or_else(|| Error::insufficient(format!("{} has not been trained", self.config.name())))
    }

    pub fn predict(&self, samples: ArrayView2<f32>) -> Result<Vec<usize>> {
        self.require_fitted()?.predict(samples)
    }

    pub fn predict_probabilities(&self, samples: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.require_fitted()?.predict_probabilities(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_clusters() -> (Array2<f32>, Vec<usize>) {
        let x = array![
            [0.0f32, 0.1],
            [0.2, 0.0],
            [0.1, 0.2],
            [5.0, 5.1],
            [5.2, 4.9],
            [4.9, 5.0]
        ];
        (x, vec![0, 0, 0, 1, 1, 1])
    }

    #[test]
    fn test_single_class_keeps_previous_state() {
        let model = ClassifierModel::new(ModelConfig::MaximumLikelihood);
        let (x, y) = two_clusters();
        let first = model.train(x.view(), &y, 2, 100).unwrap();

        let err = model.train(x.view(), &[0; 6], 2, 100).unwrap_err();
        assert_eq!(err.kind(), pixclass_core::ErrorKind::Training);
        let current = model.fitted().unwrap();
        assert!(Arc::ptr_eq(&first, &current));
    }

    #[test]
    fn test_untrained_model_errors() {
        let model = ClassifierModel::new(ModelConfig::default());
        assert!(!model.is_trained());
        let (x, _) = two_clusters();
        assert!(model.predict(x.view()).is_err());
    }

    #[test]
    fn test_knn_lacks_probabilities() {
        let config = ModelConfig::KNearest(KNearestParams { k: 1 });
        assert!(!config.supports_probabilities());
        let model = ClassifierModel::new(config);
        let (x, y) = two_clusters();
        model.train(x.view(), &y, 2, 100).unwrap();
        let err = model.predict_probabilities(x.view()).unwrap_err();
        assert_eq!(err.kind(), pixclass_core::ErrorKind::Capability);
        assert_eq!(model.predict(x.view()).unwrap(), y);
    }

    #[test]
    fn test_every_variant_separates_clusters() {
        let (x, y) = two_clusters();
        for config in [
            ModelConfig::RandomTrees(RandomTreesParams::default()),
            ModelConfig::KNearest(KNearestParams::default()),
            ModelConfig::LogisticRegression(LogisticParams::default()),
            ModelConfig::MaximumLikelihood,
        ] {
            let fitted = config.fit(x.view(), &y, 2, 100).unwrap();
            assert_eq!(fitted.predict(x.view()).unwrap(), y, "{}", config.name());
            let snapshot = serde_json::to_string(&fitted.snapshot()).unwrap();
            let restored: ModelSnapshot = serde_json::from_str(&snapshot).unwrap();
            assert_eq!(restored.into_model().predict(x.view()).unwrap(), y);
        }
    }

    #[test]
    fn test_feature_count_checked() {
        let (x, y) = two_clusters();
        let fitted = ModelConfig::MaximumLikelihood.fit(x.view(), &y, 2, 1).unwrap();
        let wrong = Array2::<f32>::zeros((2, 3));
        assert!(matches!(
            fitted.predict(wrong.view()),
            Err(Error::FeatureCountMismatch { expected: 2, actual: 3 })
        ));
    }
}
