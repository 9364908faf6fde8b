//! Supervised pixel classifiers
//!
//! Variants share the [`StatModel`] contract:
//! - **Random trees**: bagged decision trees (default)
//! - **K nearest**: brute-force neighbour vote, hard labels only
//! - **Logistic regression**: softmax regression
//! - **Maximum likelihood**: per-class Gaussian

mod evaluation;
mod knn;
mod likelihood;
mod logistic;
mod model;
mod rtrees;

pub use evaluation::{
    accuracy_percent, split_samples, SampleSplit, TrainingReport, DEFAULT_MAX_TRAINING_SAMPLES,
    DEFAULT_SEED,
};
pub use knn::{KNearest, KNearestParams};
pub use likelihood::MaximumLikelihood;
pub use logistic::{LogisticParams, LogisticRegression};
pub use model::{ClassifierModel, ModelConfig, ModelSnapshot, StatModel};
pub use rtrees::{RandomTrees, RandomTreesParams};
