//! Training/test split and accuracy reporting
//!
//! The test portion is only ever used to compute the reported accuracy; it
//! never reaches the model or the preprocessor fit.

use crate::rng::Lcg;
use pixclass_core::PathClass;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default cap on training samples
pub const DEFAULT_MAX_TRAINING_SAMPLES: usize = 100_000;

/// Default shuffle seed
pub const DEFAULT_SEED: u64 = 100;

/// Row indices of the training and test portions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    /// `false` when accuracy is reported on the training rows themselves
    pub held_out: bool,
}

/// Shuffle `n` rows with `seed`, keep at most `max_training` for training.
///
/// When the cap drops samples, the dropped rows form the held-out test set.
/// Otherwise every row trains and the test set is the (shuffled) training set.
pub fn split_samples(n: usize, max_training: usize, seed: u64) -> SampleSplit {
    let mut order: Vec<usize> = (0..n).collect();
    Lcg::new(seed).shuffle(&mut order);
    if max_training > 0 && n > max_training {
        let test = order.split_off(max_training);
        SampleSplit {
            train: order,
            test,
            held_out: true,
        }
    } else {
        SampleSplit {
            test: order.clone(),
            train: order,
            held_out: false,
        }
    }
}

/// Percentage of positions where `predicted` equals `truth`.
pub fn accuracy_percent(predicted: &[usize], truth: &[usize]) -> f64 {
    let n = predicted.len().min(truth.len());
    if n == 0 {
        return 0.0;
    }
    let correct = predicted.iter().zip(truth).filter(|(p, t)| p == t).count();
    100.0 * correct as f64 / n as f64
}

/// Summary of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Training samples per class, in class index order
    pub class_counts: Vec<(PathClass, usize)>,
    /// Name of the set accuracy was measured on
    pub test_set: String,
    /// Accuracy in percent
    pub accuracy: f64,
    pub n_features: usize,
    pub n_training: usize,
    pub n_test: usize,
}

impl TrainingReport {
    pub const HELD_OUT: &'static str = "HELD-OUT TRAINING SET";
    pub const TRAINING: &'static str = "TRAINING SET";

    pub fn test_set_name(held_out: bool) -> &'static str {
        if held_out {
            Self::HELD_OUT
        } else {
            Self::TRAINING
        }
    }
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Training samples")?;
        for (class, n) in &self.class_counts {
            writeln!(f, "  {class}: {n}")?;
        }
        writeln!(f, "Number of features: {}", self.n_features)?;
        write!(
            f,
            "Accuracy on {} ({} samples): {:.2}%",
            self.test_set, self.n_test, self.accuracy
        )
    }
}
