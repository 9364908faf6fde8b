//! K-nearest neighbours by brute-force Euclidean search

use super::model::{ModelConfig, ModelSnapshot, StatModel};
use ndarray::{Array2, ArrayView2};
use pixclass_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Parameters for [`KNearest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KNearestParams {
    /// Number of neighbours that vote
    pub k: usize,
}

impl Default for KNearestParams {
    fn default() -> Self {
        Self { k: 5 }
    }
}

/// Fitted KNN model: the stored training set.
///
/// Produces hard labels only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNearest {
    params: KNearestParams,
    /// `params.k` capped at the sample count
    k: usize,
    n_classes: usize,
    samples: Array2<f32>,
    labels: Vec<usize>,
}

impl KNearest {
    pub const NAME: &'static str = "K nearest";

    pub fn fit(
        params: &KNearestParams,
        x: ArrayView2<f32>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<Self> {
        if params.k == 0 {
            return Err(Error::invalid_parameter("k", 0, "must be > 0"));
        }
        Ok(Self {
            params: params.clone(),
            k: params.k.min(y.len()),
            n_classes,
            samples: x.to_owned(),
            labels: y.to_vec(),
        })
    }
}

impl StatModel for KNearest {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> ModelConfig {
        ModelConfig::KNearest(self.params.clone())
    }

    fn n_features(&self) -> usize {
        self.samples.ncols()
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn supports_probabilities(&self) -> bool {
        false
    }

    /// Majority vote; ties go to the class with the smaller distance sum,
    /// then to the lower class index.
    fn predict_one(&self, x: &[f32]) -> usize {
        let mut nearest: Vec<(f32, usize)> = self
            .samples
            .rows()
            .into_iter()
            .zip(&self.labels)
            .map(|(row, &label)| {
                let d: f32 = row.iter().zip(x).map(|(a, b)| (a - b).powi(2)).sum();
                (d, label)
            })
            .collect();
        let k = self.k.min(nearest.len());
        if k == 0 {
            return 0;
        }
        nearest.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));

        let mut votes = vec![(0usize, 0f32); self.n_classes];
        for &(d, label) in &nearest[..k] {
            votes[label].0 += 1;
            votes[label].1 += d.sqrt();
        }
        let mut best = 0;
        for (c, &(count, dist)) in votes.iter().enumerate() {
            let (best_count, best_dist) = votes[best];
            if count > best_count || (count == best_count && count > 0 && dist < best_dist) {
                best = c;
            }
        }
        best
    }

    fn probabilities_one(&self, _x: &[f32]) -> Option<Vec<f32>> {
        None
    }

    fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot::KNearest(self.clone())
    }
}
