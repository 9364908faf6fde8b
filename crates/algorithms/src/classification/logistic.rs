//! Multinomial logistic regression
//!
//! Softmax model trained by full-batch gradient descent with L2 penalty.
//! Inputs are standardized internally so the learning rate does not depend
//! on feature scale.

use super::model::{argmax, ModelConfig, ModelSnapshot, StatModel};
use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut1, Axis};
use pixclass_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Parameters for [`LogisticRegression`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub learning_rate: f64,
    pub iterations: usize,
    /// L2 penalty on the weights (not the bias)
    pub l2: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            iterations: 300,
            l2: 1e-4,
        }
    }
}

/// Fitted softmax regression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    params: LogisticParams,
    mean: Vec<f64>,
    scale: Vec<f64>,
    /// `n_classes × n_features`
    weights: Array2<f64>,
    bias: Vec<f64>,
}

/// In place; rows of a one-feature logits matrix are not contiguous.
fn softmax(mut scores: ArrayViewMut1<f64>) {
    let max = scores.fold(f64::NEG_INFINITY, |m, &s| m.max(s));
    scores.mapv_inplace(|s| (s - max).exp());
    let sum = scores.sum();
    scores /= sum;
}

impl LogisticRegression {
    pub const NAME: &'static str = "Logistic regression";

    pub fn fit(
        params: &LogisticParams,
        x: ArrayView2<f32>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<Self> {
        if !(params.learning_rate > 0.0) {
            return Err(Error::invalid_parameter(
                "learning_rate",
                params.learning_rate,
                "must be > 0",
            ));
        }
        let (n, dims) = x.dim();
        let data = x.mapv(f64::from);
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::insufficient("no training samples"))?;
        let std = data.std_axis(Axis(0), 0.0);
        let scale: Array1<f64> = std.mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let z = (&data - &mean) / &scale;

        let mut weights = Array2::<f64>::zeros((n_classes, dims));
        let mut bias = Array1::<f64>::zeros(n_classes);
        let inv_n = 1.0 / n as f64;

        for _ in 0..params.iterations {
            let mut logits = z.dot(&weights.t()) + &bias;
            for (mut row, &label) in logits.axis_iter_mut(Axis(0)).zip(y) {
                softmax(row.view_mut());
                row[label] -= 1.0;
            }
            // logits now holds (p - onehot)
            let grad_w = logits.t().dot(&z) * inv_n + &weights * params.l2;
            let grad_b = logits.sum_axis(Axis(0)) * inv_n;
            weights.scaled_add(-params.learning_rate, &grad_w);
            bias.scaled_add(-params.learning_rate, &grad_b);
        }

        Ok(Self {
            params: params.clone(),
            mean: mean.to_vec(),
            scale: scale.to_vec(),
            weights,
            bias: bias.to_vec(),
        })
    }

    fn scores(&self, x: &[f32]) -> Vec<f64> {
        let z: Vec<f64> = x
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&v, (m, s))| (v as f64 - m) / s)
            .collect();
        let mut scores: Vec<f64> = self
            .weights
            .rows()
            .into_iter()
            .zip(&self.bias)
            .map(|(w, b)| w.iter().zip(&z).map(|(a, b)| a * b).sum::<f64>() + b)
            .collect();
        softmax(ArrayViewMut1::from(&mut scores[..]));
        scores
    }
}

impl StatModel for LogisticRegression {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> ModelConfig {
        ModelConfig::LogisticRegression(self.params.clone())
    }

    fn n_features(&self) -> usize {
        self.mean.len()
    }

    fn n_classes(&self) -> usize {
        self.bias.len()
    }

    fn predict_one(&self, x: &[f32]) -> usize {
        let p: Vec<f32> = self.scores(x).into_iter().map(|v| v as f32).collect();
        argmax(&p)
    }

    fn probabilities_one(&self, x: &[f32]) -> Option<Vec<f32>> {
        Some(self.scores(x).into_iter().map(|v| v as f32).collect())
    }

    fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot::LogisticRegression(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_three_classes_on_a_line() {
        let x = array![[0.0f32], [0.5], [10.0], [10.5], [20.0], [20.5]];
        let y = [0, 0, 1, 1, 2, 2];
        let params = LogisticParams {
            iterations: 2000,
            ..Default::default()
        };
        let model = LogisticRegression::fit(&params, x.view(), &y, 3).unwrap();
        assert_eq!(model.predict(x.view()).unwrap(), y);
    }

    #[test]
    fn test_single_feature_probabilities() {
        let x = array![[0.0f32], [0.5], [10.0], [10.5], [20.0], [20.5]];
        let model = LogisticRegression::fit(&LogisticParams::default(), x.view(), &[0, 0, 1, 1, 2, 2], 3).unwrap();
        // 10.25 is the feature mean, so only the biases separate the classes
        let p = model.probabilities_one(&[10.25]).unwrap();
        assert_relative_eq!(p.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        assert!(p[1] > p[0] && p[1] > p[2]);
    }

    #[test]
    fn test_softmax_strided_row() {
        let mut logits = Array2::<f64>::zeros((3, 2)).reversed_axes();
        logits[[0, 0]] = 1.0;
        softmax(logits.row_mut(0));
        assert_relative_eq!(logits.row(0).sum(), 1.0, epsilon = 1e-12);
        assert!(logits[[0, 0]] > logits[[0, 1]]);
    }

    #[test]
    fn test_probabilities_normalized() {
        let x = array![[0.0f32, 1.0], [1.0, 0.0]];
        let model = LogisticRegression::fit(&LogisticParams::default(), x.view(), &[0, 1], 2).unwrap();
        let p = model.probabilities_one(&[0.3, 0.7]).unwrap();
        assert_relative_eq!(p.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
    }
}
