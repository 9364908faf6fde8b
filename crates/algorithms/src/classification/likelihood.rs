//! Gaussian maximum likelihood classifier
//!
//! Each class is modelled as a multivariate normal with its own mean and
//! covariance. A small ridge keeps covariances positive definite. Priors are
//! equal; probabilities are the normalized likelihoods.

use super::model::{argmax, ModelConfig, ModelSnapshot, StatModel};
use ndarray::{Array2, ArrayView2};
use pixclass_core::{Error, Result};
use serde::{Deserialize, Serialize};

const RIDGE: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClassGaussian {
    mean: Vec<f64>,
    /// Lower Cholesky factor of the covariance
    chol: Array2<f64>,
    /// `-0.5 * ln|Σ|`
    log_norm: f64,
}

impl ClassGaussian {
    fn log_likelihood(&self, x: &[f32]) -> f64 {
        // Solve L·u = (x − μ) by forward substitution; Mahalanobis = |u|²
        let n = self.mean.len();
        let mut u = vec![0.0; n];
        for i in 0..n {
            let mut s = x[i] as f64 - self.mean[i];
            for (j, uj) in u.iter().enumerate().take(i) {
                s -= self.chol[[i, j]] * uj;
            }
            u[i] = s / self.chol[[i, i]];
        }
        self.log_norm - 0.5 * u.iter().map(|v| v * v).sum::<f64>()
    }
}

/// Fitted maximum likelihood model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaximumLikelihood {
    n_features: usize,
    /// `None` for classes without training samples
    classes: Vec<Option<ClassGaussian>>,
}

fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if s <= 0.0 {
                    return None;
                }
                l[[i, i]] = s.sqrt();
            } else {
                l[[i, j]] = s / l[[j, j]];
            }
        }
    }
    Some(l)
}

impl MaximumLikelihood {
    pub const NAME: &'static str = "Maximum likelihood";

    pub fn fit(x: ArrayView2<f32>, y: &[usize], n_classes: usize) -> Result<Self> {
        let dims = x.ncols();
        let mut classes = Vec::with_capacity(n_classes);

        for c in 0..n_classes {
            let rows: Vec<usize> = (0..y.len()).filter(|&i| y[i] == c).collect();
            if rows.is_empty() {
                classes.push(None);
                continue;
            }
            let n = rows.len() as f64;
            let mut mean = vec![0.0; dims];
            for &i in &rows {
                for (j, m) in mean.iter_mut().enumerate() {
                    *m += x[[i, j]] as f64;
                }
            }
            mean.iter_mut().for_each(|m| *m /= n);

            let mut cov = Array2::<f64>::zeros((dims, dims));
            for &i in &rows {
                for a in 0..dims {
                    let da = x[[i, a]] as f64 - mean[a];
                    for b in 0..=a {
                        cov[[a, b]] += da * (x[[i, b]] as f64 - mean[b]);
                    }
                }
            }
            // Mean diagonal variance sets the ridge scale
            let trace: f64 = (0..dims).map(|a| cov[[a, a]] / n).sum::<f64>() / dims.max(1) as f64;
            let ridge = RIDGE * trace.max(1.0);
            for a in 0..dims {
                for b in 0..=a {
                    cov[[a, b]] /= n;
                    cov[[b, a]] = cov[[a, b]];
                }
                cov[[a, a]] += ridge;
            }

            let chol = cholesky(&cov).ok_or_else(|| {
                Error::Algorithm(format!("covariance of class {c} is not positive definite"))
            })?;
            let log_det: f64 = (0..dims).map(|a| chol[[a, a]].ln()).sum::<f64>() * 2.0;
            classes.push(Some(ClassGaussian {
                mean,
                chol,
                log_norm: -0.5 * log_det,
            }));
        }

        Ok(Self {
            n_features: dims,
            classes,
        })
    }

    fn posteriors(&self, x: &[f32]) -> Vec<f32> {
        let ll: Vec<f64> = self
            .classes
            .iter()
            .map(|c| c.as_ref().map_or(f64::NEG_INFINITY, |g| g.log_likelihood(x)))
            .collect();
        let max = ll.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return vec![0.0; ll.len()];
        }
        let exp: Vec<f64> = ll.iter().map(|&v| (v - max).exp()).collect();
        let sum: f64 = exp.iter().sum();
        exp.iter().map(|&v| (v / sum) as f32).collect()
    }
}

impl StatModel for MaximumLikelihood {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> ModelConfig {
        ModelConfig::MaximumLikelihood
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.classes.len()
    }

    fn predict_one(&self, x: &[f32]) -> usize {
        argmax(&self.posteriors(x))
    }

    fn probabilities_one(&self, x: &[f32]) -> Option<Vec<f32>> {
        Some(self.posteriors(x))
    }

    fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot::MaximumLikelihood(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_cholesky() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(&a).unwrap();
        assert_relative_eq!(l[[0, 0]], 2.0);
        assert_relative_eq!(l[[1, 0]], 1.0);
        assert_relative_eq!(l[[1, 1]], 2f64.sqrt());
        assert!(cholesky(&array![[-1.0]]).is_none());
    }

    #[test]
    fn test_variance_matters() {
        // Narrow class at 0, wide class at 3: a point at 1.5 belongs to the wide one
        let x = array![[-0.1f32], [0.0], [0.1], [1.0], [3.0], [5.0]];
        let y = [0, 0, 0, 1, 1, 1];
        let model = MaximumLikelihood::fit(x.view(), &y, 2).unwrap();
        assert_eq!(model.predict_one(&[1.5]), 1);
        assert_eq!(model.predict_one(&[0.05]), 0);
    }

    #[test]
    fn test_empty_class_never_predicted() {
        let x = array![[0.0f32], [0.2], [5.0], [5.2]];
        let model = MaximumLikelihood::fit(x.view(), &[0, 0, 2, 2], 3).unwrap();
        let p = model.probabilities_one(&[2.6]).unwrap();
        assert_eq!(p[1], 0.0);
        assert_relative_eq!(p.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
    }
}
