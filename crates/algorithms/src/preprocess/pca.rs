//! Principal component projection of feature vectors
//!
//! Builds the covariance matrix of the training vectors and extracts
//! eigenvalues/eigenvectors via Jacobi iteration, then keeps the leading
//! components that explain the requested fraction of variance.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use pixclass_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Fitted projection onto leading principal components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaProjection {
    /// Per-feature mean subtracted before projection
    pub mean: Vec<f64>,
    /// `n_components × n_inputs`, one unit eigenvector per row
    pub components: Array2<f64>,
    /// Variance along each retained component
    pub eigenvalues: Vec<f64>,
    /// Scale projected values to unit variance
    pub whiten: bool,
}

impl PcaProjection {
    /// Fit on `samples` (rows are vectors), keeping enough components to
    /// explain at least `retained_variance` (in `(0, 1]`) of the total.
    pub fn fit(samples: ArrayView2<f64>, retained_variance: f64, whiten: bool) -> Result<Self> {
        if !(retained_variance > 0.0 && retained_variance <= 1.0) {
            return Err(Error::invalid_parameter(
                "retained_variance",
                retained_variance,
                "must be in (0, 1]",
            ));
        }
        let (n, dims) = samples.dim();
        if n < 2 || dims == 0 {
            return Err(Error::insufficient(format!(
                "PCA needs at least 2 samples, got {n}"
            )));
        }

        let mean = samples
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::Algorithm("empty sample matrix".into()))?;
        let centered = &samples - &mean;
        let cov = centered.t().dot(&centered) / (n - 1) as f64;

        let (values, vectors) = jacobi_eigen(&cov);

        // Sort by eigenvalue descending
        let mut order: Vec<usize> = (0..dims).collect();
        order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

        let total: f64 = values.iter().map(|v| v.max(0.0)).sum();
        let mut kept = 0;
        let mut explained = 0.0;
        for &i in &order {
            kept += 1;
            explained += values[i].max(0.0);
            if total <= 0.0 || explained / total >= retained_variance - 1e-12 {
                break;
            }
        }

        let mut components = Array2::<f64>::zeros((kept, dims));
        let mut eigenvalues = Vec::with_capacity(kept);
        for (k, &i) in order.iter().take(kept).enumerate() {
            let mut v = vectors.column(i).to_owned();
            // Deterministic sign: largest-magnitude entry positive
            let pivot = v.iter().cloned().fold(0.0f64, |m, x| if x.abs() > m.abs() { x } else { m });
            if pivot < 0.0 {
                v.mapv_inplace(|x| -x);
            }
            components.row_mut(k).assign(&v);
            eigenvalues.push(values[i].max(0.0));
        }

        Ok(Self {
            mean: mean.to_vec(),
            components,
            eigenvalues,
            whiten,
        })
    }

    pub fn n_inputs(&self) -> usize {
        self.mean.len()
    }

    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }

    fn scale(&self, k: usize) -> f64 {
        if self.whiten && self.eigenvalues[k] > 1e-12 {
            self.eigenvalues[k].sqrt()
        } else {
            1.0
        }
    }

    /// Project one vector.
    pub fn project(&self, x: &[f64]) -> Vec<f64> {
        (0..self.n_components())
            .map(|k| {
                let dot: f64 = self
                    .components
                    .row(k)
                    .iter()
                    .zip(x.iter().zip(&self.mean))
                    .map(|(w, (v, m))| w * (v - m))
                    .sum();
                dot / self.scale(k)
            })
            .collect()
    }

    /// Inverse projection; exact only when no components were dropped.
    pub fn reconstruct(&self, y: &[f64]) -> Vec<f64> {
        let mut x = Array1::from(self.mean.clone());
        for (k, &v) in y.iter().enumerate().take(self.n_components()) {
            x.scaled_add(v * self.scale(k), &self.components.row(k));
        }
        x.to_vec()
    }
}

/// Jacobi eigenvalue algorithm for symmetric matrices.
///
/// Returns eigenvalues and a matrix whose columns are the eigenvectors.
fn jacobi_eigen(matrix: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = matrix.nrows();
    let max_iter = 100 * n * n;
    let eps = 1e-12;
    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);

    for _ in 0..max_iter {
        // Find largest off-diagonal element
        let mut max_val = 0.0;
        let (mut p, mut q) = (0, 1);
        for i in 0..n {
            for j in (i + 1)..n {
                if a[[i, j]].abs() > max_val {
                    max_val = a[[i, j]].abs();
                    p = i;
                    q = j;
                }
            }
        }
        if max_val < eps {
            break;
        }

        let theta = if (a[[p, p]] - a[[q, q]]).abs() < eps {
            std::f64::consts::FRAC_PI_4
        } else {
            0.5 * (2.0 * a[[p, q]] / (a[[p, p]] - a[[q, q]])).atan()
        };
        let (sin_t, cos_t) = theta.sin_cos();

        let (app, aqq, apq) = (a[[p, p]], a[[q, q]], a[[p, q]]);
        for i in 0..n {
            if i != p && i != q {
                let (aip, aiq) = (a[[i, p]], a[[i, q]]);
                a[[i, p]] = cos_t * aip + sin_t * aiq;
                a[[p, i]] = a[[i, p]];
                a[[i, q]] = -sin_t * aip + cos_t * aiq;
                a[[q, i]] = a[[i, q]];
            }
        }
        a[[p, p]] = cos_t * cos_t * app + 2.0 * sin_t * cos_t * apq + sin_t * sin_t * aqq;
        a[[q, q]] = sin_t * sin_t * app - 2.0 * sin_t * cos_t * apq + cos_t * cos_t * aqq;
        a[[p, q]] = 0.0;
        a[[q, p]] = 0.0;

        for i in 0..n {
            let (vip, viq) = (v[[i, p]], v[[i, q]]);
            v[[i, p]] = cos_t * vip + sin_t * viq;
            v[[i, q]] = -sin_t * vip + cos_t * viq;
        }
    }

    ((0..n).map(|i| a[[i, i]]).collect(), v)
}
