//! Feature preprocessing: normalization and dimensionality reduction
//!
//! A [`FeaturePreprocessor`] is fitted once on the training features and then
//! applied unchanged to every vector the model sees. It is immutable after
//! fitting and bound to the input length it was fitted on.

mod pca;

pub use pca::PcaProjection;

use crate::maybe_rayon::*;
use ndarray::{Array2, ArrayView2, Axis};
use pixclass_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Per-feature normalization mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    /// Leave values unchanged
    #[default]
    None,
    /// Subtract the mean and divide by the standard deviation
    MeanVariance,
}

/// Parameters for [`FeaturePreprocessor::fit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorParams {
    pub normalization: Normalization,
    /// Fraction of variance kept by PCA; 0 disables PCA
    pub pca_retained_variance: f64,
    /// Scale principal components to unit variance
    pub pca_whiten: bool,
}

impl Default for PreprocessorParams {
    fn default() -> Self {
        Self {
            normalization: Normalization::MeanVariance,
            pca_retained_variance: 0.0,
            pca_whiten: false,
        }
    }
}

/// Fitted feature transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePreprocessor {
    n_inputs: usize,
    offsets: Vec<f64>,
    scales: Vec<f64>,
    pca: Option<PcaProjection>,
}

impl FeaturePreprocessor {
    /// Transform that passes vectors of length `n_inputs` through unchanged.
    pub fn identity(n_inputs: usize) -> Self {
        Self {
            n_inputs,
            offsets: vec![0.0; n_inputs],
            scales: vec![1.0; n_inputs],
            pca: None,
        }
    }

    /// Fit on training features (one sample per row).
    pub fn fit(samples: ArrayView2<f32>, params: &PreprocessorParams) -> Result<Self> {
        let (n, dims) = samples.dim();
        if dims == 0 {
            return Err(Error::invalid_parameter("features", 0, "no feature columns"));
        }
        let mut pre = Self::identity(dims);

        if params.normalization == Normalization::MeanVariance {
            if n == 0 {
                return Err(Error::insufficient("cannot normalize without samples"));
            }
            let data = samples.mapv(f64::from);
            for (j, col) in data.axis_iter(Axis(1)).enumerate() {
                let mean = col.sum() / n as f64;
                let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
                let sd = var.sqrt();
                pre.offsets[j] = mean;
                // Constant features are centred but not scaled
                pre.scales[j] = if sd > 1e-12 { sd } else { 1.0 };
            }
        }

        if params.pca_retained_variance > 0.0 {
            let normalized = Array2::from_shape_fn((n, dims), |(i, j)| {
                (samples[[i, j]] as f64 - pre.offsets[j]) / pre.scales[j]
            });
            pre.pca = Some(PcaProjection::fit(
                normalized.view(),
                params.pca_retained_variance,
                params.pca_whiten,
            )?);
        }
        Ok(pre)
    }

    /// Input vector length
    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    /// Output vector length
    pub fn n_outputs(&self) -> usize {
        self.pca
            .as_ref()
            .map_or(self.n_inputs, PcaProjection::n_components)
    }

    /// Whether [`invert`](Self::invert) is exact.
    pub fn is_invertible(&self) -> bool {
        self.n_outputs() == self.n_inputs
    }

    fn check_len(&self, expected: usize, actual: usize) -> Result<()> {
        if expected != actual {
            return Err(Error::FeatureCountMismatch { expected, actual });
        }
        Ok(())
    }

    /// Transform one vector.
    pub fn apply(&self, x: &[f32]) -> Result<Vec<f32>> {
        self.check_len(self.n_inputs, x.len())?;
        let normalized: Vec<f64> = x
            .iter()
            .zip(self.offsets.iter().zip(&self.scales))
            .map(|(&v, (o, s))| (v as f64 - o) / s)
            .collect();
        let out = match &self.pca {
            Some(pca) => pca.project(&normalized),
            None => normalized,
        };
        Ok(out.into_iter().map(|v| v as f32).collect())
    }

    /// Transform every row of a sample matrix.
    pub fn apply_batch(&self, samples: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_len(self.n_inputs, samples.ncols())?;
        let n = samples.nrows();
        let rows: Vec<Vec<f32>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let row: Vec<f32> = samples.row(i).to_vec();
                self.apply(&row)
            })
            .collect::<Result<Vec<_>>>()?;
        let width = self.n_outputs();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((n, width), flat).map_err(|e| Error::Other(e.to_string()))
    }

    /// Undo [`apply`](Self::apply). Fails when PCA dropped components.
    pub fn invert(&self, y: &[f32]) -> Result<Vec<f32>> {
        if !self.is_invertible() {
            return Err(Error::Algorithm(format!(
                "transform reduces {} features to {} and cannot be inverted",
                self.n_inputs,
                self.n_outputs()
            )));
        }
        self.check_len(self.n_outputs(), y.len())?;
        let y64: Vec<f64> = y.iter().map(|&v| v as f64).collect();
        let normalized = match &self.pca {
            Some(pca) => pca.reconstruct(&y64),
            None => y64,
        };
        Ok(normalized
            .iter()
            .zip(self.offsets.iter().zip(&self.scales))
            .map(|(v, (o, s))| (v * s + o) as f32)
            .collect())
    }
}
