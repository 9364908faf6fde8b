//! Multiscale intensity features
//!
//! For every channel and Gaussian scale σ, computes any of:
//! - smoothed intensity
//! - Sobel gradient magnitude of the smoothed channel
//! - Laplacian of the smoothed channel
//! - local standard deviation of the raw channel in a window of radius `max(1, ⌈σ⌉)`
//!
//! Bands are ordered channel-major, then by scale, then by feature.

use super::filters::{gaussian_radius, gaussian_smooth, laplacian, local_std_dev, sobel_magnitude};
use super::{read_padded, FeatureCalculator, FeatureConfig, DEFAULT_TILE_SIZE};
use ndarray::{s, Array2, Array3};
use pixclass_core::{BandStack, Error, ImageServer, RegionRequest, Result};
use serde::{Deserialize, Serialize};

/// One per-scale feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultiscaleFeature {
    Smoothed,
    GradientMagnitude,
    Laplacian,
    StdDev,
}

impl MultiscaleFeature {
    /// All features, in output order
    pub const ALL: [MultiscaleFeature; 4] = [
        MultiscaleFeature::Smoothed,
        MultiscaleFeature::GradientMagnitude,
        MultiscaleFeature::Laplacian,
        MultiscaleFeature::StdDev,
    ];

    fn label(&self) -> &'static str {
        match self {
            MultiscaleFeature::Smoothed => "Gaussian",
            MultiscaleFeature::GradientMagnitude => "Gradient magnitude",
            MultiscaleFeature::Laplacian => "Laplacian",
            MultiscaleFeature::StdDev => "Std dev",
        }
    }
}

/// Parameters for [`MultiscaleFeatureCalculator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiscaleParams {
    /// Gaussian scales in working-resolution pixels; 0 means unsmoothed
    pub sigmas: Vec<f64>,
    /// Features computed at every scale
    pub features: Vec<MultiscaleFeature>,
    /// Preferred tile edge length
    pub tile_size: usize,
}

impl Default for MultiscaleParams {
    fn default() -> Self {
        Self {
            sigmas: vec![1.0, 2.0],
            features: MultiscaleFeature::ALL.to_vec(),
            tile_size: DEFAULT_TILE_SIZE,
        }
    }
}

fn std_radius(sigma: f64) -> usize {
    (sigma.ceil() as usize).max(1)
}

/// Default feature calculator.
#[derive(Debug, Clone)]
pub struct MultiscaleFeatureCalculator {
    params: MultiscaleParams,
    padding: usize,
}

impl MultiscaleFeatureCalculator {
    pub fn new(params: MultiscaleParams) -> Result<Self> {
        if params.sigmas.is_empty() {
            return Err(Error::invalid_parameter("sigmas", "[]", "at least one scale required"));
        }
        if let Some(bad) = params.sigmas.iter().find(|s| !s.is_finite() || **s < 0.0) {
            return Err(Error::invalid_parameter("sigmas", bad, "scales must be finite and >= 0"));
        }
        if params.features.is_empty() {
            return Err(Error::invalid_parameter("features", "[]", "at least one feature required"));
        }
        if params.tile_size == 0 {
            return Err(Error::invalid_parameter("tile_size", 0, "must be > 0"));
        }
        let padding = params
            .sigmas
            .iter()
            .map(|&sigma| (gaussian_radius(sigma) + 1).max(std_radius(sigma)))
            .max()
            .unwrap_or(1);
        Ok(Self { params, padding })
    }

    pub fn params(&self) -> &MultiscaleParams {
        &self.params
    }

    fn needs_smoothing(&self) -> bool {
        self.params
            .features
            .iter()
            .any(|f| *f != MultiscaleFeature::StdDev)
    }
}

impl Default for MultiscaleFeatureCalculator {
    fn default() -> Self {
        let params = MultiscaleParams::default();
        let padding = gaussian_radius(2.0) + 1;
        Self { params, padding }
    }
}

impl FeatureCalculator for MultiscaleFeatureCalculator {
    fn name(&self) -> String {
        let sigmas: Vec<String> = self.params.sigmas.iter().map(|s| format!("{s}")).collect();
        format!("multiscale[{}]x{}", sigmas.join(","), self.params.features.len())
    }

    fn input_tile_size(&self) -> usize {
        self.params.tile_size
    }

    fn padding(&self) -> usize {
        self.padding
    }

    fn n_features(&self, n_channels: usize) -> usize {
        n_channels * self.params.sigmas.len() * self.params.features.len()
    }

    fn band_names(&self, channel_names: &[String]) -> Vec<String> {
        let mut names = Vec::with_capacity(self.n_features(channel_names.len()));
        for channel in channel_names {
            for sigma in &self.params.sigmas {
                for feature in &self.params.features {
                    names.push(format!("{channel}: {} σ={sigma:.1}", feature.label()));
                }
            }
        }
        names
    }

    fn compute(&self, image: &dyn ImageServer, request: &RegionRequest) -> Result<BandStack> {
        let pad = self.padding;
        let padded = read_padded(image, request, pad)?;
        let (n_channels, _, _) = padded.dim();
        let (rows, cols) = (request.output_height(), request.output_width());
        let crop = |a: &Array2<f32>| a.slice(s![pad..pad + rows, pad..pad + cols]).to_owned();

        let mut out = Array3::<f32>::zeros((self.n_features(n_channels), rows, cols));
        let mut band = 0;
        for ch in 0..n_channels {
            let raw = padded.slice(s![ch, .., ..]).to_owned();
            for &sigma in &self.params.sigmas {
                let smoothed = if self.needs_smoothing() {
                    Some(gaussian_smooth(&raw, sigma)?)
                } else {
                    None
                };
                for feature in &self.params.features {
                    let plane = match (feature, &smoothed) {
                        (MultiscaleFeature::StdDev, _) => local_std_dev(&raw, std_radius(sigma))?,
                        (MultiscaleFeature::Smoothed, Some(sm)) => sm.clone(),
                        (MultiscaleFeature::GradientMagnitude, Some(sm)) => sobel_magnitude(sm)?,
                        (MultiscaleFeature::Laplacian, Some(sm)) => laplacian(sm)?,
                        (_, None) => {
                            return Err(Error::Algorithm("smoothed plane missing".into()));
                        }
                    };
                    out.slice_mut(s![band, .., ..]).assign(&crop(&plane));
                    band += 1;
                }
            }
        }

        BandStack::with_names(out, self.band_names(&image.channel_names()))
    }

    fn config(&self) -> FeatureConfig {
        FeatureConfig::Multiscale(self.params.clone())
    }
}
