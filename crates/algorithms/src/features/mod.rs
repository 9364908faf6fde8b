//! Feature calculators
//!
//! A [`FeatureCalculator`] turns an image region at a working resolution into
//! a multi-band feature image with one `f32` band per feature. Calculators
//! read a padded region around the request so every pixel's features depend
//! only on the image, never on where the tile boundaries fall.

pub mod filters;
mod multiscale;
mod neighbors;

pub use multiscale::{MultiscaleFeature, MultiscaleFeatureCalculator, MultiscaleParams};
pub use neighbors::{NeighborFeatureCalculator, NeighborParams};

use ndarray::Array3;
use pixclass_core::{BandStack, ImageServer, RegionRequest, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default tile edge length, in working-resolution pixels.
pub const DEFAULT_TILE_SIZE: usize = 512;

/// Maps image regions to feature images.
pub trait FeatureCalculator: Send + Sync + fmt::Debug {
    /// Identifier, used for cache keys and logging
    fn name(&self) -> String;

    /// Tile edge length this calculator prefers
    fn input_tile_size(&self) -> usize {
        DEFAULT_TILE_SIZE
    }

    /// Context needed around a pixel, in working-resolution pixels
    fn padding(&self) -> usize;

    /// Number of output bands for an image with `n_channels` channels.
    /// Constant for any region size.
    fn n_features(&self, n_channels: usize) -> usize;

    /// Output band names
    fn band_names(&self, channel_names: &[String]) -> Vec<String>;

    /// Compute features for a region. The result has
    /// `request.output_height()` rows and `request.output_width()` columns.
    fn compute(&self, image: &dyn ImageServer, request: &RegionRequest) -> Result<BandStack>;

    /// Serializable description that rebuilds this calculator
    fn config(&self) -> FeatureConfig;
}

/// Read a region with `padding` extra working-resolution pixels on every side.
///
/// Padding that falls outside the image is filled by replicating the nearest
/// image pixel. The result has shape
/// `(channels, out_height + 2 * padding, out_width + 2 * padding)`.
pub fn read_padded(
    image: &dyn ImageServer,
    request: &RegionRequest,
    padding: usize,
) -> Result<Array3<f32>> {
    image.check_request(request)?;
    let d = request.downsample;
    let (out_h, out_w) = (request.output_height(), request.output_width());

    // Padding available inside the image, in working pixels
    let space = |full_res: i64| (full_res.max(0) as f64 / d).floor() as usize;
    let left = padding.min(space(request.x));
    let top = padding.min(space(request.y));
    let right = padding.min(space(
        image.width() as i64 - request.x - request.width as i64,
    ));
    let bottom = padding.min(space(
        image.height() as i64 - request.y - request.height as i64,
    ));
    let extent = |n: usize| (n as f64 * d).round() as i64;

    let x0 = (request.x - extent(left)).max(0);
    let y0 = (request.y - extent(top)).max(0);
    let x1 = (request.x + request.width as i64 + extent(right)).min(image.width() as i64);
    let y1 = (request.y + request.height as i64 + extent(bottom)).min(image.height() as i64);
    let padded_request = RegionRequest {
        x: x0,
        y: y0,
        width: (x1 - x0) as usize,
        height: (y1 - y0) as usize,
        ..*request
    };
    let raw = image.read_region(&padded_request)?;
    let raw = raw.data();
    let (n_channels, raw_h, raw_w) = raw.dim();

    let row_shift = padding as isize - top as isize;
    let col_shift = padding as isize - left as isize;
    let out = Array3::from_shape_fn(
        (n_channels, out_h + 2 * padding, out_w + 2 * padding),
        |(ch, r, c)| {
            let rr = (r as isize - row_shift).clamp(0, raw_h as isize - 1) as usize;
            let cc = (c as isize - col_shift).clamp(0, raw_w as isize - 1) as usize;
            raw[[ch, rr, cc]]
        },
    );
    Ok(out)
}

/// Serializable choice of feature calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureConfig {
    /// Smoothed intensity and derivatives at several scales
    Multiscale(MultiscaleParams),
    /// Raw values of a square neighbourhood
    Neighbors(NeighborParams),
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig::Multiscale(MultiscaleParams::default())
    }
}

impl FeatureConfig {
    /// Build the calculator, validating parameters.
    pub fn build(&self) -> Result<Arc<dyn FeatureCalculator>> {
        Ok(match self {
            FeatureConfig::Multiscale(p) => Arc::new(MultiscaleFeatureCalculator::new(p.clone())?),
            FeatureConfig::Neighbors(p) => Arc::new(NeighborFeatureCalculator::new(p.clone())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixclass_core::InMemoryImage;

    fn ramp_image(rows: usize, cols: usize) -> InMemoryImage {
        InMemoryImage::new(Array3::from_shape_fn((1, rows, cols), |(_, r, c)| {
            (r * 100 + c) as f32
        }))
    }

    #[test]
    fn test_read_padded_interior() {
        let img = ramp_image(20, 20);
        let padded = read_padded(&img, &RegionRequest::new(5, 5, 4, 4), 2).unwrap();
        assert_eq!(padded.dim(), (1, 8, 8));
        assert_eq!(padded[[0, 0, 0]], 303.0);
        assert_eq!(padded[[0, 2, 2]], 505.0);
    }

    #[test]
    fn test_read_padded_replicates_at_edge() {
        let img = ramp_image(10, 10);
        let padded = read_padded(&img, &RegionRequest::new(0, 0, 3, 3), 2).unwrap();
        assert_eq!(padded.dim(), (1, 7, 7));
        assert_eq!(padded[[0, 0, 0]], 0.0);
        assert_eq!(padded[[0, 1, 2]], 0.0);
        assert_eq!(padded[[0, 2, 3]], 1.0);
    }

    #[test]
    fn test_read_padded_downsampled() {
        let img = ramp_image(16, 16);
        let req = RegionRequest::new(4, 4, 8, 8).at_downsample(2.0);
        let padded = read_padded(&img, &req, 1).unwrap();
        assert_eq!(padded.dim(), (1, 6, 6));
    }

    #[test]
    fn test_config_builds() {
        let calc = FeatureConfig::default().build().unwrap();
        assert!(calc.n_features(3) > 0);
        let json = serde_json::to_string(&calc.config()).unwrap();
        let back: FeatureConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, calc.config());
    }
}
