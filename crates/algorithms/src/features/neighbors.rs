//! Neighbourhood value features
//!
//! Every channel contributes the raw values of a `(2r + 1)²` square, or of the
//! disk of radius `r`, around the pixel.

use super::{read_padded, FeatureCalculator, FeatureConfig, DEFAULT_TILE_SIZE};
use ndarray::Array3;
use pixclass_core::{BandStack, Error, ImageServer, Neighborhood, RegionRequest, Result};
use serde::{Deserialize, Serialize};

/// Parameters for [`NeighborFeatureCalculator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborParams {
    /// Neighbourhood radius in working-resolution pixels
    pub radius: usize,
    /// Disk instead of square window
    #[serde(default)]
    pub circular: bool,
    /// Preferred tile edge length
    pub tile_size: usize,
}

impl Default for NeighborParams {
    fn default() -> Self {
        Self {
            radius: 1,
            circular: false,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NeighborFeatureCalculator {
    params: NeighborParams,
    offsets: Vec<(isize, isize)>,
}

impl NeighborFeatureCalculator {
    pub fn new(params: NeighborParams) -> Result<Self> {
        if params.tile_size == 0 {
            return Err(Error::invalid_parameter("tile_size", 0, "must be > 0"));
        }
        let window = if params.circular {
            Neighborhood::Disk(params.radius)
        } else {
            Neighborhood::Square(params.radius)
        };
        let offsets = window.offsets();
        Ok(Self { params, offsets })
    }
}

impl FeatureCalculator for NeighborFeatureCalculator {
    fn name(&self) -> String {
        let shape = if self.params.circular { "disk" } else { "square" };
        format!("neighbors[{shape} r={}]", self.params.radius)
    }

    fn input_tile_size(&self) -> usize {
        self.params.tile_size
    }

    fn padding(&self) -> usize {
        self.params.radius
    }

    fn n_features(&self, n_channels: usize) -> usize {
        n_channels * self.offsets.len()
    }

    fn band_names(&self, channel_names: &[String]) -> Vec<String> {
        channel_names
            .iter()
            .flat_map(|ch| {
                self.offsets
                    .iter()
                    .map(move |(dr, dc)| format!("{ch} ({dc}, {dr})"))
            })
            .collect()
    }

    fn compute(&self, image: &dyn ImageServer, request: &RegionRequest) -> Result<BandStack> {
        let pad = self.params.radius as isize;
        let padded = read_padded(image, request, self.params.radius)?;
        let n_channels = padded.dim().0;
        let (rows, cols) = (request.output_height(), request.output_width());
        let n_offsets = self.offsets.len();

        let out = Array3::from_shape_fn((n_channels * n_offsets, rows, cols), |(b, r, c)| {
            let (dr, dc) = self.offsets[b % n_offsets];
            let rr = (r as isize + pad + dr) as usize;
            let cc = (c as isize + pad + dc) as usize;
            padded[[b / n_offsets, rr, cc]]
        });
        BandStack::with_names(out, self.band_names(&image.channel_names()))
    }

    fn config(&self) -> FeatureConfig {
        FeatureConfig::Neighbors(self.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixclass_core::InMemoryImage;

    #[test]
    fn test_neighbor_values() {
        let img = InMemoryImage::new(Array3::from_shape_fn((1, 5, 5), |(_, r, c)| {
            (r * 5 + c) as f32
        }));
        let calc = NeighborFeatureCalculator::new(NeighborParams::default()).unwrap();
        let out = calc.compute(&img, &RegionRequest::new(1, 1, 3, 3)).unwrap();
        assert_eq!(out.n_bands(), 9);
        // Band 0 is offset (-1, -1); pixel (0, 0) of the output is image (1, 1)
        assert_eq!(out.get(0, 0, 0).unwrap(), 0.0);
        // Band 4 is the centre
        assert_eq!(out.get(4, 0, 0).unwrap(), 6.0);
        assert_eq!(out.names()[4], "Channel 1 (0, 0)");
    }

    #[test]
    fn test_radius_zero_is_raw() {
        let img = InMemoryImage::new(Array3::from_elem((3, 4, 4), 2.0f32));
        let calc = NeighborFeatureCalculator::new(NeighborParams {
            radius: 0,
            circular: false,
            tile_size: 64,
        })
        .unwrap();
        assert_eq!(calc.n_features(3), 3);
        let out = calc.compute(&img, &RegionRequest::new(0, 0, 4, 4)).unwrap();
        assert_eq!(out.n_bands(), 3);
    }

    #[test]
    fn test_disk_window() {
        let img = InMemoryImage::new(Array3::from_shape_fn((1, 6, 6), |(_, r, c)| {
            (r * 6 + c) as f32
        }));
        let calc = NeighborFeatureCalculator::new(NeighborParams {
            radius: 1,
            circular: true,
            tile_size: 64,
        })
        .unwrap();
        assert_eq!(calc.n_features(2), 10);
        let out = calc.compute(&img, &RegionRequest::new(2, 2, 2, 2)).unwrap();
        // Offsets: (-1, 0), (0, -1), (0, 0), (0, 1), (1, 0)
        assert_eq!(out.n_bands(), 5);
        assert_eq!(out.get(0, 0, 0).unwrap(), 8.0);
        assert_eq!(out.get(2, 0, 0).unwrap(), 14.0);
    }
}
