//! Image access
//!
//! [`ImageServer`] is the boundary to whatever stores the source pixels (a
//! whole-slide pyramid, a TIFF on disk, an in-memory array). Everything in
//! PixClass reads pixels through [`ImageServer::read_region`].

use crate::error::{Error, Result};
use crate::raster::BandStack;
use crate::resolution::PixelCalibration;
use ndarray::{s, Array3};

/// Largest number of values a single region read may produce.
pub const MAX_REGION_VALUES: u128 = i32::MAX as u128;

/// A rectangular request in full-resolution pixel coordinates.
///
/// The returned raster has `ceil(width / downsample)` columns and
/// `ceil(height / downsample)` rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionRequest {
    pub x: i64,
    pub y: i64,
    pub width: usize,
    pub height: usize,
    pub downsample: f64,
    pub z: usize,
    pub t: usize,
}

impl RegionRequest {
    /// Full-resolution request on plane (z=0, t=0).
    pub fn new(x: i64, y: i64, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
            downsample: 1.0,
            z: 0,
            t: 0,
        }
    }

    /// Same region at another downsample factor.
    pub fn at_downsample(mut self, downsample: f64) -> Self {
        self.downsample = downsample;
        self
    }

    /// Same region on another plane.
    pub fn on_plane(mut self, z: usize, t: usize) -> Self {
        self.z = z;
        self.t = t;
        self
    }

    /// Output width in pixels at the request's downsample.
    pub fn output_width(&self) -> usize {
        (self.width as f64 / self.downsample).ceil() as usize
    }

    /// Output height in pixels at the request's downsample.
    pub fn output_height(&self) -> usize {
        (self.height as f64 / self.downsample).ceil() as usize
    }

    /// Check the downsample factor.
    pub fn validate(&self) -> Result<()> {
        if !self.downsample.is_finite() || self.downsample <= 0.0 {
            return Err(Error::invalid_parameter(
                "downsample",
                self.downsample,
                "must be finite and > 0",
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Whether the region lies inside an image of the given size.
    pub fn is_within(&self, image_width: usize, image_height: usize) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.x as u128 + self.width as u128 <= image_width as u128
            && self.y as u128 + self.height as u128 <= image_height as u128
    }

    /// Whether the two requests overlap on the same plane.
    pub fn intersects(&self, other: &RegionRequest) -> bool {
        self.z == other.z
            && self.t == other.t
            && self.x < other.x + other.width as i64
            && other.x < self.x + self.width as i64
            && self.y < other.y + other.height as i64
            && other.y < self.y + self.height as i64
    }

    fn out_of_bounds(&self, image_width: usize, image_height: usize) -> Error {
        Error::RegionOutOfBounds {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            z: self.z,
            t: self.t,
            image_width,
            image_height,
        }
    }
}

/// Source of pixels for a multi-channel, multi-plane image.
pub trait ImageServer: Send + Sync {
    /// Full-resolution width
    fn width(&self) -> usize;

    /// Full-resolution height
    fn height(&self) -> usize;

    /// Number of channels
    fn n_channels(&self) -> usize;

    /// Number of z-slices
    fn n_z(&self) -> usize {
        1
    }

    /// Number of time points
    fn n_t(&self) -> usize {
        1
    }

    /// Channel names
    fn channel_names(&self) -> Vec<String> {
        (0..self.n_channels())
            .map(|c| format!("Channel {}", c + 1))
            .collect()
    }

    /// Physical pixel size at full resolution
    fn pixel_calibration(&self) -> PixelCalibration;

    /// Downsample factors of the stored pyramid levels, finest first.
    fn downsample_levels(&self) -> Vec<f64> {
        vec![1.0]
    }

    /// Read all channels of a region. Must be deterministic.
    fn read_region(&self, request: &RegionRequest) -> Result<BandStack>;

    /// Validate a request against this image.
    fn check_request(&self, request: &RegionRequest) -> Result<()> {
        request.validate()?;
        if request.z >= self.n_z()
            || request.t >= self.n_t()
            || !request.is_within(self.width(), self.height())
        {
            return Err(request.out_of_bounds(self.width(), self.height()));
        }
        let values = request.output_width() as u128
            * request.output_height() as u128
            * self.n_channels().max(1) as u128;
        if values > MAX_REGION_VALUES {
            return Err(Error::ResourceLimit {
                requested: values,
                limit: MAX_REGION_VALUES,
            });
        }
        Ok(())
    }
}

/// An image held entirely in memory.
///
/// Each plane is a `(channels, rows, cols)` array; planes are ordered with
/// `t` varying fastest.
#[derive(Debug, Clone)]
pub struct InMemoryImage {
    planes: Vec<Array3<f32>>,
    n_z: usize,
    n_t: usize,
    channel_names: Vec<String>,
    calibration: PixelCalibration,
}

impl InMemoryImage {
    /// Single-plane image.
    pub fn new(data: Array3<f32>) -> Self {
        let names = (0..data.dim().0)
            .map(|c| format!("Channel {}", c + 1))
            .collect();
        Self {
            planes: vec![data],
            n_z: 1,
            n_t: 1,
            channel_names: names,
            calibration: PixelCalibration::default(),
        }
    }

    /// Multi-plane image. `planes.len()` must equal `n_z * n_t` and all planes
    /// must share a shape.
    pub fn with_planes(planes: Vec<Array3<f32>>, n_z: usize, n_t: usize) -> Result<Self> {
        if planes.is_empty() || planes.len() != n_z * n_t {
            return Err(Error::invalid_parameter(
                "planes",
                planes.len(),
                format!("expected n_z * n_t = {} planes", n_z * n_t),
            ));
        }
        let dim = planes[0].dim();
        if let Some(bad) = planes.iter().find(|p| p.dim() != dim) {
            return Err(Error::SizeMismatch {
                er: dim.1,
                ec: dim.2,
                ar: bad.dim().1,
                ac: bad.dim().2,
            });
        }
        let mut image = Self::new(planes[0].clone());
        image.planes = planes;
        image.n_z = n_z;
        image.n_t = n_t;
        Ok(image)
    }

    /// Set the physical pixel size.
    pub fn with_calibration(mut self, calibration: PixelCalibration) -> Self {
        self.calibration = calibration;
        self
    }

    /// Set channel names.
    pub fn with_channel_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.n_channels() {
            return Err(Error::invalid_parameter(
                "channel_names",
                names.len(),
                format!("expected {} names", self.n_channels()),
            ));
        }
        self.channel_names = names;
        Ok(self)
    }

    fn plane(&self, z: usize, t: usize) -> &Array3<f32> {
        &self.planes[z * self.n_t + t]
    }
}

impl ImageServer for InMemoryImage {
    fn width(&self) -> usize {
        self.planes[0].dim().2
    }

    fn height(&self) -> usize {
        self.planes[0].dim().1
    }

    fn n_channels(&self) -> usize {
        self.planes[0].dim().0
    }

    fn n_z(&self) -> usize {
        self.n_z
    }

    fn n_t(&self) -> usize {
        self.n_t
    }

    fn channel_names(&self) -> Vec<String> {
        self.channel_names.clone()
    }

    fn pixel_calibration(&self) -> PixelCalibration {
        self.calibration
    }

    fn read_region(&self, request: &RegionRequest) -> Result<BandStack> {
        self.check_request(request)?;
        let plane = self.plane(request.z, request.t);
        let x0 = request.x as usize;
        let y0 = request.y as usize;

        let data = if (request.downsample - 1.0).abs() < 1e-12 {
            plane
                .slice(s![.., y0..y0 + request.height, x0..x0 + request.width])
                .to_owned()
        } else {
            // Area-average each output pixel over the full-resolution block it covers
            let (out_h, out_w) = (request.output_height(), request.output_width());
            let n_channels = plane.dim().0;
            let d = request.downsample;
            let x_end = x0 + request.width;
            let y_end = y0 + request.height;
            let mut out = Array3::<f32>::zeros((n_channels, out_h, out_w));
            for r in 0..out_h {
                let ya = (y0 + (r as f64 * d).floor() as usize).min(y_end - 1);
                let yb = (y0 + ((r + 1) as f64 * d).floor() as usize).clamp(ya + 1, y_end);
                for c in 0..out_w {
                    let xa = (x0 + (c as f64 * d).floor() as usize).min(x_end - 1);
                    let xb = (x0 + ((c + 1) as f64 * d).floor() as usize).clamp(xa + 1, x_end);
                    let n = ((yb - ya) * (xb - xa)) as f64;
                    for ch in 0..n_channels {
                        let sum: f64 = plane
                            .slice(s![ch, ya..yb, xa..xb])
                            .iter()
                            .map(|&v| v as f64)
                            .sum();
                        out[(ch, r, c)] = (sum / n) as f32;
                    }
                }
            }
            out
        };

        BandStack::with_names(data, self.channel_names.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(rows: usize, cols: usize) -> InMemoryImage {
        InMemoryImage::new(Array3::from_shape_fn((1, rows, cols), |(_, r, c)| {
            (r * cols + c) as f32
        }))
    }

    #[test]
    fn test_read_full_resolution() {
        let img = gradient_image(8, 8);
        let out = img.read_region(&RegionRequest::new(2, 3, 4, 2)).unwrap();
        assert_eq!((out.rows(), out.cols()), (2, 4));
        assert_eq!(out.get(0, 0, 0).unwrap(), 26.0);
    }

    #[test]
    fn test_read_downsampled_averages_blocks() {
        let img = gradient_image(4, 4);
        let out = img
            .read_region(&RegionRequest::new(0, 0, 4, 4).at_downsample(2.0))
            .unwrap();
        assert_eq!((out.rows(), out.cols()), (2, 2));
        // mean of 0, 1, 4, 5
        assert_eq!(out.get(0, 0, 0).unwrap(), 2.5);
    }

    #[test]
    fn test_read_outside_bounds() {
        let img = gradient_image(8, 8);
        let err = img.read_region(&RegionRequest::new(6, 6, 4, 4)).unwrap_err();
        assert!(matches!(err, Error::RegionOutOfBounds { .. }));
        assert!(img.read_region(&RegionRequest::new(-1, 0, 2, 2)).is_err());
        assert!(
            img.read_region(&RegionRequest::new(0, 0, 2, 2).on_plane(1, 0))
                .is_err()
        );
    }

    #[test]
    fn test_invalid_downsample() {
        let img = gradient_image(8, 8);
        let req = RegionRequest::new(0, 0, 4, 4).at_downsample(0.0);
        assert!(img.read_region(&req).is_err());
    }

    #[test]
    fn test_intersects() {
        let a = RegionRequest::new(0, 0, 10, 10);
        assert!(a.intersects(&RegionRequest::new(5, 5, 10, 10)));
        assert!(!a.intersects(&RegionRequest::new(10, 0, 5, 5)));
        assert!(!a.intersects(&RegionRequest::new(5, 5, 10, 10).on_plane(1, 0)));
    }
}
