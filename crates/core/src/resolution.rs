//! Pixel calibration and classification resolutions
//!
//! A [`Resolution`] describes the working scale of a classifier relative to
//! the full-resolution image: a downsample factor and, when the image is
//! calibrated, the corresponding physical pixel size.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Physical pixel size of the full-resolution image, if known.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelCalibration {
    /// Pixel width in µm
    pub pixel_width_microns: Option<f64>,
    /// Pixel height in µm
    pub pixel_height_microns: Option<f64>,
}

impl PixelCalibration {
    /// Calibration with square pixels of the given size in µm.
    pub fn microns(size: f64) -> Self {
        Self {
            pixel_width_microns: Some(size),
            pixel_height_microns: Some(size),
        }
    }

    /// Whether both pixel dimensions are known in µm.
    pub fn has_pixel_size_microns(&self) -> bool {
        matches!(
            (self.pixel_width_microns, self.pixel_height_microns),
            (Some(w), Some(h)) if w > 0.0 && h > 0.0
        )
    }

    /// Mean of pixel width and height in µm.
    pub fn averaged_pixel_size_microns(&self) -> Option<f64> {
        match (self.pixel_width_microns, self.pixel_height_microns) {
            (Some(w), Some(h)) if w > 0.0 && h > 0.0 => Some((w + h) / 2.0),
            _ => None,
        }
    }

    /// Pixel area in µm², if calibrated.
    pub fn pixel_area_microns(&self) -> Option<f64> {
        match (self.pixel_width_microns, self.pixel_height_microns) {
            (Some(w), Some(h)) if w > 0.0 && h > 0.0 => Some(w * h),
            _ => None,
        }
    }

    /// Calibration of an image downsampled by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            pixel_width_microns: self.pixel_width_microns.map(|w| w * factor),
            pixel_height_microns: self.pixel_height_microns.map(|h| h * factor),
        }
    }
}

/// Names of the default resolution ladder, each step halving the previous one.
pub const DEFAULT_RESOLUTION_NAMES: [&str; 7] = [
    "Full",
    "Very high",
    "High",
    "Moderate",
    "Low",
    "Very low",
    "Extremely low",
];

/// A named working resolution.
///
/// Two resolutions compare by effective pixel size (the downsample factor,
/// which is proportional to the physical size for a given image).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    name: String,
    downsample: f64,
    calibration: PixelCalibration,
}

impl Resolution {
    /// Create a resolution. `downsample` must be finite and > 0.
    pub fn new(name: impl Into<String>, base: PixelCalibration, downsample: f64) -> Result<Self> {
        if !downsample.is_finite() || downsample <= 0.0 {
            return Err(Error::invalid_parameter(
                "downsample",
                downsample,
                "resolution downsample must be finite and > 0",
            ));
        }
        Ok(Self {
            name: name.into(),
            downsample,
            calibration: base.scaled(downsample),
        })
    }

    /// Full resolution of an image with the given calibration.
    pub fn full(base: PixelCalibration) -> Self {
        Self {
            name: DEFAULT_RESOLUTION_NAMES[0].to_string(),
            downsample: 1.0,
            calibration: base,
        }
    }

    /// The default resolution ladder, downsample 1, 2, 4, ..., 64.
    ///
    /// If `selected` equals one of the defaults it replaces it, otherwise it
    /// is appended so the current choice is never lost.
    pub fn defaults(base: PixelCalibration, selected: Option<&Resolution>) -> Vec<Resolution> {
        let mut out = Vec::with_capacity(DEFAULT_RESOLUTION_NAMES.len() + 1);
        let mut scale = 1.0;
        for name in DEFAULT_RESOLUTION_NAMES {
            let res = Resolution {
                name: name.to_string(),
                downsample: scale,
                calibration: base.scaled(scale),
            };
            match selected {
                Some(sel) if sel.same_as(&res) => out.push(sel.clone()),
                _ => out.push(res),
            }
            scale *= 2.0;
        }
        if let Some(sel) = selected
            && !out.iter().any(|r| r.same_as(sel))
        {
            out.push(sel.clone());
        }
        out
    }

    /// A custom resolution from a requested pixel size.
    ///
    /// `size` is in µm when the image is calibrated, otherwise it is read as
    /// a downsample factor.
    pub fn custom(base: PixelCalibration, size: f64) -> Result<Self> {
        if !size.is_finite() || size <= 0.0 {
            return Err(Error::invalid_parameter(
                "pixel_size",
                size,
                "requested pixel size must be > 0",
            ));
        }
        let downsample = match base.averaged_pixel_size_microns() {
            Some(microns) => size / microns,
            None => size,
        };
        Self::new("Custom", base, downsample)
    }

    /// Insert `res` into a list, keeping it ordered by pixel size.
    pub fn insert_sorted(list: &mut Vec<Resolution>, res: Resolution) {
        let idx = list.partition_point(|r| r.downsample <= res.downsample);
        list.insert(idx, res);
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Downsample factor relative to full resolution
    pub fn downsample(&self) -> f64 {
        self.downsample
    }

    /// Calibration at this resolution
    pub fn calibration(&self) -> &PixelCalibration {
        &self.calibration
    }

    /// Same name and same scale.
    fn same_as(&self, other: &Resolution) -> bool {
        self.name == other.name && self == other
    }
}

impl PartialEq for Resolution {
    fn eq(&self, other: &Self) -> bool {
        (self.downsample - other.downsample).abs() < 1e-9
    }
}

impl PartialOrd for Resolution {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        self.downsample.partial_cmp(&other.downsample)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.calibration.averaged_pixel_size_microns() {
            Some(size) => write!(f, "{} ({:.1} µm/px)", self.name, size),
            None => write!(f, "{} (downsample = {:.1})", self.name, self.downsample),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_ladder() {
        let res = Resolution::defaults(PixelCalibration::default(), None);
        assert_eq!(res.len(), 7);
        assert_eq!(res[0].downsample(), 1.0);
        assert_eq!(res[6].downsample(), 64.0);
        assert_eq!(res[3].name(), "Moderate");
    }

    #[test]
    fn test_defaults_keep_selected() {
        let base = PixelCalibration::microns(0.5);
        let custom = Resolution::custom(base, 3.0).unwrap();
        let res = Resolution::defaults(base, Some(&custom));
        assert_eq!(res.len(), 8);
        assert_eq!(res[7].name(), "Custom");
        assert!((res[7].downsample() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_display() {
        let uncal = Resolution::new("High", PixelCalibration::default(), 4.0).unwrap();
        assert_eq!(uncal.to_string(), "High (downsample = 4.0)");
        let cal = Resolution::new("High", PixelCalibration::microns(0.25), 4.0).unwrap();
        assert_eq!(cal.to_string(), "High (1.0 µm/px)");
    }

    #[test]
    fn test_ordering_and_insert() {
        let base = PixelCalibration::default();
        let mut list = Resolution::defaults(base, None);
        Resolution::insert_sorted(&mut list, Resolution::custom(base, 3.0).unwrap());
        let ds: Vec<f64> = list.iter().map(|r| r.downsample()).collect();
        assert_eq!(ds, vec![1.0, 2.0, 3.0, 4.0, 8.0, 16.0, 32.0, 64.0]);
        assert!(list[0] < list[1]);
    }

    #[test]
    fn test_invalid_resolution() {
        assert!(Resolution::new("x", PixelCalibration::default(), 0.0).is_err());
        assert!(Resolution::custom(PixelCalibration::default(), -1.0).is_err());
    }
}
