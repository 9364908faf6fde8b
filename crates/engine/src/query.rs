//! Pixel value queries

use pixclass_algorithms::ClassifiedRegion;
use pixclass_core::{PathClass, Result};
use std::fmt;

/// Prediction at one pixel.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelQuery {
    /// No cached result covers the pixel
    Unavailable,
    Classification(PathClass),
    /// One score per output channel
    Prediction(Vec<(PathClass, f32)>),
}

impl PixelQuery {
    /// Read a tile-local pixel of a classified region.
    pub fn from_region(
        region: &ClassifiedRegion,
        channels: &[PathClass],
        row: usize,
        col: usize,
    ) -> Result<Self> {
        Ok(match region {
            ClassifiedRegion::Classification(raster) => {
                let index = raster.get(row, col)? as usize;
                match channels.get(index) {
                    Some(class) => PixelQuery::Classification(class.clone()),
                    None => PixelQuery::Unavailable,
                }
            }
            ClassifiedRegion::Probability(bands) => {
                let mut scores = Vec::with_capacity(channels.len());
                for (band, class) in channels.iter().enumerate().take(bands.n_bands()) {
                    scores.push((class.clone(), bands.get(band, row, col)?));
                }
                PixelQuery::Prediction(scores)
            }
        })
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, PixelQuery::Unavailable)
    }
}

impl fmt::Display for PixelQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelQuery::Unavailable => f.write_str("Unavailable"),
            PixelQuery::Classification(class) => write!(f, "Classification: {class}"),
            PixelQuery::Prediction(scores) => {
                f.write_str("Prediction: ")?;
                for (i, (class, p)) in scores.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{class}: {p:.2}")?;
                }
                Ok(())
            }
        }
    }
}
