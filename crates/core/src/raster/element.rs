//! Cell types for [`Raster`](crate::Raster)

use num_traits::Zero;
use std::fmt::Debug;

/// Numeric cell value: `u8` for class maps, `f32` for scores.
///
/// `Zero` backs [`Raster::new`](crate::Raster::new).
pub trait RasterElement: Copy + Debug + PartialEq + Zero + Send + Sync + 'static {}

impl RasterElement for u8 {}
impl RasterElement for u16 {}
impl RasterElement for f32 {}
