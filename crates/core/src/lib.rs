//! # PixClass Core
//!
//! Core types and I/O shared by the PixClass pixel classification crates.
//!
//! This crate provides:
//! - `Raster<T>` and `BandStack`: single and multi-band grids
//! - `ImageServer`: region access to multi-channel, multi-plane images
//! - `Resolution` and `PixelCalibration`: working scales
//! - `ObjectHierarchy`: annotations, detections and change events
//! - TIFF reading and writing

pub mod annotation;
pub mod error;
pub mod image;
pub mod io;
pub mod raster;
pub mod resolution;

pub use annotation::{
    HierarchyEvent, HierarchyEventKind, ObjectHierarchy, ObjectId, ObjectKind, PathClass,
    PathObject,
};
pub use error::{Error, ErrorKind, Result};
pub use image::{ImageServer, InMemoryImage, RegionRequest};
pub use raster::{BandStack, Neighborhood, Raster, RasterElement};
pub use resolution::{PixelCalibration, Resolution};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::annotation::{ObjectHierarchy, ObjectKind, PathClass, PathObject};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::image::{ImageServer, InMemoryImage, RegionRequest};
    pub use crate::raster::{BandStack, Raster, RasterElement};
    pub use crate::resolution::{PixelCalibration, Resolution};
}
