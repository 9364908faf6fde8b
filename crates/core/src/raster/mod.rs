//! Raster data structures and operations

mod bands;
mod element;
mod grid;
mod neighborhood;

pub use bands::BandStack;
pub use element::RasterElement;
pub use grid::Raster;
pub use neighborhood::Neighborhood;
