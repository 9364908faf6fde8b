//! Vector geometry helpers for extracted ROIs

mod simplify;

pub use simplify::{simplify_multipolygon, simplify_polygon, SimplifyMethod, SimplifyParams};
