//! ROI simplification
//!
//! Traced pixel boundaries are staircases; simplification removes the
//! redundant vertices before objects are handed to the hierarchy.
//!
//! - Douglas-Peucker: keeps vertices deviating more than the tolerance
//! - Visvalingam-Whyatt: keeps vertices with effective area above the tolerance

use geo::{LineString, MultiPolygon, Polygon};
use geo::{Simplify, SimplifyVw};
use serde::{Deserialize, Serialize};

/// Simplification algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimplifyMethod {
    #[default]
    DouglasPeucker,
    Visvalingam,
}

/// Parameters for [`simplify_polygon`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimplifyParams {
    pub method: SimplifyMethod,
    /// Distance (Douglas-Peucker) or area (Visvalingam) in full-resolution pixels
    pub tolerance: f64,
}

impl Default for SimplifyParams {
    fn default() -> Self {
        Self {
            method: SimplifyMethod::DouglasPeucker,
            tolerance: 1.0,
        }
    }
}

fn simplify_ring(ring: &LineString<f64>, params: &SimplifyParams) -> LineString<f64> {
    match params.method {
        SimplifyMethod::DouglasPeucker => ring.simplify(&params.tolerance),
        SimplifyMethod::Visvalingam => ring.simplify_vw(&params.tolerance),
    }
}

/// Simplify a polygon. Holes that collapse are dropped; an exterior that
/// would collapse is kept unchanged.
pub fn simplify_polygon(polygon: &Polygon<f64>, params: &SimplifyParams) -> Polygon<f64> {
    if params.tolerance <= 0.0 {
        return polygon.clone();
    }
    let mut exterior = simplify_ring(polygon.exterior(), params);
    if exterior.0.len() < 4 {
        exterior = polygon.exterior().clone();
    }
    let interiors: Vec<LineString<f64>> = polygon
        .interiors()
        .iter()
        .map(|ring| simplify_ring(ring, params))
        .filter(|ring| ring.0.len() >= 4) // Must remain valid ring
        .collect();
    Polygon::new(exterior, interiors)
}

/// Simplify every part of a multi-polygon.
pub fn simplify_multipolygon(
    multi: &MultiPolygon<f64>,
    params: &SimplifyParams,
) -> MultiPolygon<f64> {
    MultiPolygon::new(multi.0.iter().map(|p| simplify_polygon(p, params)).collect())
}
