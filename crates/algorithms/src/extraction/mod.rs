//! Classification raster to vector objects
//!
//! Each class value is split into 4-connected components. Components below
//! the minimum area are discarded and holes below the minimum hole area are
//! filled; both filters look only at a component's own pixel count, so the
//! result never depends on scan order. Surviving components become one ROI
//! each (`split`) or are merged into one multi-part ROI per class.

mod components;
mod contour;

pub use components::{connected_components, Component};
pub use contour::{signed_area, trace_rings, Ring};

use crate::vector::{simplify_multipolygon, SimplifyParams};
use geo::{Contains, Coord, LineString, MultiPolygon, Polygon};
use pixclass_core::{PathClass, Raster, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Parameters for [`extract_objects`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionParams {
    /// Components smaller than this (working pixels) are discarded
    pub min_area_pixels: f64,
    /// Holes smaller than this (working pixels) are filled
    pub min_hole_area_pixels: f64,
    /// One object per component instead of one per class
    pub split: bool,
    /// Classes for which no objects are created
    pub ignored_classes: Vec<PathClass>,
    /// Optional simplification of the traced ROIs
    pub simplify: Option<SimplifyParams>,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            min_area_pixels: 0.0,
            min_hole_area_pixels: 0.0,
            split: false,
            ignored_classes: vec![PathClass::boundary()],
            simplify: None,
        }
    }
}

/// Placement of a classification raster in full-resolution coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterPlacement {
    /// Full-resolution x of the raster's left edge
    pub x: f64,
    /// Full-resolution y of the raster's top edge
    pub y: f64,
    pub downsample: f64,
}

impl Default for RasterPlacement {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            downsample: 1.0,
        }
    }
}

impl RasterPlacement {
    fn to_image(&self, gx: i64, gy: i64) -> Coord<f64> {
        Coord {
            x: self.x + gx as f64 * self.downsample,
            y: self.y + gy as f64 * self.downsample,
        }
    }

    fn pixel_centre(&self, row: usize, col: usize) -> Coord<f64> {
        Coord {
            x: self.x + (col as f64 + 0.5) * self.downsample,
            y: self.y + (row as f64 + 0.5) * self.downsample,
        }
    }
}

/// A region created from the classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedObject {
    pub class: PathClass,
    /// Area in working pixels, after hole filling
    pub area_pixels: f64,
    /// ROI in full-resolution coordinates
    pub roi: MultiPolygon<f64>,
}

fn to_line_string(ring: &Ring, placement: &RasterPlacement) -> LineString<f64> {
    LineString::from(
        ring.iter()
            .map(|&(x, y)| placement.to_image(x, y))
            .collect::<Vec<_>>(),
    )
}

/// Polygon of one component, with small holes filled.
fn component_polygon(
    component: &Component,
    min_hole_area: f64,
    placement: &RasterPlacement,
) -> Option<(Polygon<f64>, f64)> {
    let (r0, c0, r1, c1) = component.bounds;
    let (rows, cols) = (r1 - r0 + 1, c1 - c0 + 1);
    let mut local = vec![false; rows * cols];
    for &(r, c) in &component.pixels {
        local[(r - r0) * cols + (c - c0)] = true;
    }
    let rings = trace_rings(rows, cols, |r, c| local[r * cols + c]);

    let shift = |ring: Ring| -> Ring {
        ring.into_iter()
            .map(|(x, y)| (x + c0 as i64, y + r0 as i64))
            .collect()
    };
    let mut exterior = None;
    let mut holes = Vec::new();
    let mut area = component.area() as f64;
    for ring in rings {
        let a = signed_area(&ring);
        if a > 0.0 {
            exterior = Some(shift(ring));
        } else if -a < min_hole_area {
            area += -a;
        } else {
            holes.push(to_line_string(&shift(ring), placement));
        }
    }
    let exterior = to_line_string(&exterior?, placement);
    Some((Polygon::new(exterior, holes), area))
}

/// Convert a classification raster into objects.
///
/// `classes[v]` names raster value `v`; values without a name are ignored.
/// With `roi`, pixels whose centre lies outside it are treated as
/// unclassified. Objects are ordered by class value, then by the row-major
/// position of their first pixel.
pub fn extract_objects(
    raster: &Raster<u8>,
    classes: &[PathClass],
    placement: &RasterPlacement,
    roi: Option<&Polygon<f64>>,
    params: &ExtractionParams,
) -> Result<Vec<ExtractedObject>> {
    let wanted = |v: u8| {
        classes
            .get(v as usize)
            .is_some_and(|c| !params.ignored_classes.contains(c))
    };

    let masked;
    let source = match roi {
        Some(roi) => {
            let mut copy = raster.clone();
            let (rows, cols) = raster.shape();
            // One past the last class value marks "outside"
            let outside = u8::try_from(classes.len()).unwrap_or(u8::MAX);
            for r in 0..rows {
                for c in 0..cols {
                    if !roi.contains(&placement.pixel_centre(r, c)) {
                        copy.set(r, c, outside)?;
                    }
                }
            }
            masked = copy;
            &masked
        }
        None => raster,
    };

    let mut components = connected_components(source, wanted)?;
    let total = components.len();
    components.retain(|c| c.area() as f64 >= params.min_area_pixels);
    components.sort_by_key(|c| c.value);

    let mut objects: Vec<ExtractedObject> = Vec::new();
    for component in &components {
        let Some((polygon, area)) =
            component_polygon(component, params.min_hole_area_pixels, placement)
        else {
            continue;
        };
        let class = classes[component.value as usize].clone();
        match objects.last_mut() {
            Some(last) if !params.split && last.class == class => {
                last.roi.0.push(polygon);
                last.area_pixels += area;
            }
            _ => objects.push(ExtractedObject {
                class,
                area_pixels: area,
                roi: MultiPolygon::new(vec![polygon]),
            }),
        }
    }

    if let Some(simplify) = &params.simplify {
        for object in &mut objects {
            object.roi = simplify_multipolygon(&object.roi, simplify);
        }
    }
    debug!(
        components = total,
        kept = components.len(),
        objects = objects.len(),
        "extracted objects"
    );
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Area};

    fn classes() -> Vec<PathClass> {
        vec![PathClass::new("Background"), PathClass::new("Tumor")]
    }

    fn params(min_area: f64, split: bool) -> ExtractionParams {
        ExtractionParams {
            min_area_pixels: min_area,
            split,
            ignored_classes: vec![PathClass::new("Background")],
            ..Default::default()
        }
    }

    /// 50-pixel blob (5×10) and 5-pixel blob (1×5) of class 1.
    fn two_blobs() -> Raster<u8> {
        let mut r = Raster::<u8>::new(20, 20);
        for row in 2..7 {
            for col in 2..12 {
                r.set(row, col, 1).unwrap();
            }
        }
        for col in 10..15 {
            r.set(15, col, 1).unwrap();
        }
        r
    }

    #[test]
    fn test_small_blob_filtered() {
        let objects =
            extract_objects(&two_blobs(), &classes(), &RasterPlacement::default(), None, &params(10.0, true))
                .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].class, PathClass::new("Tumor"));
        assert_eq!(objects[0].area_pixels, 50.0);
        assert_eq!(objects[0].roi.unsigned_area(), 50.0);
    }

    #[test]
    fn test_merge_versus_split() {
        let placement = RasterPlacement::default();
        let merged =
            extract_objects(&two_blobs(), &classes(), &placement, None, &params(0.0, false)).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].roi.0.len(), 2);
        assert_eq!(merged[0].area_pixels, 55.0);

        let split =
            extract_objects(&two_blobs(), &classes(), &placement, None, &params(0.0, true)).unwrap();
        assert_eq!(split.len(), 2);
    }

    #[test]
    fn test_hole_filling() {
        let mut r = Raster::<u8>::filled(6, 6, 1);
        r.set(2, 2, 0).unwrap();
        let placement = RasterPlacement::default();

        let kept = extract_objects(&r, &classes(), &placement, None, &params(0.0, true)).unwrap();
        assert_eq!(kept[0].roi.0[0].interiors().len(), 1);
        assert_eq!(kept[0].area_pixels, 35.0);

        let mut p = params(0.0, true);
        p.min_hole_area_pixels = 2.0;
        let filled = extract_objects(&r, &classes(), &placement, None, &p).unwrap();
        assert!(filled[0].roi.0[0].interiors().is_empty());
        assert_eq!(filled[0].area_pixels, 36.0);
    }

    #[test]
    fn test_placement_scales_coordinates() {
        let r = Raster::<u8>::filled(2, 2, 1);
        let placement = RasterPlacement {
            x: 100.0,
            y: 50.0,
            downsample: 4.0,
        };
        let objects = extract_objects(&r, &classes(), &placement, None, &params(0.0, true)).unwrap();
        let ring = objects[0].roi.0[0].exterior();
        assert_eq!(ring.0[0], Coord { x: 100.0, y: 50.0 });
        assert_eq!(objects[0].roi.unsigned_area(), 64.0);
    }

    #[test]
    fn test_roi_restriction() {
        let r = Raster::<u8>::filled(10, 10, 1);
        let roi = polygon![(x: 0.0, y: 0.0), (x: 5.0, y: 0.0), (x: 5.0, y: 10.0), (x: 0.0, y: 10.0)];
        let objects =
            extract_objects(&r, &classes(), &RasterPlacement::default(), Some(&roi), &params(0.0, true))
                .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].area_pixels, 50.0);
    }

    #[test]
    fn test_boundary_class_ignored_by_default() {
        let r = Raster::<u8>::filled(3, 3, 0);
        let objects = extract_objects(
            &r,
            &[PathClass::boundary()],
            &RasterPlacement::default(),
            None,
            &ExtractionParams::default(),
        )
        .unwrap();
        assert!(objects.is_empty());
    }
}
