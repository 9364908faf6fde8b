//! Polygon rasterization at a working resolution
//!
//! A working pixel `(row, col)` covers the full-resolution square
//! `[col·d, (col+1)·d) × [row·d, (row+1)·d)` and belongs to a polygon when its
//! centre does (even-odd rule, holes included). Pixels whose centre lies within
//! `thickness` working pixels of any ring are marked as boundary.

use geo::{BoundingRect, Coord, LineString, MultiPolygon};

/// Label of a rasterized pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelLabel {
    /// More than `thickness` from the outline
    Interior,
    /// Within `thickness` of the outline
    Boundary,
}

/// Pixels covered by one polygon, in working-resolution coordinates.
#[derive(Debug, Clone, Default)]
pub struct RasterizedRegion {
    /// `(row, col, label)` for every covered pixel, row-major
    pub pixels: Vec<(u32, u32, PixelLabel)>,
    pub row0: usize,
    pub col0: usize,
    pub rows: usize,
    pub cols: usize,
}

impl RasterizedRegion {
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn count(&self, label: PixelLabel) -> usize {
        self.pixels.iter().filter(|p| p.2 == label).count()
    }
}

/// Working-resolution bounding box `(row0, col0, rows, cols)` of an ROI,
/// clipped to an image of `width × height` working pixels.
pub fn working_bounds(
    polygon: &MultiPolygon<f64>,
    downsample: f64,
    width: usize,
    height: usize,
) -> Option<(usize, usize, usize, usize)> {
    let rect = polygon.bounding_rect()?;
    let clip = |v: f64, max: usize| (v.max(0.0) as usize).min(max);
    let col0 = clip((rect.min().x / downsample).floor(), width);
    let col1 = clip((rect.max().x / downsample).ceil(), width);
    let row0 = clip((rect.min().y / downsample).floor(), height);
    let row1 = clip((rect.max().y / downsample).ceil(), height);
    (col1 > col0 && row1 > row0).then_some((row0, col0, row1 - row0, col1 - col0))
}

fn rings(roi: &MultiPolygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    roi.iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
}

/// Distance from `p` to segment `a`-`b`.
pub(crate) fn point_segment_distance(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.x + t * dx, a.y + t * dy);
    ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()
}

/// Rasterize an ROI given in full-resolution pixel coordinates.
///
/// `width`/`height` are the image size in working pixels and `thickness` the
/// boundary width in working pixels (0 disables boundary detection).
pub fn rasterize_polygon(
    polygon: &MultiPolygon<f64>,
    downsample: f64,
    thickness: f64,
    width: usize,
    height: usize,
) -> RasterizedRegion {
    let Some((row0, col0, rows, cols)) = working_bounds(polygon, downsample, width, height) else {
        return RasterizedRegion::default();
    };
    let d = downsample;
    let segments: Vec<(Coord<f64>, Coord<f64>)> = rings(polygon)
        .flat_map(|ring| ring.lines().map(|l| (l.start, l.end)))
        .collect();
    let limit = thickness * d;

    let mut pixels = Vec::new();
    let mut crossings: Vec<f64> = Vec::new();
    for row in row0..row0 + rows {
        let y = (row as f64 + 0.5) * d;
        crossings.clear();
        for &(a, b) in &segments {
            // Half-open rule so shared vertices are counted once
            if (a.y <= y && y < b.y) || (b.y <= y && y < a.y) {
                crossings.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for span in crossings.chunks_exact(2) {
            // Columns whose centre x satisfies span[0] <= x < span[1]
            let first = ((span[0] / d - 0.5).ceil().max(col0 as f64)) as usize;
            let end = ((span[1] / d - 0.5).ceil().min((col0 + cols) as f64)).max(0.0) as usize;
            for col in first..end {
                let label = if limit > 0.0 {
                    let p = Coord {
                        x: (col as f64 + 0.5) * d,
                        y,
                    };
                    let near = segments
                        .iter()
                        .any(|&(a, b)| point_segment_distance(p, a, b) <= limit);
                    if near {
                        PixelLabel::Boundary
                    } else {
                        PixelLabel::Interior
                    }
                } else {
                    PixelLabel::Interior
                };
                pixels.push((row as u32, col as u32, label));
            }
        }
    }

    RasterizedRegion {
        pixels,
        row0,
        col0,
        rows,
        cols,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Polygon};

    fn square(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ]
        .into()
    }

    #[test]
    fn test_square_full_resolution() {
        let region = rasterize_polygon(&square(0.0, 0.0, 100.0), 1.0, 0.0, 200, 200);
        assert_eq!(region.pixels.len(), 10_000);
        assert_eq!((region.rows, region.cols), (100, 100));
    }

    #[test]
    fn test_square_with_boundary() {
        let region = rasterize_polygon(&square(0.0, 0.0, 100.0), 1.0, 5.0, 200, 200);
        assert_eq!(region.count(PixelLabel::Interior), 90 * 90);
        assert_eq!(region.count(PixelLabel::Boundary), 10_000 - 90 * 90);
        for &(r, c, label) in &region.pixels {
            let edge_dist = r.min(c).min(99 - r).min(99 - c);
            assert_eq!(label == PixelLabel::Boundary, edge_dist < 5);
        }
    }

    #[test]
    fn test_downsampled() {
        let region = rasterize_polygon(&square(0.0, 0.0, 100.0), 4.0, 0.0, 50, 50);
        assert_eq!(region.pixels.len(), 25 * 25);
    }

    #[test]
    fn test_hole_excluded() {
        let outer = square(0.0, 0.0, 20.0);
        let hole = square(5.0, 5.0, 10.0);
        let poly = Polygon::new(outer.0[0].exterior().clone(), vec![hole.0[0].exterior().clone()]);
        let region = rasterize_polygon(&poly.into(), 1.0, 0.0, 100, 100);
        assert_eq!(region.pixels.len(), 400 - 100);
    }

    #[test]
    fn test_clipped_to_image() {
        let region = rasterize_polygon(&square(-10.0, -10.0, 20.0), 1.0, 0.0, 100, 100);
        assert_eq!(region.pixels.len(), 100);
        assert!(rasterize_polygon(&square(200.0, 200.0, 5.0), 1.0, 0.0, 100, 100).is_empty());
    }

    #[test]
    fn test_two_parts() {
        let mut roi = square(0.0, 0.0, 10.0);
        roi.0.extend(square(50.0, 50.0, 10.0));
        let region = rasterize_polygon(&roi, 1.0, 0.0, 100, 100);
        assert_eq!(region.pixels.len(), 200);
    }
}
