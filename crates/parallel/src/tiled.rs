//! Tile decomposition of multi-plane images
//!
//! Tiles are laid out on a regular grid anchored at the image origin. A tile
//! is `tile_size` working pixels wide, i.e. `tile_size × downsample`
//! full-resolution pixels, and the last row and column are clipped to the
//! image.

use pixclass_core::{Error, RegionRequest, Result};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Identity of one tile, in full-resolution pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TileId {
    downsample: f64,
    pub x: i64,
    pub y: i64,
    pub width: usize,
    pub height: usize,
    pub z: usize,
    pub t: usize,
}

impl PartialEq for TileId {
    fn eq(&self, other: &Self) -> bool {
        self.downsample.to_bits() == other.downsample.to_bits()
            && (self.x, self.y, self.width, self.height, self.z, self.t)
                == (other.x, other.y, other.width, other.height, other.z, other.t)
    }
}

impl Eq for TileId {}

impl Hash for TileId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.downsample.to_bits().hash(state);
        (self.x, self.y, self.width, self.height, self.z, self.t).hash(state);
    }
}

impl TileId {
    pub fn downsample(&self) -> f64 {
        self.downsample
    }

    /// The region to compute for this tile
    pub fn request(&self) -> RegionRequest {
        RegionRequest {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            downsample: self.downsample,
            z: self.z,
            t: self.t,
        }
    }

    /// Whether a full-resolution point on a plane falls in this tile
    pub fn contains(&self, x: f64, y: f64, z: usize, t: usize) -> bool {
        z == self.z
            && t == self.t
            && x >= self.x as f64
            && y >= self.y as f64
            && x < (self.x + self.width as i64) as f64
            && y < (self.y + self.height as i64) as f64
    }

    /// Tile-local `(row, col)` of a full-resolution point, if inside.
    pub fn to_local(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !self.contains(x, y, self.z, self.t) {
            return None;
        }
        let request = self.request();
        let col = ((x - self.x as f64) / self.downsample).floor() as usize;
        let row = ((y - self.y as f64) / self.downsample).floor() as usize;
        Some((
            row.min(request.output_height() - 1),
            col.min(request.output_width() - 1),
        ))
    }
}

/// Regular tiling of an image at one downsample factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    image_width: usize,
    image_height: usize,
    downsample: f64,
    tile_size: usize,
    span: usize,
}

impl TileGrid {
    /// Create a grid of `tile_size × tile_size` working-pixel tiles.
    pub fn new(image_width: usize, image_height: usize, downsample: f64, tile_size: usize) -> Result<Self> {
        if image_width == 0 || image_height == 0 {
            return Err(Error::InvalidDimensions {
                width: image_width,
                height: image_height,
            });
        }
        if !downsample.is_finite() || downsample <= 0.0 {
            return Err(Error::invalid_parameter("downsample", downsample, "must be finite and > 0"));
        }
        if tile_size == 0 {
            return Err(Error::invalid_parameter("tile_size", tile_size, "must be > 0"));
        }
        let span = ((tile_size as f64 * downsample).round() as usize).max(1);
        Ok(Self {
            image_width,
            image_height,
            downsample,
            tile_size,
            span,
        })
    }

    pub fn downsample(&self) -> f64 {
        self.downsample
    }

    /// Tile edge length in working pixels
    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Tile edge length in full-resolution pixels
    pub fn span(&self) -> usize {
        self.span
    }

    pub fn n_cols(&self) -> usize {
        self.image_width.div_ceil(self.span)
    }

    pub fn n_rows(&self) -> usize {
        self.image_height.div_ceil(self.span)
    }

    /// The tile at grid position `(col, row)` on a plane
    pub fn tile(&self, col: usize, row: usize, z: usize, t: usize) -> Option<TileId> {
        if col >= self.n_cols() || row >= self.n_rows() {
            return None;
        }
        let x = col * self.span;
        let y = row * self.span;
        Some(TileId {
            downsample: self.downsample,
            x: x as i64,
            y: y as i64,
            width: self.span.min(self.image_width - x),
            height: self.span.min(self.image_height - y),
            z,
            t,
        })
    }

    /// The tile containing a full-resolution point
    pub fn tile_for_pixel(&self, x: f64, y: f64, z: usize, t: usize) -> Option<TileId> {
        if x < 0.0 || y < 0.0 || x >= self.image_width as f64 || y >= self.image_height as f64 {
            return None;
        }
        self.tile((x / self.span as f64) as usize, (y / self.span as f64) as usize, z, t)
    }

    /// Tiles intersecting a region, row-major. The region is clipped to the image.
    pub fn tiles_for_region(&self, region: &RegionRequest) -> Vec<TileId> {
        let x0 = region.x.max(0) as usize;
        let y0 = region.y.max(0) as usize;
        let x1 = ((region.x + region.width as i64).max(0) as usize).min(self.image_width);
        let y1 = ((region.y + region.height as i64).max(0) as usize).min(self.image_height);
        if x1 <= x0 || y1 <= y0 {
            return Vec::new();
        }
        let (c0, c1) = (x0 / self.span, (x1 - 1) / self.span);
        let (r0, r1) = (y0 / self.span, (y1 - 1) / self.span);
        (r0..=r1)
            .flat_map(|row| (c0..=c1).map(move |col| (col, row)))
            .filter_map(|(col, row)| self.tile(col, row, region.z, region.t))
            .collect()
    }

    /// Iterate over every tile of a plane
    pub fn iter(&self, z: usize, t: usize) -> TileIterator<'_> {
        TileIterator {
            grid: self,
            z,
            t,
            col: 0,
            row: 0,
        }
    }
}

/// Iterator over the tiles of one plane, row-major
pub struct TileIterator<'a> {
    grid: &'a TileGrid,
    z: usize,
    t: usize,
    col: usize,
    row: usize,
}

impl Iterator for TileIterator<'_> {
    type Item = TileId;

    fn next(&mut self) -> Option<Self::Item> {
        let tile = self.grid.tile(self.col, self.row, self.z, self.t)?;
        self.col += 1;
        if self.col >= self.grid.n_cols() {
            self.col = 0;
            self.row += 1;
        }
        Some(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_iterator() {
        let grid = TileGrid::new(100, 70, 1.0, 32).unwrap();
        let tiles: Vec<_> = grid.iter(0, 0).collect();
        assert_eq!(tiles.len(), 4 * 3);
        assert_eq!((tiles[0].x, tiles[0].y), (0, 0));
        // Last column and row are clipped
        let last = tiles.last().unwrap();
        assert_eq!((last.width, last.height), (4, 6));
    }

    #[test]
    fn test_tile_coverage() {
        let (w, h) = (100, 100);
        let mut covered = vec![vec![0u8; w]; h];
        let grid = TileGrid::new(w, h, 2.0, 16).unwrap();
        for tile in grid.iter(0, 0) {
            for y in tile.y as usize..tile.y as usize + tile.height {
                for x in tile.x as usize..tile.x as usize + tile.width {
                    covered[y][x] += 1;
                }
            }
        }
        for row in &covered {
            assert!(row.iter().all(|&n| n == 1));
        }
    }

    #[test]
    fn test_span_follows_downsample() {
        let grid = TileGrid::new(1000, 1000, 4.0, 64).unwrap();
        assert_eq!(grid.span(), 256);
        let tile = grid.tile(0, 0, 0, 0).unwrap();
        assert_eq!(tile.request().output_width(), 64);
    }

    #[test]
    fn test_tiles_for_region() {
        let grid = TileGrid::new(100, 100, 1.0, 32).unwrap();
        let tiles = grid.tiles_for_region(&RegionRequest::new(30, 30, 10, 40));
        let origins: Vec<_> = tiles.iter().map(|t| (t.x, t.y)).collect();
        assert_eq!(origins, vec![(0, 0), (32, 0), (0, 32), (32, 32), (0, 64), (32, 64)]);
        assert!(grid.tiles_for_region(&RegionRequest::new(200, 0, 10, 10)).is_empty());
    }

    #[test]
    fn test_tile_for_pixel_and_local() {
        let grid = TileGrid::new(100, 100, 2.0, 16).unwrap();
        let tile = grid.tile_for_pixel(40.5, 7.0, 0, 0).unwrap();
        assert_eq!((tile.x, tile.y), (32, 0));
        assert_eq!(tile.to_local(40.5, 7.0), Some((3, 4)));
        assert_eq!(tile.to_local(10.0, 7.0), None);
        assert!(grid.tile_for_pixel(100.0, 0.0, 0, 0).is_none());
        assert!(grid.tile_for_pixel(-1.0, 0.0, 0, 0).is_none());
    }

    #[test]
    fn test_tile_identity_includes_plane() {
        let grid = TileGrid::new(64, 64, 1.0, 32).unwrap();
        assert_ne!(grid.tile(0, 0, 0, 0), grid.tile(0, 0, 1, 0));
        assert_eq!(grid.tile(1, 1, 0, 0), grid.tile_for_pixel(40.0, 40.0, 0, 0));
    }

    #[test]
    fn test_invalid_grid() {
        assert!(TileGrid::new(0, 10, 1.0, 8).is_err());
        assert!(TileGrid::new(10, 10, 0.0, 8).is_err());
        assert!(TileGrid::new(10, 10, 1.0, 0).is_err());
    }
}
