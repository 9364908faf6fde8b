//! Connected components of a class raster

use ndarray::Array2;
use pixclass_core::{Error, Raster, Result};

/// One 4-connected region of equal class value.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Class value shared by every pixel
    pub value: u8,
    /// `(row, col)` pixels in discovery order
    pub pixels: Vec<(usize, usize)>,
    /// Inclusive bounds `(row_min, col_min, row_max, col_max)`
    pub bounds: (usize, usize, usize, usize),
}

impl Component {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }
}

/// Label 4-connected components of pixels where `include(value)` holds.
///
/// Components are returned in row-major order of their first pixel, so the
/// result does not depend on anything but the raster content.
pub fn connected_components<F>(raster: &Raster<u8>, include: F) -> Result<Vec<Component>>
where
    F: Fn(u8) -> bool,
{
    let (rows, cols) = raster.shape();
    if rows as u128 * cols as u128 > u32::MAX as u128 {
        return Err(Error::ResourceLimit {
            requested: rows as u128 * cols as u128,
            limit: u32::MAX as u128,
        });
    }
    let grid = raster.data();
    let mut visited = Array2::<bool>::from_elem((rows, cols), false);
    let mut components = Vec::new();

    for r in 0..rows {
        for c in 0..cols {
            let value = grid[[r, c]];
            if visited[[r, c]] || !include(value) {
                continue;
            }
            components.push(flood_fill(grid, &mut visited, r, c, value));
        }
    }
    Ok(components)
}

fn flood_fill(
    grid: &Array2<u8>,
    visited: &mut Array2<bool>,
    r: usize,
    c: usize,
    value: u8,
) -> Component {
    let (rows, cols) = grid.dim();
    let mut pixels = Vec::new();
    let mut bounds = (r, c, r, c);
    let mut stack = vec![(r, c)];

    while let Some((cr, cc)) = stack.pop() {
        if visited[[cr, cc]] || grid[[cr, cc]] != value {
            continue;
        }
        visited[[cr, cc]] = true;
        pixels.push((cr, cc));
        bounds.0 = bounds.0.min(cr);
        bounds.1 = bounds.1.min(cc);
        bounds.2 = bounds.2.max(cr);
        bounds.3 = bounds.3.max(cc);

        if cr > 0 { stack.push((cr - 1, cc)); }
        if cr + 1 < rows { stack.push((cr + 1, cc)); }
        if cc > 0 { stack.push((cr, cc - 1)); }
        if cc + 1 < cols { stack.push((cr, cc + 1)); }
    }

    Component {
        value,
        pixels,
        bounds,
    }
}
