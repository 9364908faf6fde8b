//! Single-plane filters used by the feature calculators
//!
//! All filters treat pixels beyond the array edge as copies of the nearest
//! edge pixel. Feature calculators pad their input before filtering, so the
//! clamping only ever touches padding that is cropped away afterwards.

use crate::maybe_rayon::*;
use ndarray::Array2;
use pixclass_core::{Error, Result};

/// Build an array row by row, in parallel when enabled.
fn par_rows<F>(rows: usize, cols: usize, f: F) -> Result<Array2<f32>>
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    let data: Vec<f32> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0.0f32; cols];
            f(row, &mut row_data);
            row_data
        })
        .collect();
    Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))
}

#[inline]
fn clamped(a: &Array2<f32>, r: isize, c: isize) -> f32 {
    let (rows, cols) = a.dim();
    let r = r.clamp(0, rows as isize - 1) as usize;
    let c = c.clamp(0, cols as isize - 1) as usize;
    a[[r, c]]
}

/// 1D Gaussian kernel truncated at 3σ, normalized to sum 1.
pub fn gaussian_kernel(sigma: f64) -> Vec<f32> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let half = (3.0 * sigma).ceil() as usize;
    let denom = 2.0 * sigma * sigma;
    let kernel: Vec<f64> = (0..=2 * half)
        .map(|i| {
            let x = i as f64 - half as f64;
            (-x * x / denom).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.into_iter().map(|w| (w / sum) as f32).collect()
}

/// Half-width of the Gaussian kernel for `sigma`.
pub fn gaussian_radius(sigma: f64) -> usize {
    gaussian_kernel(sigma).len() / 2
}

/// Separable Gaussian smoothing. `sigma == 0` returns a copy.
pub fn gaussian_smooth(plane: &Array2<f32>, sigma: f64) -> Result<Array2<f32>> {
    let (rows, cols) = plane.dim();
    if rows == 0 || cols == 0 {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }
    if sigma <= 0.0 {
        return Ok(plane.clone());
    }
    let kernel = gaussian_kernel(sigma);
    let half = (kernel.len() / 2) as isize;

    // Row pass
    let horizontal = par_rows(rows, cols, |row, out| {
        for (col, v) in out.iter_mut().enumerate() {
            let mut sum = 0.0f32;
            for (k, &w) in kernel.iter().enumerate() {
                sum += w * clamped(plane, row as isize, col as isize + k as isize - half);
            }
            *v = sum;
        }
    })?;

    // Column pass
    par_rows(rows, cols, |row, out| {
        for (col, v) in out.iter_mut().enumerate() {
            let mut sum = 0.0f32;
            for (k, &w) in kernel.iter().enumerate() {
                sum += w * clamped(&horizontal, row as isize + k as isize - half, col as isize);
            }
            *v = sum;
        }
    })
}

/// Sobel gradient magnitude `sqrt(Gx² + Gy²)`.
pub fn sobel_magnitude(plane: &Array2<f32>) -> Result<Array2<f32>> {
    let (rows, cols) = plane.dim();
    par_rows(rows, cols, |row, out| {
        let r = row as isize;
        for (col, v) in out.iter_mut().enumerate() {
            let c = col as isize;
            let z = |dr: isize, dc: isize| clamped(plane, r + dr, c + dc);
            let gx = (z(-1, 1) + 2.0 * z(0, 1) + z(1, 1)) - (z(-1, -1) + 2.0 * z(0, -1) + z(1, -1));
            let gy = (z(1, -1) + 2.0 * z(1, 0) + z(1, 1)) - (z(-1, -1) + 2.0 * z(-1, 0) + z(-1, 1));
            *v = (gx * gx + gy * gy).sqrt();
        }
    })
}

/// 4-neighbour Laplacian.
pub fn laplacian(plane: &Array2<f32>) -> Result<Array2<f32>> {
    let (rows, cols) = plane.dim();
    par_rows(rows, cols, |row, out| {
        let r = row as isize;
        for (col, v) in out.iter_mut().enumerate() {
            let c = col as isize;
            let center = clamped(plane, r, c);
            *v = clamped(plane, r - 1, c)
                + clamped(plane, r + 1, c)
                + clamped(plane, r, c - 1)
                + clamped(plane, r, c + 1)
                - 4.0 * center;
        }
    })
}

/// Population standard deviation in a square window of the given radius.
pub fn local_std_dev(plane: &Array2<f32>, radius: usize) -> Result<Array2<f32>> {
    let (rows, cols) = plane.dim();
    let rad = radius as isize;
    let n = ((2 * radius + 1) * (2 * radius + 1)) as f64;
    par_rows(rows, cols, |row, out| {
        let r = row as isize;
        for (col, v) in out.iter_mut().enumerate() {
            let c = col as isize;
            let mut sum = 0.0f64;
            let mut sum_sq = 0.0f64;
            for dr in -rad..=rad {
                for dc in -rad..=rad {
                    let x = clamped(plane, r + dr, c + dc) as f64;
                    sum += x;
                    sum_sq += x * x;
                }
            }
            let mean = sum / n;
            *v = (sum_sq / n - mean * mean).max(0.0).sqrt() as f32;
        }
    })
}
