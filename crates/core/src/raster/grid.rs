//! Single-band grids

use crate::error::{Error, Result};
use crate::raster::RasterElement;
use ndarray::{s, Array2, ArrayView2};

/// Single-band 2D grid, indexed `(row, col)`.
///
/// Class maps are `Raster<u8>` holding one class index per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T: RasterElement> {
    data: Array2<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Zero-filled grid
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            data: Array2::zeros((rows, cols)),
        }
    }

    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            data: Array2::from_elem((rows, cols), value),
        }
    }

    /// Wrap row-major values; fails if `values.len() != rows * cols`.
    pub fn from_vec(values: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        Array2::from_shape_vec((rows, cols), values)
            .map(|data| Self { data })
            .map_err(|_| Error::InvalidDimensions {
                width: cols,
                height: rows,
            })
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn out_of_bounds(&self, row: usize, col: usize) -> Error {
        Error::IndexOutOfBounds {
            row,
            col,
            rows: self.rows(),
            cols: self.cols(),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or_else(|| self.out_of_bounds(row, col))
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        match self.data.get_mut((row, col)) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(self.out_of_bounds(row, col)),
        }
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    /// Copy of the window starting at `(row, col)`.
    pub fn crop(&self, row: usize, col: usize, rows: usize, cols: usize) -> Result<Self> {
        if row + rows > self.rows() || col + cols > self.cols() {
            return Err(self.out_of_bounds(row + rows, col + cols));
        }
        Ok(Self {
            data: self.data.slice(s![row..row + rows, col..col + cols]).to_owned(),
        })
    }
}

impl Raster<u8> {
    /// Pixel count per class index `0..n_classes`; larger indices are ignored.
    pub fn class_counts(&self, n_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; n_classes];
        for &v in self.data.iter() {
            if let Some(count) = counts.get_mut(v as usize) {
                *count += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_bounds() {
        let mut raster: Raster<u8> = Raster::new(4, 6);
        assert_eq!(raster.shape(), (4, 6));
        raster.set(3, 5, 2).unwrap();
        assert_eq!(raster.get(3, 5).unwrap(), 2);
        assert!(raster.get(4, 0).is_err());
        assert!(raster.set(0, 6, 1).is_err());
    }

    #[test]
    fn test_from_vec_checks_length() {
        assert!(Raster::from_vec(vec![0u8; 5], 2, 3).is_err());
        let raster = Raster::from_vec(vec![0u8, 1, 2, 3, 4, 5], 2, 3).unwrap();
        assert_eq!(raster.get(1, 0).unwrap(), 3);
    }

    #[test]
    fn test_crop_window() {
        let raster = Raster::from_vec((0..16).collect::<Vec<u8>>(), 4, 4).unwrap();
        let crop = raster.crop(1, 1, 2, 2).unwrap();
        assert_eq!(crop.data().iter().copied().collect::<Vec<_>>(), vec![5, 6, 9, 10]);
        assert!(raster.crop(3, 0, 2, 1).is_err());
    }

    #[test]
    fn test_class_counts() {
        let raster = Raster::from_vec(vec![0u8, 1, 1, 2, 7, 1], 2, 3).unwrap();
        assert_eq!(raster.class_counts(3), vec![1, 3, 1]);
        assert_eq!(Raster::filled(2, 2, 1u8).class_counts(2), vec![0, 4]);
    }
}
