//! Multi-band pixel stacks

use crate::error::{Error, Result};
use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2};

/// A stack of `f32` bands sharing one pixel grid.
///
/// Used both for raw image pixels read from an [`ImageServer`](crate::image::ImageServer)
/// and for feature images. Indexing is `(band, row, col)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BandStack {
    data: Array3<f32>,
    names: Vec<String>,
}

impl BandStack {
    /// Wrap a `(bands, rows, cols)` array. Names default to `Band 1..n`.
    pub fn new(data: Array3<f32>) -> Self {
        let names = (0..data.dim().0).map(|b| format!("Band {}", b + 1)).collect();
        Self { data, names }
    }

    /// Wrap an array with explicit band names.
    pub fn with_names(data: Array3<f32>, names: Vec<String>) -> Result<Self> {
        if names.len() != data.dim().0 {
            return Err(Error::invalid_parameter(
                "names",
                names.len(),
                format!("expected {} band names", data.dim().0),
            ));
        }
        Ok(Self { data, names })
    }

    /// Stack single-band planes. All planes must have the same shape.
    pub fn from_planes(planes: &[Array2<f32>]) -> Result<Self> {
        let Some(first) = planes.first() else {
            return Ok(Self::new(Array3::zeros((0, 0, 0))));
        };
        let (rows, cols) = first.dim();
        let mut data = Array3::zeros((planes.len(), rows, cols));
        for (b, plane) in planes.iter().enumerate() {
            if plane.dim() != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: rows,
                    ec: cols,
                    ar: plane.nrows(),
                    ac: plane.ncols(),
                });
            }
            data.slice_mut(s![b, .., ..]).assign(plane);
        }
        Ok(Self::new(data))
    }

    /// Number of bands
    pub fn n_bands(&self) -> usize {
        self.data.dim().0
    }

    /// Number of rows (height)
    pub fn rows(&self) -> usize {
        self.data.dim().1
    }

    /// Number of columns (width)
    pub fn cols(&self) -> usize {
        self.data.dim().2
    }

    /// Band names in order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Replace the band names.
    pub fn set_names(&mut self, names: Vec<String>) -> Result<()> {
        if names.len() != self.n_bands() {
            return Err(Error::invalid_parameter(
                "names",
                names.len(),
                format!("expected {} band names", self.n_bands()),
            ));
        }
        self.names = names;
        Ok(())
    }

    /// Value of one band at (row, col)
    pub fn get(&self, band: usize, row: usize, col: usize) -> Result<f32> {
        self.data
            .get((band, row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// View of one band
    pub fn band(&self, band: usize) -> ArrayView2<'_, f32> {
        self.data.slice(s![band, .., ..])
    }

    /// All band values at one pixel
    pub fn pixel(&self, row: usize, col: usize) -> ArrayView1<'_, f32> {
        self.data.slice(s![.., row, col])
    }

    /// Underlying `(bands, rows, cols)` array
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Copy a window of all bands.
    pub fn crop(&self, row: usize, col: usize, rows: usize, cols: usize) -> Result<Self> {
        if row + rows > self.rows() || col + cols > self.cols() {
            return Err(Error::IndexOutOfBounds {
                row: row + rows,
                col: col + cols,
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        Ok(Self {
            data: self
                .data
                .slice(s![.., row..row + rows, col..col + cols])
                .to_owned(),
            names: self.names.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_planes() {
        let a = Array2::from_elem((3, 4), 1.0f32);
        let b = Array2::from_elem((3, 4), 2.0f32);
        let stack = BandStack::from_planes(&[a, b]).unwrap();
        assert_eq!(stack.n_bands(), 2);
        assert_eq!((stack.rows(), stack.cols()), (3, 4));
        assert_eq!(stack.pixel(1, 1).to_vec(), vec![1.0, 2.0]);
        assert_eq!(stack.names()[1], "Band 2");
    }

    #[test]
    fn test_from_planes_mismatch() {
        let a = Array2::from_elem((3, 4), 1.0f32);
        let b = Array2::from_elem((4, 4), 2.0f32);
        assert!(BandStack::from_planes(&[a, b]).is_err());
    }

    #[test]
    fn test_crop() {
        let data = Array3::from_shape_fn((2, 4, 4), |(b, r, c)| (b * 100 + r * 4 + c) as f32);
        let stack = BandStack::new(data);
        let crop = stack.crop(1, 2, 2, 2).unwrap();
        assert_eq!(crop.get(0, 0, 0).unwrap(), 6.0);
        assert_eq!(crop.get(1, 1, 1).unwrap(), 111.0);
        assert!(stack.crop(3, 3, 2, 2).is_err());
    }
}
