//! Window shapes for per-pixel neighbourhood features

/// Set of pixel offsets around a centre pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighborhood {
    /// `(2r + 1)²` square
    Square(usize),
    /// Offsets within Euclidean distance `r`
    Disk(usize),
}

impl Neighborhood {
    pub fn radius(&self) -> usize {
        match self {
            Neighborhood::Square(r) | Neighborhood::Disk(r) => *r,
        }
    }

    fn includes(&self, dr: isize, dc: isize) -> bool {
        match self {
            Neighborhood::Square(_) => true,
            Neighborhood::Disk(r) => (dr * dr + dc * dc) as usize <= r * r,
        }
    }

    /// Offsets `(row, col)` in row-major order, centre included.
    pub fn offsets(&self) -> Vec<(isize, isize)> {
        let r = self.radius() as isize;
        (-r..=r)
            .flat_map(|dr| (-r..=r).map(move |dc| (dr, dc)))
            .filter(|&(dr, dc)| self.includes(dr, dc))
            .collect()
    }

    /// Number of offsets
    pub fn len(&self) -> usize {
        self.offsets().len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighborhood_offsets() {
        assert_eq!(Neighborhood::Square(0).offsets(), vec![(0, 0)]);
        let square = Neighborhood::Square(1).offsets();
        assert_eq!(square.len(), 9);
        assert_eq!((square[0], square[4]), ((-1, -1), (0, 0)));
        // (2, 1) is outside the radius-2 disk
        assert_eq!(Neighborhood::Disk(2).len(), 13);
        assert_eq!(Neighborhood::Disk(1).len(), 5);
    }
}
