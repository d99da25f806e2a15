//! Pixel windows into a raster

use serde::{Deserialize, Serialize};
use std::fmt;

/// A rectangular block of pixels, in the pixel grid of a parent raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub row_off: usize,
    pub col_off: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Window {
    pub fn new(row_off: usize, col_off: usize, rows: usize, cols: usize) -> Self {
        Self {
            row_off,
            col_off,
            rows,
            cols,
        }
    }

    /// Window covering a whole raster of the given shape
    pub fn full(rows: usize, cols: usize) -> Self {
        Self::new(0, 0, rows, cols)
    }

    /// Smallest window containing the inclusive pixel extent
    pub fn from_extent(min_row: usize, min_col: usize, max_row: usize, max_col: usize) -> Self {
        Self::new(min_row, min_col, max_row - min_row + 1, max_col - min_col + 1)
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.rows
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.cols
    }

    pub fn area(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Whether the window fits inside a raster of the given shape
    pub fn fits(&self, rows: usize, cols: usize) -> bool {
        self.row_end() <= rows && self.col_end() <= cols
    }

    /// Whether the parent-grid pixel (row, col) falls inside the window
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.row_off && row < self.row_end() && col >= self.col_off && col < self.col_end()
    }

    /// Intersection of two windows, `None` when they are disjoint
    pub fn intersect(&self, other: &Window) -> Option<Window> {
        let r0 = self.row_off.max(other.row_off);
        let c0 = self.col_off.max(other.col_off);
        let r1 = self.row_end().min(other.row_end());
        let c1 = self.col_end().min(other.col_end());
        if r0 >= r1 || c0 >= c1 {
            return None;
        }
        Some(Window::new(r0, c0, r1 - r0, c1 - c0))
    }

    /// Smallest window containing both
    pub fn union(&self, other: &Window) -> Window {
        let r0 = self.row_off.min(other.row_off);
        let c0 = self.col_off.min(other.col_off);
        let r1 = self.row_end().max(other.row_end());
        let c1 = self.col_end().max(other.col_end());
        Window::new(r0, c0, r1 - r0, c1 - c0)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[rows {}..{}, cols {}..{}]",
            self.row_off,
            self.row_end(),
            self.col_off,
            self.col_end()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_and_union() {
        let a = Window::new(0, 0, 10, 10);
        let b = Window::new(5, 8, 10, 10);
        assert_eq!(a.intersect(&b), Some(Window::new(5, 8, 5, 2)));
        assert_eq!(a.union(&b), Window::new(0, 0, 15, 18));
        assert_eq!(a.intersect(&Window::new(10, 0, 2, 2)), None);
    }

    #[test]
    fn test_from_extent_is_inclusive() {
        let w = Window::from_extent(2, 3, 2, 7);
        assert_eq!(w.rows, 1);
        assert_eq!(w.cols, 5);
        assert!(w.contains(2, 7));
        assert!(!w.contains(3, 7));
    }
}
