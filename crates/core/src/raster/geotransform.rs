//! Affine geotransformation for rasters

use super::Window;
use serde::{Deserialize, Serialize};

/// Affine transformation coefficients for georeferencing rasters.
///
/// Converts between pixel coordinates (col, row) and geographic coordinates (x, y):
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// Every raster produced in one pipeline run shares the input's pixel size
/// and rotation; only the origin moves when a tile is cut out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Pixel width (cell size in X direction)
    pub pixel_width: f64,
    /// Pixel height (cell size in Y direction, usually negative)
    pub pixel_height: f64,
    /// Rotation about X axis (usually 0)
    pub row_rotation: f64,
    /// Rotation about Y axis (usually 0)
    pub col_rotation: f64,
}

impl GeoTransform {
    /// Create a new GeoTransform with no rotation (north-up image)
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// Geographic coordinates of a fractional pixel position
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
        (x, y)
    }

    /// Convert pixel coordinates to geographic coordinates of the pixel center
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Convert geographic coordinates to fractional pixel coordinates
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;

        if det.abs() < 1e-10 {
            return (f64::NAN, f64::NAN);
        }

        let dx = x - self.origin_x;
        let dy = y - self.origin_y;

        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (-self.col_rotation * dx + self.pixel_width * dy) / det;

        (col, row)
    }

    /// Transform of the raster cut out of this one at `window`
    pub fn for_window(&self, window: &Window) -> GeoTransform {
        let (origin_x, origin_y) = self.apply(window.col_off as f64, window.row_off as f64);
        GeoTransform {
            origin_x,
            origin_y,
            ..*self
        }
    }

    /// Centre of a window, in CRS units
    pub fn window_centre(&self, window: &Window) -> (f64, f64) {
        self.apply(
            window.col_off as f64 + window.cols as f64 / 2.0,
            window.row_off as f64 + window.rows as f64 / 2.0,
        )
    }

    /// Pixel offset (row, col) of `other`'s origin within this grid.
    ///
    /// Returns `None` when the two transforms are not on the same pixel grid
    /// (different cell size or rotation, or an origin off the pixel lattice).
    pub fn offset_of(&self, other: &GeoTransform) -> Option<(isize, isize)> {
        let same_cells = (self.pixel_width - other.pixel_width).abs() < 1e-9
            && (self.pixel_height - other.pixel_height).abs() < 1e-9
            && (self.row_rotation - other.row_rotation).abs() < 1e-9
            && (self.col_rotation - other.col_rotation).abs() < 1e-9;
        if !same_cells {
            return None;
        }
        let (col, row) = self.geo_to_pixel(other.origin_x, other.origin_y);
        let (rc, rr) = (col.round(), row.round());
        if (col - rc).abs() > 1e-6 || (row - rr).abs() > 1e-6 {
            return None;
        }
        Some((rr as isize, rc as isize))
    }

    /// Get the cell size (assumes square pixels and no rotation)
    pub fn cell_size(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Calculate the bounding box (min_x, min_y, max_x, max_y) for a raster of given dimensions
    pub fn bounds(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(width as f64, 0.0),
            self.apply(0.0, height as f64),
            self.apply(width as f64, height as f64),
        ];
        corners.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        )
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}
