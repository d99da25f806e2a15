//! Single-band raster type

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement, Window};
use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};

/// A georeferenced single-band 2D raster grid.
///
/// Clump rasters (`Raster<u32>`), tile label rasters (`Raster<u32>`) and
/// binary masks (`Raster<u8>`) all use this type.
///
/// # Example
///
/// ```ignore
/// use tiledseg_core::Raster;
///
/// let mut clumps: Raster<u32> = Raster::new(100, 100);
/// clumps.set(10, 20, 7)?;
/// assert_eq!(clumps.get(10, 20)?, 7);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T: RasterElement> {
    /// Raster data stored in row-major order (row, col)
    data: Array2<T>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster from existing row-major data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;

        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Create a zeroed raster of another element type on the same grid
    pub fn with_same_meta<U: RasterElement>(&self) -> Raster<U> {
        Raster {
            data: Array2::zeros(self.data.dim()),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: None,
        }
    }

    /// Create a raster with the same dimensions and metadata, filled with a value
    pub fn like(&self, fill_value: T) -> Self {
        Self {
            data: Array2::from_elem(self.data.dim(), fill_value),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: self.nodata,
        }
    }

    // Dimensions

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Get value at (row, col) without bounds checking
    ///
    /// # Safety
    /// Caller must ensure row < self.rows() and col < self.cols()
    pub unsafe fn get_unchecked(&self, row: usize, col: usize) -> T {
        unsafe { *self.data.uget((row, col)) }
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        if row >= self.rows() || col >= self.cols() {
            return Err(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        self.data[(row, col)] = value;
        Ok(())
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut2<'_, T> {
        self.data.view_mut()
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    pub fn into_array(self) -> Array2<T> {
        self.data
    }

    /// Copy of the pixels inside `window`, georeferenced at the window origin
    pub fn window(&self, window: &Window) -> Result<Raster<T>> {
        self.check_window(window)?;
        let block = self
            .data
            .slice(s![window.row_off..window.row_end(), window.col_off..window.col_end()])
            .to_owned();
        Ok(Raster {
            data: block,
            transform: self.transform.for_window(window),
            crs: self.crs.clone(),
            nodata: self.nodata,
        })
    }

    /// Overwrite the pixels inside `window` with `block`
    pub fn paste(&mut self, window: &Window, block: &Raster<T>) -> Result<()> {
        self.check_window(window)?;
        if block.shape() != (window.rows, window.cols) {
            return Err(Error::SizeMismatch {
                er: window.rows,
                ec: window.cols,
                ar: block.rows(),
                ac: block.cols(),
            });
        }
        self.data
            .slice_mut(s![window.row_off..window.row_end(), window.col_off..window.col_end()])
            .assign(&block.data);
        Ok(())
    }

    /// Window of this raster's pixels that `other` occupies, when both share
    /// a pixel grid and `other` lies fully inside this raster.
    pub fn placement_of<U: RasterElement>(&self, other: &Raster<U>) -> Result<Window> {
        let (row, col) = self.transform.offset_of(other.transform()).ok_or_else(|| {
            Error::Other("rasters are not on the same pixel grid".to_string())
        })?;
        if row < 0 || col < 0 {
            return Err(Error::WindowOutOfBounds {
                window: format!("origin ({}, {})", row, col),
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        let window = Window::new(row as usize, col as usize, other.rows(), other.cols());
        self.check_window(&window)?;
        Ok(window)
    }

    fn check_window(&self, window: &Window) -> Result<()> {
        if !window.fits(self.rows(), self.cols()) {
            return Err(Error::WindowOutOfBounds {
                window: window.to_string(),
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        Ok(())
    }

    // Metadata

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Count of cells for which `pred` holds
    pub fn count_where(&self, pred: impl Fn(T) -> bool) -> usize {
        self.data.iter().filter(|&&v| pred(v)).count()
    }
}
