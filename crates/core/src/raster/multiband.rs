//! Multi-band imagery

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{DataType, GeoTransform, Raster, Window};
use ndarray::{s, Array3, ArrayView1, ArrayView2, Axis};

/// A georeferenced multi-band image, stored as `f64` in (band, row, col) order.
///
/// The on-disk pixel type is carried in [`DataType`] so that tiles cut from
/// the image are written back in the same type.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiBandRaster {
    data: Array3<f64>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<f64>,
    data_type: DataType,
}

impl MultiBandRaster {
    /// Zero-filled image
    pub fn new(bands: usize, rows: usize, cols: usize, data_type: DataType) -> Self {
        Self::from_array(Array3::zeros((bands, rows, cols)), data_type)
    }

    pub fn from_array(data: Array3<f64>, data_type: DataType) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
            data_type,
        }
    }

    /// Build an image from single-band rasters sharing one grid
    pub fn from_bands(bands: &[Array3<f64>], data_type: DataType) -> Result<Self> {
        let views: Vec<_> = bands.iter().map(|b| b.view()).collect();
        let data = ndarray::concatenate(Axis(0), &views)
            .map_err(|e| Error::Other(format!("cannot stack bands: {}", e)))?;
        Ok(Self::from_array(data, data_type))
    }

    pub fn bands(&self) -> usize {
        self.data.dim().0
    }

    pub fn rows(&self) -> usize {
        self.data.dim().1
    }

    pub fn cols(&self) -> usize {
        self.data.dim().2
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    /// One band, zero-based
    pub fn band(&self, index: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), index)
    }

    /// All band values of one pixel
    pub fn pixel(&self, row: usize, col: usize) -> ArrayView1<'_, f64> {
        self.data.slice(s![.., row, col])
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

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

    /// Declared no-data value, if the source carried one
    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<f64>) {
        self.nodata = nodata;
    }

    /// Declared no-data, or the data type's default when none is declared
    pub fn effective_nodata(&self) -> f64 {
        self.nodata.unwrap_or_else(|| self.data_type.default_nodata())
    }

    /// A pixel is valid when every band is finite and differs from no-data
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        let nodata = self.effective_nodata();
        self.pixel(row, col)
            .iter()
            .all(|&v| v.is_finite() && !same_value(v, nodata))
    }

    /// Binary mask (1 valid, 0 invalid) on the same grid
    pub fn valid_mask(&self) -> Raster<u8> {
        let (rows, cols) = self.shape();
        let mut mask: Raster<u8> = Raster::new(rows, cols);
        mask.set_transform(self.transform);
        mask.set_crs(self.crs.clone());
        let data = mask.data_mut();
        for r in 0..rows {
            for c in 0..cols {
                if self.is_valid(r, c) {
                    data[(r, c)] = 1;
                }
            }
        }
        mask
    }

    /// Number of valid pixels
    pub fn valid_count(&self) -> usize {
        let (rows, cols) = self.shape();
        (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .filter(|&(r, c)| self.is_valid(r, c))
            .count()
    }

    /// Copy of the pixels inside `window`, georeferenced at the window origin
    pub fn window(&self, window: &Window) -> Result<MultiBandRaster> {
        if !window.fits(self.rows(), self.cols()) {
            return Err(Error::WindowOutOfBounds {
                window: window.to_string(),
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        let data = self
            .data
            .slice(s![.., window.row_off..window.row_end(), window.col_off..window.col_end()])
            .to_owned();
        Ok(MultiBandRaster {
            data,
            transform: self.transform.for_window(window),
            crs: self.crs.clone(),
            nodata: self.nodata,
            data_type: self.data_type,
        })
    }

    /// Keep only the given bands, listed with 1-based indices
    pub fn select_bands(&self, indices: &[usize]) -> Result<MultiBandRaster> {
        if indices.is_empty() {
            return Err(Error::InvalidParameter {
                name: "band_subset",
                value: "[]".to_string(),
                reason: "at least one band is required".to_string(),
            });
        }
        for &i in indices {
            if i == 0 || i > self.bands() {
                return Err(Error::InvalidParameter {
                    name: "band_subset",
                    value: i.to_string(),
                    reason: format!("band index must be in 1..={}", self.bands()),
                });
            }
        }
        let zero_based: Vec<usize> = indices.iter().map(|i| i - 1).collect();
        Ok(MultiBandRaster {
            data: self.data.select(Axis(0), &zero_based),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: self.nodata,
            data_type: self.data_type,
        })
    }

    /// Set every band to the effective no-data value where `keep` is false.
    ///
    /// `keep` is called with (row, col) in this image's own pixel space.
    pub fn mask_with(&mut self, keep: impl Fn(usize, usize) -> bool) {
        let nodata = self.effective_nodata();
        let (rows, cols) = self.shape();
        for r in 0..rows {
            for c in 0..cols {
                if !keep(r, c) {
                    self.data.slice_mut(s![.., r, c]).fill(nodata);
                }
            }
        }
    }
}

/// Equality that treats two NaNs as the same value
fn same_value(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MultiBandRaster {
        let mut img = MultiBandRaster::new(2, 4, 4, DataType::U8);
        img.data_mut().fill(10.0);
        img.set_transform(GeoTransform::new(100.0, 200.0, 25.0, -25.0));
        img
    }

    #[test]
    fn test_validity_uses_default_nodata() {
        let mut img = sample();
        // uint8 without declared no-data treats 0 as no-data
        img.data_mut()[[1, 2, 3]] = 0.0;
        assert!(!img.is_valid(2, 3));
        assert!(img.is_valid(0, 0));
        assert_eq!(img.valid_count(), 15);
    }

    #[test]
    fn test_declared_nodata_overrides_default() {
        let mut img = sample();
        img.set_nodata(Some(10.0));
        assert_eq!(img.valid_count(), 0);
    }

    #[test]
    fn test_nan_is_invalid() {
        let mut img = MultiBandRaster::new(1, 2, 2, DataType::F32);
        img.data_mut().fill(1.5);
        img.data_mut()[[0, 0, 1]] = f64::NAN;
        let mask = img.valid_mask();
        assert_eq!(mask.get(0, 1).unwrap(), 0);
        assert_eq!(mask.count_where(|v| v == 1), 3);
    }

    #[test]
    fn test_window_moves_origin() {
        let img = sample();
        let w = img.window(&Window::new(1, 2, 2, 2)).unwrap();
        assert_eq!(w.shape(), (2, 2));
        assert_eq!(img.transform().offset_of(w.transform()), Some((1, 2)));
    }

    #[test]
    fn test_select_bands_is_one_based() {
        let mut img = sample();
        img.data_mut().index_axis_mut(Axis(0), 1).fill(7.0);
        let second = img.select_bands(&[2]).unwrap();
        assert_eq!(second.bands(), 1);
        assert_eq!(second.pixel(0, 0)[0], 7.0);
        assert!(img.select_bands(&[0]).is_err());
        assert!(img.select_bands(&[3]).is_err());
    }

    #[test]
    fn test_mask_with() {
        let mut img = sample();
        img.mask_with(|r, _| r < 2);
        assert_eq!(img.valid_count(), 8);
    }
}
