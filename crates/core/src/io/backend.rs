//! Raster access capability used by the pipeline

use super::attribute_table::{sidecar_path, AttributeTable};
use super::native::{self, GeoTiffHeader};
use crate::error::{Error, Result};
use crate::raster::{MultiBandRaster, Raster, RasterElement, Window};
use ndarray::s;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Dimensions and georeferencing of a raster on disk
pub type RasterInfo = GeoTiffHeader;

/// The raster operations the pipeline relies on.
///
/// Implementations must be usable from several worker threads at once;
/// every call is independent and addressed by path.
pub trait RasterBackend: Send + Sync {
    fn info(&self, path: &Path) -> Result<RasterInfo>;

    /// Read the whole raster. The pipeline only does this for rasters of
    /// its own making; the input is always read by window.
    fn read(&self, path: &Path) -> Result<MultiBandRaster>;

    /// Read a block of pixels, georeferenced at the window origin
    fn read_window(&self, path: &Path, window: &Window) -> Result<MultiBandRaster>;

    /// Create or replace a raster. Readers never observe a partial file.
    fn write(&self, path: &Path, image: &MultiBandRaster) -> Result<()>;

    /// Overwrite a block of an existing raster. Pixels outside the window
    /// are kept; the file may be rewritten as a whole.
    fn write_window(&self, path: &Path, window: &Window, block: &MultiBandRaster) -> Result<()>;

    fn write_attribute_table(&self, path: &Path, table: &AttributeTable) -> Result<()>;

    fn read_attribute_table(&self, path: &Path) -> Result<AttributeTable>;
}

/// Multi-page GeoTIFF files on the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffBackend;

impl GeoTiffBackend {
    pub fn new() -> Self {
        Self
    }
}

impl RasterBackend for GeoTiffBackend {
    fn info(&self, path: &Path) -> Result<RasterInfo> {
        native::read_geotiff_header(path)
    }

    fn read(&self, path: &Path) -> Result<MultiBandRaster> {
        native::read_geotiff(path)
    }

    fn read_window(&self, path: &Path, window: &Window) -> Result<MultiBandRaster> {
        native::read_geotiff_window(path, window)
    }

    fn write(&self, path: &Path, image: &MultiBandRaster) -> Result<()> {
        let partial = partial_path(path);
        native::write_geotiff(image, &partial)?;
        fs::rename(&partial, path)?;
        debug!(
            "wrote {} ({} bands, {}x{}, {})",
            path.display(),
            image.bands(),
            image.rows(),
            image.cols(),
            image.data_type()
        );
        Ok(())
    }

    fn write_window(&self, path: &Path, window: &Window, block: &MultiBandRaster) -> Result<()> {
        let mut image = native::read_geotiff(path)?;
        if !window.fits(image.rows(), image.cols()) {
            return Err(Error::WindowOutOfBounds {
                window: window.to_string(),
                rows: image.rows(),
                cols: image.cols(),
            });
        }
        if block.bands() != image.bands() || block.shape() != (window.rows, window.cols) {
            return Err(Error::SizeMismatch {
                er: window.rows,
                ec: window.cols,
                ar: block.rows(),
                ac: block.cols(),
            });
        }
        image
            .data_mut()
            .slice_mut(s![.., window.row_off..window.row_end(), window.col_off..window.col_end()])
            .assign(block.data());
        self.write(path, &image)
    }

    fn write_attribute_table(&self, path: &Path, table: &AttributeTable) -> Result<()> {
        let target = sidecar_path(path);
        let partial = partial_path(&target);
        table.write(&partial)?;
        fs::rename(&partial, &target)?;
        Ok(())
    }

    fn read_attribute_table(&self, path: &Path) -> Result<AttributeTable> {
        AttributeTable::read(sidecar_path(path))
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Read a single-band raster through any backend
pub fn read_band<T: RasterElement>(backend: &dyn RasterBackend, path: &Path) -> Result<Raster<T>> {
    native::image_to_raster(&backend.read(path)?)
}

/// Write a single-band raster through any backend, keeping its element type
pub fn write_band<T: RasterElement>(
    backend: &dyn RasterBackend,
    path: &Path,
    raster: &Raster<T>,
) -> Result<()> {
    backend.write(path, &native::raster_to_image(raster))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{DataType, GeoTransform};

    #[test]
    fn test_write_is_atomic_and_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.img");
        let backend = GeoTiffBackend::new();

        let mut image = MultiBandRaster::new(2, 3, 3, DataType::I16);
        image.data_mut().fill(-5.0);
        backend.write(&path, &image).unwrap();

        assert!(path.exists());
        assert!(!partial_path(&path).exists());
        assert_eq!(backend.info(&path).unwrap().bands, 2);
    }

    #[test]
    fn test_window_read_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.tif");
        let backend = GeoTiffBackend::new();

        let mut image = MultiBandRaster::new(1, 4, 4, DataType::F32);
        image.set_transform(GeoTransform::new(0.0, 100.0, 1.0, -1.0));
        backend.write(&path, &image).unwrap();

        let window = Window::new(1, 1, 2, 2);
        let mut block = MultiBandRaster::new(1, 2, 2, DataType::F32);
        block.data_mut().fill(3.0);
        backend.write_window(&path, &window, &block).unwrap();

        let back = backend.read_window(&path, &window).unwrap();
        assert_eq!(back.data(), block.data());
        assert_eq!(image.transform().offset_of(back.transform()), Some((1, 1)));

        let whole = backend.read(&path).unwrap();
        assert_eq!(whole.data().iter().filter(|&&v| v == 3.0).count(), 4);
    }

    #[test]
    fn test_typed_band_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.tif");
        let backend: &dyn RasterBackend = &GeoTiffBackend;

        let mask = Raster::<u8>::from_vec(vec![0, 1, 1, 0], 2, 2).unwrap();
        write_band(backend, &path, &mask).unwrap();
        let back: Raster<u8> = read_band(backend, &path).unwrap();
        assert_eq!(back.data(), mask.data());

        let table = AttributeTable::default();
        backend.write_attribute_table(&path, &table).unwrap();
        assert!(backend.read_attribute_table(&path).unwrap().is_empty());
    }
}
