//! The input raster, read one window at a time
//!
//! The pipeline never holds the input's pixels as a whole. Full-extent
//! work (the validity mask, clump means) walks it in row blocks; tiles and
//! stage-3 subsets read their own bounding box.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiledseg_algorithms::segmentation::ClumpMeans;
use tiledseg_core::io::{RasterBackend, RasterInfo};
use tiledseg_core::{MultiBandRaster, Raster, Window};
use tracing::debug;

/// Rows read at once when walking the whole input
pub const BLOCK_ROWS: usize = 256;

/// A raster on disk addressed by window
#[derive(Clone)]
pub struct InputRaster {
    backend: Arc<dyn RasterBackend>,
    path: PathBuf,
    info: RasterInfo,
}

impl InputRaster {
    /// Read the header of `path`; no pixels are decoded
    pub fn open(backend: Arc<dyn RasterBackend>, path: &Path) -> Result<Self> {
        let info = backend.info(path)?;
        Ok(Self {
            backend,
            path: path.to_path_buf(),
            info,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &RasterInfo {
        &self.info
    }

    pub fn bands(&self) -> usize {
        self.info.bands
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.info.rows, self.info.cols)
    }

    pub fn read_window(&self, window: &Window) -> Result<MultiBandRaster> {
        Ok(self.backend.read_window(&self.path, window)?)
    }

    /// Full-width windows of at most `rows` rows, top to bottom
    pub fn row_blocks(&self, rows: usize) -> impl Iterator<Item = Window> {
        let (total, cols) = self.shape();
        let step = rows.max(1);
        (0..total)
            .step_by(step)
            .map(move |r| Window::new(r, 0, step.min(total - r), cols))
    }

    /// Binary validity mask of the whole input (1 valid), georeferenced
    /// like the input
    pub fn valid_mask(&self) -> Result<Raster<u8>> {
        let (rows, cols) = self.shape();
        let mut mask: Raster<u8> = Raster::new(rows, cols);
        mask.set_transform(self.info.transform);
        mask.set_crs(self.info.crs.clone());
        for window in self.row_blocks(BLOCK_ROWS) {
            let block = self.read_window(&window)?.valid_mask();
            mask.paste(&window, &block)?;
        }
        debug!("validity mask of {} from {} row blocks", self.path.display(), rows.div_ceil(BLOCK_ROWS));
        Ok(mask)
    }

    /// The input over `window`, no-data wherever `labels` differs from `id`.
    ///
    /// The no-data value is declared on the result so readers agree on it.
    pub fn masked_window(&self, labels: &Raster<u32>, id: u32, window: &Window) -> Result<MultiBandRaster> {
        let mut image = self.read_window(window)?;
        let block = labels.window(window)?;
        image.set_nodata(Some(image.effective_nodata()));
        image.mask_with(|r, c| block.data()[(r, c)] == id);
        Ok(image)
    }

    /// Per-clump band means of the input, painted over `clumps`
    pub fn clump_means(&self, clumps: &Raster<u32>) -> Result<MultiBandRaster> {
        let mut means = ClumpMeans::new(self.bands());
        for window in self.row_blocks(BLOCK_ROWS) {
            means.add(&self.read_window(&window)?, &clumps.window(&window)?)?;
        }
        Ok(means.paint(clumps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiledseg_algorithms::segmentation::clump_mean_image;
    use tiledseg_core::io::GeoTiffBackend;
    use tiledseg_core::{DataType, GeoTransform};

    fn written(dir: &Path, rows: usize, cols: usize) -> (MultiBandRaster, InputRaster) {
        let mut image = MultiBandRaster::new(2, rows, cols, DataType::U16);
        for ((b, r, c), v) in image.data_mut().indexed_iter_mut() {
            *v = ((b + 1) * (r * cols + c) % 997) as f64;
        }
        image.set_transform(GeoTransform::new(500.0, 900.0, 1.0, -1.0));
        image.set_nodata(Some(0.0));
        let path = dir.join("input.tif");
        let backend: Arc<dyn RasterBackend> = Arc::new(GeoTiffBackend::new());
        backend.write(&path, &image).unwrap();
        let input = InputRaster::open(backend, &path).unwrap();
        (image, input)
    }

    #[test]
    fn test_row_blocks_cover_every_row_once() {
        let dir = tempfile::tempdir().unwrap();
        let (_, input) = written(dir.path(), 300, 7);
        let blocks: Vec<Window> = input.row_blocks(128).collect();
        assert_eq!(
            blocks,
            vec![Window::new(0, 0, 128, 7), Window::new(128, 0, 128, 7), Window::new(256, 0, 44, 7)]
        );
    }

    #[test]
    fn test_streamed_mask_and_means_match_the_whole_image() {
        let dir = tempfile::tempdir().unwrap();
        let (image, input) = written(dir.path(), BLOCK_ROWS + 40, 12);
        assert_eq!(input.shape(), image.shape());
        assert_eq!(input.bands(), 2);

        let mask = input.valid_mask().unwrap();
        assert_eq!(mask.data(), image.valid_mask().data());
        assert_eq!(mask.transform(), image.transform());

        let mut clumps: Raster<u32> = mask.with_same_meta();
        for ((r, _), v) in clumps.data_mut().indexed_iter_mut() {
            *v = (r / 50) as u32 + 1;
        }
        let streamed = input.clump_means(&clumps).unwrap();
        let whole = clump_mean_image(&image, &clumps).unwrap();
        for (a, b) in streamed.data().iter().zip(whole.data().iter()) {
            assert!((a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_masked_window_reads_only_the_footprint() {
        let dir = tempfile::tempdir().unwrap();
        let (image, input) = written(dir.path(), 20, 20);
        let mut labels: Raster<u32> = Raster::new(20, 20);
        for r in 5..15 {
            for c in 5..=r {
                labels.set(r, c, 3).unwrap();
            }
        }
        let window = Window::new(5, 5, 10, 10);
        let block = input.masked_window(&labels, 3, &window).unwrap();
        assert_eq!(block.shape(), (10, 10));
        assert_eq!(block.nodata(), Some(0.0));
        assert!(!block.is_valid(0, 5));
        assert_eq!(block.data()[[1, 9, 2]], image.data()[[1, 14, 7]]);
    }
}
