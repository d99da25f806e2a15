//! Materialising tile footprints as standalone images

use crate::error::{Result, Stage};
use crate::source::InputRaster;
use crate::tiled::TileGrid;
use crate::workdir::WorkingDirectory;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tiledseg_core::io::RasterBackend;
use tracing::debug;

/// Cuts tile images out of the input raster
pub struct TileCutter<'a> {
    backend: &'a dyn RasterBackend,
}

impl<'a> TileCutter<'a> {
    pub fn new(backend: &'a dyn RasterBackend) -> Self {
        Self { backend }
    }

    /// Write one image per tile and record its path on the tile.
    ///
    /// Each image covers the tile's bounding box, read from the input by
    /// window; pixels outside the footprint are set to no-data. The
    /// input's data type is kept.
    pub fn cut(
        &self,
        grid: &mut TileGrid,
        input: &InputRaster,
        workdir: &WorkingDirectory,
        stage: Stage,
    ) -> Result<BTreeMap<u32, PathBuf>> {
        workdir.prepare_stage(stage)?;
        let mut paths = BTreeMap::new();
        for tile in grid.tiles() {
            let path = workdir.tile_image(stage, tile.id);
            let image = input.masked_window(grid.labels(), tile.id, &tile.bbox)?;
            self.backend.write(&path, &image)?;
            paths.insert(tile.id, path);
        }
        for tile in grid.tiles_mut() {
            tile.image_path = paths.get(&tile.id).cloned();
        }
        debug!("cut {} stage-{} tiles", paths.len(), stage);
        Ok(paths)
    }
}
