//! File-level wrapper around the per-tile segmentation primitive
//!
//! Workers only ever talk to each other through the paths handed to these
//! calls: a tile image in, a clump raster with its attribute table out.

use crate::pool::TaskBudget;
use std::path::Path;
use std::sync::Arc;
use tiledseg_algorithms::border::BorderTracker;
use tiledseg_algorithms::interrupt::Interrupt;
use tiledseg_algorithms::params::SegmentationParams;
use tiledseg_algorithms::segmentation::{ShepherdSegmenter, TileSegmenter};
use tiledseg_algorithms::stats::TileStats;
use tiledseg_core::io::{read_band, write_band, AttributeTable, RasterBackend};
use tiledseg_core::{Raster, Result};
use tracing::debug;

/// Output locations of a stage-1 segmentation
#[derive(Debug, Clone, Copy)]
pub struct StatsOut<'a> {
    pub centres: &'a Path,
    pub stretch: &'a Path,
}

#[derive(Clone)]
pub struct PerTileSegmenter {
    backend: Arc<dyn RasterBackend>,
    primitive: Arc<dyn TileSegmenter>,
}

impl PerTileSegmenter {
    pub fn new(backend: Arc<dyn RasterBackend>, primitive: Arc<dyn TileSegmenter>) -> Self {
        Self { backend, primitive }
    }

    /// The built-in primitive over the given backend
    pub fn shepherd(backend: Arc<dyn RasterBackend>) -> Self {
        Self::new(backend, Arc::new(ShepherdSegmenter::new()))
    }

    /// Segment a tile, deriving its own statistics, and write the clumps
    /// (with attribute table) and the `.centres` / `.stretch` files.
    pub fn segment_derive(
        &self,
        tile_image: &Path,
        clumps_out: &Path,
        stats_out: StatsOut<'_>,
        params: &SegmentationParams,
        budget: &TaskBudget,
    ) -> Result<TileStats> {
        let image = self.backend.read(tile_image)?;
        let out = self.primitive.segment_derive(&image, params, budget)?;
        within_budget(budget, || self.write_clumps(clumps_out, &out.clumps))?;
        out.stats.write(stats_out.centres, stats_out.stretch)?;
        debug!(
            "derived {} centres from {}",
            out.stats.kcentres.len(),
            tile_image.display()
        );
        Ok(out.stats)
    }

    /// Segment a tile with statistics from another tile
    pub fn segment_reuse(
        &self,
        tile_image: &Path,
        clumps_out: &Path,
        stats_in: &TileStats,
        params: &SegmentationParams,
        budget: &TaskBudget,
    ) -> Result<()> {
        let image = self.backend.read(tile_image)?;
        let clumps = self.primitive.segment_reuse(&image, stats_in, params, budget)?;
        within_budget(budget, || self.write_clumps(clumps_out, &clumps))
    }

    /// Flag the border clumps of a written clump raster, updating its
    /// attribute table and writing the border mask.
    pub fn track_borders(&self, clumps_path: &Path, border_out: &Path, tracker: &BorderTracker<'_>) -> Result<usize> {
        let clumps: Raster<u32> = read_band(self.backend.as_ref(), clumps_path)?;
        let (mask, table) = tracker.track(&clumps)?;
        write_band(self.backend.as_ref(), border_out, &mask)?;
        self.backend.write_attribute_table(clumps_path, &table)?;
        Ok(table.border_ids().len())
    }

    pub fn backend(&self) -> &dyn RasterBackend {
        self.backend.as_ref()
    }

    fn write_clumps(&self, path: &Path, clumps: &Raster<u32>) -> Result<()> {
        write_band(self.backend.as_ref(), path, clumps)?;
        self.backend
            .write_attribute_table(path, &AttributeTable::from_clumps(clumps))
    }
}

/// Run `write` only while the budget still allows it, so a cancelled or
/// timed-out task leaves no output behind.
fn within_budget<T>(budget: &TaskBudget, write: impl FnOnce() -> Result<T>) -> Result<T> {
    budget.check()?;
    write()
}
