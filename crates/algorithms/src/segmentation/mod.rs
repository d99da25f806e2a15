//! Per-tile segmentation
//!
//! The [`TileSegmenter`] trait is the capability the tiled pipeline drives;
//! [`ShepherdSegmenter`] is the built-in implementation.

mod clump;
mod eliminate;
mod mean_image;
mod shepherd;

pub use clump::{clump, label_components, relabel_in_scan_order};
pub use eliminate::eliminate_small_clumps;
pub use mean_image::{clump_mean_image, ClumpMeans};
pub use shepherd::ShepherdSegmenter;

use crate::interrupt::Interrupt;
use crate::params::SegmentationParams;
use crate::stats::TileStats;
use tiledseg_core::{MultiBandRaster, Raster, Result};

/// Output of a segmentation that fitted its own statistics
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Clump ids densely numbered from 1; 0 is no-data
    pub clumps: Raster<u32>,
    pub stats: TileStats,
}

/// A single-tile segmentation primitive.
///
/// Both operations must leave every valid pixel of `image` with a positive
/// clump id and every invalid pixel at 0. An `Err` rejects the tile.
pub trait TileSegmenter: Send + Sync {
    /// Segment a tile, deriving k-means centres and stretch statistics from it
    fn segment_derive(
        &self,
        image: &MultiBandRaster,
        params: &SegmentationParams,
        interrupt: &dyn Interrupt,
    ) -> Result<Segmentation>;

    /// Segment a tile with statistics derived elsewhere
    fn segment_reuse(
        &self,
        image: &MultiBandRaster,
        stats: &TileStats,
        params: &SegmentationParams,
        interrupt: &dyn Interrupt,
    ) -> Result<Raster<u32>>;
}
