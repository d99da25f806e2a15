//! # tiledseg algorithms
//!
//! Raster algorithms used by the tiled segmentation pipeline.
//!
//! ## Modules
//!
//! - **segmentation**: the per-tile primitive (`TileSegmenter`,
//!   `ShepherdSegmenter`), clumping, small-clump elimination, clump means
//! - **classification**: k-means on sampled pixels
//! - **stats**: `TileStats` and its `.centres` / `.stretch` files
//! - **border**: `BorderTracker`
//! - **merge**: `ClumpMerger` and mask compositing

pub mod border;
pub mod classification;
pub mod interrupt;
pub(crate) mod maybe_rayon;
pub mod merge;
pub mod params;
pub mod segmentation;
pub mod stats;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::border::BorderTracker;
    pub use crate::interrupt::{Interrupt, Uninterrupted};
    pub use crate::merge::{
        clear_where, max_id, merge_borders, merge_clumps, or_into, relabel_sequential,
        ClumpMerger,
    };
    pub use crate::params::SegmentationParams;
    pub use crate::segmentation::{
        clump_mean_image, label_components, ClumpMeans, Segmentation, ShepherdSegmenter,
        TileSegmenter,
    };
    pub use crate::stats::{BandStretch, TileStats};
    pub use tiledseg_core::prelude::*;
}
