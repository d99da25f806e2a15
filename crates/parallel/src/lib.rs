//! # tiledseg parallel
//!
//! Tiled, three-stage segmentation of rasters too large to segment in one
//! piece.
//!
//! This crate provides:
//! - Tile grids with under-full cell grouping ([`TileGrid`])
//! - A bounded worker pool with cancellation and per-task timeouts
//! - A statistics registry for reusing stage-1 cluster centres
//! - The [`Orchestrator`] that drives tiling, segmentation and merging

pub mod config;
pub mod cutter;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod segmenter;
pub mod source;
pub mod subset;
pub mod tiled;
pub mod workdir;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result, Stage, TileFailure};
pub use pipeline::{run, Orchestrator, PipelineState, RunSummary, StageCounts};
pub use pool::{CancellationToken, TaskBudget, WorkerPool};
pub use registry::{StatsEntry, StatsRegistry, StatsRegistryBuilder};
pub use source::InputRaster;
pub use tiled::{EmptyCell, GridSpec, Tile, TileGrid};
pub use workdir::WorkingDirectory;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::error::{PipelineError, Stage};
    pub use crate::pipeline::{Orchestrator, RunSummary};
    pub use crate::pool::CancellationToken;
    pub use tiledseg_algorithms::params::SegmentationParams;
    pub use tiledseg_core::io::GeoTiffBackend;
    pub use tiledseg_core::Connectivity;
}
