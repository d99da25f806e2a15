//! Pipeline errors and per-tile failure records

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The three passes of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Stage {
    /// Regular grid over the whole input
    One,
    /// Half-tile offset grid over the stage-1 border pixels
    Two,
    /// Connected components of the stage-2 border pixels
    Three,
}

impl Stage {
    pub fn number(self) -> u8 {
        match self {
            Stage::One => 1,
            Stage::Two => 2,
            Stage::Three => 3,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> u8 {
        stage.number()
    }
}

impl TryFrom<u8> for Stage {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Stage::One),
            2 => Ok(Stage::Two),
            3 => Ok(Stage::Three),
            other => Err(format!("no stage {}", other)),
        }
    }
}

/// One tile (or stage-3 component) that did not segment.
///
/// Failures are values: the run records them and carries on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileFailure {
    pub stage: Stage,
    pub tile_id: u32,
    pub cause: String,
}

impl fmt::Display for TileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} tile {}: {}", self.stage, self.tile_id, self.cause)
    }
}

/// Fatal errors of a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input has too little valid data to tile: {valid_fraction:.4} of pixels valid, threshold {threshold}")]
    EmptyGrid { valid_fraction: f64, threshold: f64 },

    #[error("all {failed} stage-1 tiles failed to segment")]
    NoValidTiles { failed: usize },

    #[error("clump rasters overlap at ({row}, {col})")]
    OverlappingClumps { row: usize, col: usize },

    #[error("run cancelled")]
    Cancelled,

    #[error("raster I/O failed: {0}")]
    RasterIo(#[source] tiledseg_core::Error),

    #[error("segmentation failed: {0}")]
    Algorithm(#[source] tiledseg_core::Error),

    #[error("clump ids overflow u32 while rebasing by {offset}")]
    ClumpIdOverflow { offset: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<tiledseg_core::Error> for PipelineError {
    fn from(err: tiledseg_core::Error) -> Self {
        use tiledseg_core::Error as E;
        match err {
            E::OverlappingClumps { row, col } => PipelineError::OverlappingClumps { row, col },
            E::ClumpIdOverflow { offset } => PipelineError::ClumpIdOverflow { offset },
            E::Interrupted(_) => PipelineError::Cancelled,
            E::InvalidParameter { .. } => PipelineError::InvalidConfig(err.to_string()),
            E::Algorithm(_) | E::Other(_) => PipelineError::Algorithm(err),
            E::Io(_)
            | E::Tiff(_)
            | E::AttributeTable(_)
            | E::InvalidDimensions { .. }
            | E::IndexOutOfBounds { .. }
            | E::SizeMismatch { .. }
            | E::WindowOutOfBounds { .. }
            | E::UnsupportedDataType(_) => PipelineError::RasterIo(err),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::RasterIo(err.into())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::RasterIo(err.into())
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
