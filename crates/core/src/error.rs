//! Error types for tiledseg

use thiserror::Error;

/// Main error type for raster and segmentation operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("attribute table error: {0}")]
    AttributeTable(#[from] serde_json::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Window {window} lies outside a raster of size ({rows}, {cols})")]
    WindowOutOfBounds {
        window: String,
        rows: usize,
        cols: usize,
    },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("interrupted: {0}")]
    Interrupted(String),

    #[error("clump rasters overlap at ({row}, {col})")]
    OverlappingClumps { row: usize, col: usize },

    #[error("clump id overflow while rebasing by {offset}")]
    ClumpIdOverflow { offset: u32 },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for tiledseg operations
pub type Result<T> = std::result::Result<T, Error>;
