//! # tiledseg core
//!
//! Core types and I/O for the tiled segmentation engine.
//!
//! This crate provides:
//! - `Raster<T>`: single-band grids (clumps, masks, tile labels)
//! - `MultiBandRaster`: imagery with a per-pixel validity rule
//! - `GeoTransform`, `Window`, `CRS`: georeferencing and pixel windows
//! - `RasterBackend`: the raster access capability, with a native GeoTIFF
//!   implementation and JSON attribute tables

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;

pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{
    Connectivity, DataType, GeoTransform, MultiBandRaster, Raster, RasterElement, Window,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::io::{AttributeTable, GeoTiffBackend, RasterBackend};
    pub use crate::raster::{
        Connectivity, DataType, GeoTransform, MultiBandRaster, Raster, RasterElement, Window,
    };
}
