//! Raster data structures and operations

mod data_type;
mod element;
mod geotransform;
mod grid;
mod multiband;
mod neighborhood;
mod window;

pub use data_type::DataType;
pub use element::RasterElement;
pub use geotransform::GeoTransform;
pub use grid::Raster;
pub use multiband::MultiBandRaster;
pub use neighborhood::{Connectivity, Neighbours};
pub use window::Window;
