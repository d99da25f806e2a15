//! I/O operations for reading and writing rasters and their attribute tables

mod attribute_table;
mod backend;
mod native;

pub use attribute_table::{sidecar_path, AttributeTable, ClumpAttributes};
pub use backend::{read_band, write_band, GeoTiffBackend, RasterBackend, RasterInfo};
pub use native::{
    image_to_raster, raster_to_image, read_geotiff, read_geotiff_from_buffer, read_geotiff_header,
    read_geotiff_window, read_raster, write_geotiff, write_geotiff_to_buffer, write_raster,
    GeoTiffHeader,
};
