//! Raster element trait for generic cell values

use super::DataType;
use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// Trait for types that can be stored in a single-band raster cell.
///
/// Clump rasters use `u32`, masks and border rasters `u8`; multi-band
/// imagery goes through [`MultiBandRaster`](super::MultiBandRaster) instead.
pub trait RasterElement:
    Copy + Clone + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// On-disk pixel type matching this element
    fn data_type() -> DataType;

    /// Check if this value represents no-data
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    /// Convert self to f64
    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }
}

macro_rules! impl_raster_element_int {
    ($t:ty, $dt:expr) => {
        impl RasterElement for $t {
            fn data_type() -> DataType {
                $dt
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                match nodata {
                    Some(nd) => *self == nd,
                    None => false,
                }
            }
        }
    };
}

macro_rules! impl_raster_element_float {
    ($t:ty, $dt:expr) => {
        impl RasterElement for $t {
            fn data_type() -> DataType {
                $dt
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                if self.is_nan() {
                    return true;
                }
                match nodata {
                    Some(nd) => (self - nd).abs() < <$t>::EPSILON * 100.0,
                    None => false,
                }
            }
        }
    };
}

impl_raster_element_int!(u8, DataType::U8);
impl_raster_element_int!(u16, DataType::U16);
impl_raster_element_int!(u32, DataType::U32);
impl_raster_element_int!(i16, DataType::I16);
impl_raster_element_int!(i32, DataType::I32);
impl_raster_element_float!(f32, DataType::F32);
impl_raster_element_float!(f64, DataType::F64);
