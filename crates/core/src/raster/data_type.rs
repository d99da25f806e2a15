//! Pixel data types carried through the pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel type of a raster on disk.
///
/// Imagery is processed as `f64` in memory; the data type records what the
/// pixels were so tiles are written back with the input's dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    U8,
    U16,
    U32,
    I16,
    I32,
    F32,
    F64,
}

impl DataType {
    /// Default no-data value: the minimum for integers, NaN for floats
    pub fn default_nodata(self) -> f64 {
        match self {
            DataType::U8 | DataType::U16 | DataType::U32 => 0.0,
            DataType::I16 => i16::MIN as f64,
            DataType::I32 => i32::MIN as f64,
            DataType::F32 | DataType::F64 => f64::NAN,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// Largest value representable by the type, as f64
    pub fn max_value(self) -> f64 {
        match self {
            DataType::U8 => u8::MAX as f64,
            DataType::U16 => u16::MAX as f64,
            DataType::U32 => u32::MAX as f64,
            DataType::I16 => i16::MAX as f64,
            DataType::I32 => i32::MAX as f64,
            DataType::F32 => f32::MAX as f64,
            DataType::F64 => f64::MAX,
        }
    }

    /// Bytes per pixel per band
    pub fn size_bytes(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::U8 => "uint8",
            DataType::U16 => "uint16",
            DataType::U32 => "uint32",
            DataType::I16 => "int16",
            DataType::I32 => "int32",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        };
        f.write_str(name)
    }
}
