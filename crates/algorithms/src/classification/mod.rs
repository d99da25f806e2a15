//! Spectral clustering used by the segmentation primitive
//!
//! - **K-means**: multi-band clustering of sampled pixels, with
//!   deterministic initialisation so that reruns are reproducible

mod kmeans;

pub use kmeans::{kmeans, nearest_centre, squared_distance, KmeansParams};
