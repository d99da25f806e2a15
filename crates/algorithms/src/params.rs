//! Parameters of the per-tile segmentation primitive

use serde::{Deserialize, Serialize};
use tiledseg_core::{Connectivity, Error, Result};

/// Parameters passed to every per-tile segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationParams {
    /// Number of k-means clusters fitted on stage-1 tiles (default: 60)
    pub num_clusters: usize,
    /// Clumps smaller than this are eliminated into a neighbour (default: 100)
    pub min_pixels: usize,
    /// Largest spectral distance, in stretched units, across which pixels
    /// or clumps may be joined (default: 100)
    pub distance_threshold: f64,
    /// 1-based band indices to segment on; `None` uses all bands
    pub band_subset: Option<Vec<usize>>,
    /// Use every n-th valid pixel when fitting k-means (default: 100)
    pub sampling: usize,
    /// Maximum k-means iterations (default: 200)
    pub kmeans_max_iter: usize,
    /// Pixel adjacency used for clumping and elimination (default: 4)
    pub connectivity: Connectivity,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            num_clusters: 60,
            min_pixels: 100,
            distance_threshold: 100.0,
            band_subset: None,
            sampling: 100,
            kmeans_max_iter: 200,
            connectivity: Connectivity::Four,
        }
    }
}

impl SegmentationParams {
    pub fn validate(&self) -> Result<()> {
        if self.num_clusters < 1 {
            return Err(invalid("num_clusters", self.num_clusters, "must be at least 1"));
        }
        if self.min_pixels < 1 {
            return Err(invalid("min_pixels", self.min_pixels, "must be at least 1"));
        }
        if !(self.distance_threshold.is_finite() && self.distance_threshold > 0.0) {
            return Err(invalid(
                "distance_threshold",
                self.distance_threshold,
                "must be a positive number",
            ));
        }
        if self.sampling < 1 {
            return Err(invalid("sampling", self.sampling, "must be at least 1"));
        }
        if self.kmeans_max_iter < 1 {
            return Err(invalid("kmeans_max_iter", self.kmeans_max_iter, "must be at least 1"));
        }
        if let Some(bands) = &self.band_subset {
            if bands.is_empty() || bands.contains(&0) {
                return Err(invalid(
                    "band_subset",
                    format!("{:?}", bands),
                    "must list 1-based band indices",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(name: &'static str, value: impl ToString, reason: &str) -> Error {
    Error::InvalidParameter {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = SegmentationParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.num_clusters, 60);
        assert_eq!(params.connectivity, Connectivity::Four);
    }

    #[test]
    fn test_rejects_bad_values() {
        let p = SegmentationParams {
            sampling: 0,
            ..Default::default()
        };
        assert!(p.validate().is_err());

        let p = SegmentationParams {
            band_subset: Some(vec![0, 1]),
            ..Default::default()
        };
        assert!(p.validate().is_err());

        let p = SegmentationParams {
            distance_threshold: f64::NAN,
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }
}
