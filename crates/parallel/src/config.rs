//! Run configuration

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tiledseg_algorithms::params::SegmentationParams;

/// Everything a run needs besides its input and output paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Target tile width in pixels (default: 2000)
    pub tile_width: usize,
    /// Target tile height in pixels (default: 2000)
    pub tile_height: usize,
    /// Tiles whose valid pixel count falls below this fraction of their
    /// area are dissolved into a neighbour (default: 0.3)
    pub valid_threshold: f64,
    pub segmentation: SegmentationParams,
    /// Size of the worker pool (default: 1)
    pub workers: usize,
    /// Caller-owned working directory root; a private temporary directory
    /// is used when `None`
    pub tmp_dir: Option<PathBuf>,
    /// Per-tile time limit; a tile exceeding it counts as failed
    pub tile_timeout: Option<Duration>,
    /// Also write the per-clump mean of every band here
    pub mean_image: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_width: 2000,
            tile_height: 2000,
            valid_threshold: 0.3,
            segmentation: SegmentationParams::default(),
            workers: 1,
            tmp_dir: None,
            tile_timeout: None,
            mean_image: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "tile size must be positive, got {}x{}",
                self.tile_width, self.tile_height
            )));
        }
        if !(self.valid_threshold > 0.0 && self.valid_threshold <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "valid_threshold must be in (0, 1], got {}",
                self.valid_threshold
            )));
        }
        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.tile_timeout == Some(Duration::ZERO) {
            return Err(PipelineError::InvalidConfig("tile_timeout must be positive".into()));
        }
        self.segmentation
            .validate()
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!((config.tile_width, config.tile_height), (2000, 2000));
        assert_eq!(config.workers, 1);
        assert!(config.tmp_dir.is_none());
    }

    #[test]
    fn test_rejects_bad_threshold_and_workers() {
        for threshold in [0.0, -0.5, 1.5, f64::NAN] {
            let config = PipelineConfig {
                valid_threshold: threshold,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
        }

        let config = PipelineConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_segmentation_params_are_checked() {
        let mut config = PipelineConfig::default();
        config.segmentation.num_clusters = 0;
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }
}
