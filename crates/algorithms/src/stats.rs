//! Clustering statistics of a tile and their text file formats
//!
//! `*.centres` holds one k-means centre per line, band values separated by
//! whitespace. `*.stretch` holds one `min max mean stdev` line per band.
//! Values are written with Rust's shortest round-trip formatting so that a
//! file read back reproduces the in-memory statistics exactly.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tiledseg_core::{Error, Result};

/// Linear stretch statistics of one band over the valid pixels of a tile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStretch {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stdev: f64,
}

impl BandStretch {
    /// Statistics of the given values. `None` when there are none.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut n = 0usize;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            n += 1;
            sum += v;
            sum_sq += v * v;
            min = min.min(v);
            max = max.max(v);
        }
        if n == 0 {
            return None;
        }
        let mean = sum / n as f64;
        let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
        Some(Self {
            min,
            max,
            mean,
            stdev: variance.sqrt(),
        })
    }

    /// Input range mapped onto [0, 255]: mean ± 2 sd, clipped to the data range.
    ///
    /// A degenerate range collapses onto a narrow window around the mean, so a
    /// value equal to the mean stretches to 127.5 and any other value saturates.
    pub fn range(&self) -> (f64, f64) {
        let lo = self.min.max(self.mean - 2.0 * self.stdev);
        let hi = self.max.min(self.mean + 2.0 * self.stdev);
        if hi - lo > 1e-9 * self.mean.abs().max(1.0) {
            (lo, hi)
        } else {
            let half = 1e-6 * self.mean.abs().max(1.0);
            (self.mean - half, self.mean + half)
        }
    }

    /// Stretch one value into [0, 255]
    pub fn apply(&self, value: f64) -> f64 {
        let (lo, hi) = self.range();
        ((value - lo) / (hi - lo) * 255.0).clamp(0.0, 255.0)
    }
}

/// The clustering fingerprint of one stage-1 tile.
///
/// Written once by the tile that derived it, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileStats {
    /// k-means centres in stretched band space, one vector per cluster
    pub kcentres: Vec<Vec<f64>>,
    /// Stretch statistics, one entry per segmented band
    pub stretch: Vec<BandStretch>,
    /// Centre of the source tile, in CRS units
    pub centre: (f64, f64),
}

impl TileStats {
    pub fn bands(&self) -> usize {
        self.stretch.len()
    }

    /// Write the `.centres` and `.stretch` files
    pub fn write(&self, centres_path: &Path, stretch_path: &Path) -> Result<()> {
        fs::write(centres_path, format_rows(self.kcentres.iter().map(|c| c.as_slice())))?;
        let rows: Vec<[f64; 4]> = self
            .stretch
            .iter()
            .map(|s| [s.min, s.max, s.mean, s.stdev])
            .collect();
        fs::write(stretch_path, format_rows(rows.iter().map(|r| &r[..])))?;
        Ok(())
    }

    /// Read statistics back; `centre` is not part of the files and is supplied
    /// by whoever registered them.
    pub fn read(centres_path: &Path, stretch_path: &Path, centre: (f64, f64)) -> Result<Self> {
        let kcentres = parse_rows(&fs::read_to_string(centres_path)?, centres_path)?;
        let stretch_rows = parse_rows(&fs::read_to_string(stretch_path)?, stretch_path)?;

        let stretch = stretch_rows
            .into_iter()
            .map(|row| match row.as_slice() {
                &[min, max, mean, stdev] => Ok(BandStretch {
                    min,
                    max,
                    mean,
                    stdev,
                }),
                _ => Err(Error::Other(format!(
                    "{}: expected 4 values per line, found {}",
                    stretch_path.display(),
                    row.len()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let stats = Self {
            kcentres,
            stretch,
            centre,
        };
        stats.check()?;
        Ok(stats)
    }

    /// Every centre has one value per stretched band
    pub fn check(&self) -> Result<()> {
        if self.kcentres.is_empty() {
            return Err(Error::Algorithm("tile statistics carry no centres".into()));
        }
        if let Some(bad) = self.kcentres.iter().find(|c| c.len() != self.bands()) {
            return Err(Error::Algorithm(format!(
                "centre has {} values but the stretch covers {} bands",
                bad.len(),
                self.bands()
            )));
        }
        Ok(())
    }
}

fn format_rows<'a>(rows: impl Iterator<Item = &'a [f64]>) -> String {
    let mut out = String::new();
    for row in rows {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        let _ = writeln!(out, "{}", line.join(" "));
    }
    out
}

fn parse_rows(text: &str, path: &Path) -> Result<Vec<Vec<f64>>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            line.split_whitespace()
                .map(|tok| {
                    tok.parse::<f64>().map_err(|e| {
                        Error::Other(format!(
                            "{} line {}: cannot parse '{}': {}",
                            path.display(),
                            i + 1,
                            tok,
                            e
                        ))
                    })
                })
                .collect()
        })
        .collect()
}
