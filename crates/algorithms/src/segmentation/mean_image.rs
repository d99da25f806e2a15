//! Clump mean image: every pixel carries its clump's mean band values

use std::collections::BTreeMap;
use tiledseg_core::{DataType, Error, MultiBandRaster, Raster, Result};

/// Per-clump band sums, fed one block of the image at a time
#[derive(Debug, Clone)]
pub struct ClumpMeans {
    bands: usize,
    sums: BTreeMap<u32, (usize, Vec<f64>)>,
}

impl ClumpMeans {
    pub fn new(bands: usize) -> Self {
        Self {
            bands,
            sums: BTreeMap::new(),
        }
    }

    /// Accumulate the valid pixels of `block`, labelled by the matching
    /// block of the clump raster
    pub fn add(&mut self, block: &MultiBandRaster, clumps: &Raster<u32>) -> Result<()> {
        if block.shape() != clumps.shape() {
            return Err(Error::SizeMismatch {
                er: block.rows(),
                ec: block.cols(),
                ar: clumps.rows(),
                ac: clumps.cols(),
            });
        }
        if block.bands() != self.bands {
            return Err(Error::Algorithm(format!(
                "expected {} bands, block has {}",
                self.bands,
                block.bands()
            )));
        }
        for ((r, c), &id) in clumps.data().indexed_iter() {
            if id == 0 || !block.is_valid(r, c) {
                continue;
            }
            let entry = self.sums.entry(id).or_insert_with(|| (0, vec![0.0; self.bands]));
            entry.0 += 1;
            for (acc, v) in entry.1.iter_mut().zip(block.pixel(r, c).iter()) {
                *acc += v;
            }
        }
        Ok(())
    }

    /// Number of clumps seen with at least one valid pixel
    pub fn len(&self) -> usize {
        self.sums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    /// Paint the means over `clumps`. The result is `float32` on the clump
    /// raster's grid; pixels outside any clump, and clumps without a valid
    /// pixel, are NaN (the declared no-data value).
    pub fn paint(self, clumps: &Raster<u32>) -> MultiBandRaster {
        let means: BTreeMap<u32, Vec<f64>> = self
            .sums
            .into_iter()
            .map(|(id, (n, sum))| (id, sum.into_iter().map(|s| s / n as f64).collect()))
            .collect();

        let mut out = MultiBandRaster::new(self.bands, clumps.rows(), clumps.cols(), DataType::F32);
        out.data_mut().fill(f64::NAN);
        for ((r, c), id) in clumps.data().indexed_iter() {
            if let Some(mean) = means.get(id) {
                for (b, &m) in mean.iter().enumerate() {
                    out.data_mut()[[b, r, c]] = m;
                }
            }
        }
        out.set_transform(*clumps.transform());
        out.set_crs(clumps.crs().cloned());
        out.set_nodata(Some(f64::NAN));
        out
    }
}

/// Replace each pixel by the mean of the valid pixels of its clump, per band.
pub fn clump_mean_image(image: &MultiBandRaster, clumps: &Raster<u32>) -> Result<MultiBandRaster> {
    let mut means = ClumpMeans::new(image.bands());
    means.add(image, clumps)?;
    let mut out = means.paint(clumps);
    out.set_transform(*image.transform());
    out.set_crs(image.crs().cloned());
    Ok(out)
}
