//! Shepherd et al. (2014) segmentation of one tile
//!
//! 1. Stretch each band to [0, 255] (mean ± 2 sd over valid pixels)
//! 2. Fit k-means on sampled pixels, or reuse centres from another tile
//! 3. Assign every valid pixel to its nearest centre
//! 4. Clump connected pixels of the same cluster
//! 5. Eliminate clumps below the minimum size into their nearest neighbour
//! 6. Relabel densely from 1

use super::clump::{clump, relabel_in_scan_order};
use super::eliminate::eliminate_small_clumps;
use super::{Segmentation, TileSegmenter};
use crate::classification::{kmeans, nearest_centre, KmeansParams};
use crate::interrupt::Interrupt;
use crate::params::SegmentationParams;
use crate::stats::{BandStretch, TileStats};
use ndarray::Array2;
use tiledseg_core::{Error, MultiBandRaster, Raster, Result, Window};
use tracing::debug;

/// The built-in per-tile segmentation primitive
#[derive(Debug, Clone, Copy, Default)]
pub struct ShepherdSegmenter;

/// Stretched pixel values of one tile
struct Prepared {
    rows: usize,
    cols: usize,
    /// (rows * cols) x bands, stretched; rows of invalid pixels are unused
    features: Array2<f64>,
    valid: Vec<bool>,
}

impl Prepared {
    fn valid_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.valid
            .iter()
            .enumerate()
            .filter(|(_, &v)| v)
            .map(|(i, _)| i)
    }
}

impl ShepherdSegmenter {
    pub fn new() -> Self {
        Self
    }

    /// Valid mask on all bands, then the band subset
    fn select(image: &MultiBandRaster, params: &SegmentationParams) -> Result<(MultiBandRaster, Vec<bool>)> {
        let (rows, cols) = image.shape();
        let valid: Vec<bool> = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .map(|(r, c)| image.is_valid(r, c))
            .collect();
        let selected = match &params.band_subset {
            Some(bands) => image.select_bands(bands)?,
            None => image.clone(),
        };
        Ok((selected, valid))
    }

    fn stretch_stats(image: &MultiBandRaster, valid: &[bool]) -> Result<Vec<BandStretch>> {
        (0..image.bands())
            .map(|b| {
                let band = image.band(b);
                let values = band
                    .iter()
                    .zip(valid.iter())
                    .filter(|(_, &ok)| ok)
                    .map(|(&v, _)| v);
                BandStretch::from_values(values)
                    .ok_or_else(|| Error::Algorithm("tile has no valid pixels".into()))
            })
            .collect()
    }

    fn prepare(image: &MultiBandRaster, valid: Vec<bool>, stretch: &[BandStretch]) -> Prepared {
        let (rows, cols) = image.shape();
        let mut features = Array2::<f64>::zeros((rows * cols, stretch.len()));
        for (b, s) in stretch.iter().enumerate() {
            let band = image.band(b);
            for (i, &v) in band.iter().enumerate() {
                if valid[i] {
                    features[(i, b)] = s.apply(v);
                }
            }
        }
        Prepared {
            rows,
            cols,
            features,
            valid,
        }
    }

    /// Every `sampling`-th valid pixel, in scan order
    fn samples(prepared: &Prepared, sampling: usize) -> Array2<f64> {
        let picked: Vec<usize> = prepared.valid_indices().step_by(sampling.max(1)).collect();
        let bands = prepared.features.ncols();
        let mut samples = Array2::zeros((picked.len(), bands));
        for (s, &i) in picked.iter().enumerate() {
            samples.row_mut(s).assign(&prepared.features.row(i));
        }
        samples
    }

    /// Assign, clump, eliminate and relabel
    fn segment_with(
        &self,
        image: &MultiBandRaster,
        prepared: &Prepared,
        kcentres: &[Vec<f64>],
        params: &SegmentationParams,
        interrupt: &dyn Interrupt,
    ) -> Result<Raster<u32>> {
        interrupt.check()?;

        // Pixels further than the threshold from every centre open a new one,
        // so reused statistics cannot fuse spectrally distinct regions
        let mut centres = kcentres.to_vec();
        let threshold_sq = params.distance_threshold * params.distance_threshold;
        let mut classes = Array2::<u32>::zeros((prepared.rows, prepared.cols));
        for i in prepared.valid_indices() {
            let pixel = prepared.features.row(i);
            let (mut k, d) = nearest_centre(pixel, &centres);
            if d > threshold_sq {
                centres.push(pixel.to_vec());
                k = centres.len() - 1;
            }
            classes[(i / prepared.cols, i % prepared.cols)] = k as u32 + 1;
        }
        if centres.len() > kcentres.len() {
            debug!(
                "opened {} extra centres beyond the {} supplied",
                centres.len() - kcentres.len(),
                kcentres.len()
            );
        }

        let (mut ids, initial) = clump(&classes, params.connectivity);
        let eliminated = eliminate_small_clumps(
            &mut ids,
            &prepared.features,
            params.min_pixels,
            params.distance_threshold,
            params.connectivity,
            interrupt,
        )?;
        let count = relabel_in_scan_order(&mut ids);
        debug!(
            "{} clumps ({} initial, {} eliminated)",
            count, initial, eliminated
        );

        let mut clumps: Raster<u32> = Raster::from_array(ids);
        clumps.set_transform(*image.transform());
        clumps.set_crs(image.crs().cloned());
        clumps.set_nodata(Some(0));
        Ok(clumps)
    }
}

impl TileSegmenter for ShepherdSegmenter {
    fn segment_derive(
        &self,
        image: &MultiBandRaster,
        params: &SegmentationParams,
        interrupt: &dyn Interrupt,
    ) -> Result<Segmentation> {
        params.validate()?;
        let (selected, valid) = Self::select(image, params)?;
        let stretch = Self::stretch_stats(&selected, &valid)?;
        let prepared = Self::prepare(&selected, valid, &stretch);

        let samples = Self::samples(&prepared, params.sampling);
        if samples.nrows() < params.num_clusters {
            return Err(Error::Algorithm(format!(
                "{} sampled pixels cannot fit {} clusters",
                samples.nrows(),
                params.num_clusters
            )));
        }
        let kparams = KmeansParams {
            k: params.num_clusters,
            max_iterations: params.kmeans_max_iter,
            ..Default::default()
        };
        let kcentres = kmeans(&samples, &kparams, interrupt)?;

        let clumps = self.segment_with(&selected, &prepared, &kcentres, params, interrupt)?;
        let (rows, cols) = image.shape();
        let stats = TileStats {
            kcentres,
            stretch,
            centre: image.transform().window_centre(&Window::full(rows, cols)),
        };
        Ok(Segmentation { clumps, stats })
    }

    fn segment_reuse(
        &self,
        image: &MultiBandRaster,
        stats: &TileStats,
        params: &SegmentationParams,
        interrupt: &dyn Interrupt,
    ) -> Result<Raster<u32>> {
        params.validate()?;
        stats.check()?;
        let (selected, valid) = Self::select(image, params)?;
        if selected.bands() != stats.bands() {
            return Err(Error::Algorithm(format!(
                "statistics cover {} bands but the tile has {}",
                stats.bands(),
                selected.bands()
            )));
        }
        if !valid.iter().any(|&v| v) {
            return Err(Error::Algorithm("tile has no valid pixels".into()));
        }
        let prepared = Self::prepare(&selected, valid, &stats.stretch);
        self.segment_with(&selected, &prepared, &stats.kcentres, params, interrupt)
    }
}
