//! K-means clustering of multi-band samples
//!
//! Partitions sampled pixels into k clusters by iteratively assigning each
//! sample to its nearest centre and moving centres to their members' mean.

use crate::interrupt::Interrupt;
use crate::maybe_rayon::*;
use ndarray::{Array2, ArrayView1};
use tiledseg_core::{Error, Result};

/// Parameters for K-means clustering
#[derive(Debug, Clone)]
pub struct KmeansParams {
    /// Number of clusters
    pub k: usize,
    /// Maximum iterations (default: 200)
    pub max_iterations: usize,
    /// Stop when no centre moves further than this (default: 0.001)
    pub convergence: f64,
}

impl Default for KmeansParams {
    fn default() -> Self {
        Self {
            k: 60,
            max_iterations: 200,
            convergence: 0.001,
        }
    }
}

/// K-means on a (samples x bands) matrix.
///
/// # Returns
/// `k` centres, each with one value per band, in a deterministic order.
///
/// # Errors
/// Fails when there are fewer samples than clusters, or when `interrupt`
/// fires between iterations.
pub fn kmeans(
    samples: &Array2<f64>,
    params: &KmeansParams,
    interrupt: &dyn Interrupt,
) -> Result<Vec<Vec<f64>>> {
    let (n, bands) = samples.dim();
    if params.k < 1 {
        return Err(Error::Algorithm("K-means requires k >= 1".into()));
    }
    if n < params.k {
        return Err(Error::Algorithm(format!(
            "Not enough valid pixels ({}) for {} clusters",
            n, params.k
        )));
    }

    let mut centroids = initialize_centroids(samples, params.k);

    for _iter in 0..params.max_iterations {
        interrupt.check()?;

        // Assignment step: each sample to its nearest centroid
        let labels: Vec<usize> = (0..n)
            .into_par_iter()
            .map(|i| nearest_centre(samples.row(i), &centroids).0)
            .collect();

        // Update step: recompute centroids
        let mut sums = vec![vec![0.0; bands]; params.k];
        let mut counts = vec![0usize; params.k];
        for (i, &k) in labels.iter().enumerate() {
            for (acc, v) in sums[k].iter_mut().zip(samples.row(i).iter()) {
                *acc += v;
            }
            counts[k] += 1;
        }

        let mut max_shift = 0.0_f64;
        for k in 0..params.k {
            if counts[k] == 0 {
                continue; // Keep empty cluster centroid
            }
            let mean: Vec<f64> = sums[k].iter().map(|s| s / counts[k] as f64).collect();
            max_shift = max_shift.max(squared_distance(mean.iter().copied(), &centroids[k]).sqrt());
            centroids[k] = mean;
        }

        if max_shift < params.convergence {
            break;
        }
    }

    Ok(centroids)
}

/// Index of and squared distance to the closest centre. Ties go to the lower index.
pub fn nearest_centre(pixel: ArrayView1<'_, f64>, centres: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (k, centre) in centres.iter().enumerate() {
        let d = squared_distance(pixel.iter().copied(), centre);
        if d < best.1 {
            best = (k, d);
        }
    }
    best
}

pub fn squared_distance(a: impl Iterator<Item = f64>, b: &[f64]) -> f64 {
    a.zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Deterministic initialisation: order samples by their band sum and take
/// evenly spaced quantiles.
fn initialize_centroids(samples: &Array2<f64>, k: usize) -> Vec<Vec<f64>> {
    let n = samples.nrows();
    let mut order: Vec<(f64, usize)> = samples
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| (row.sum(), i))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    (0..k)
        .map(|i| {
            let idx = (i * n / k) + n / (2 * k);
            samples.row(order[idx.min(n - 1)].1).to_vec()
        })
        .collect()
}
