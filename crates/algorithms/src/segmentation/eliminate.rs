//! Small-clump elimination
//!
//! Clumps below the minimum size are absorbed into the adjacent clump whose
//! mean is spectrally closest, provided that distance is within the
//! threshold. Passes repeat until no clump changes.

use crate::classification::squared_distance;
use crate::interrupt::Interrupt;
use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet};
use tiledseg_core::{Connectivity, Result};

/// Running state of one clump during elimination
#[derive(Debug, Clone)]
struct ClumpState {
    count: usize,
    sum: Vec<f64>,
    neighbours: BTreeSet<u32>,
}

impl ClumpState {
    fn mean(&self) -> Vec<f64> {
        self.sum.iter().map(|s| s / self.count as f64).collect()
    }
}

/// Merge clumps smaller than `min_pixels` into their nearest neighbour.
///
/// `features` holds one row of (stretched) band values per pixel, indexed
/// `row * cols + col`. Ties between equally distant neighbours go to the
/// lower clump id. Clumps with no neighbour within `distance_threshold` stay.
///
/// # Returns
/// The number of clumps eliminated.
pub fn eliminate_small_clumps(
    clumps: &mut Array2<u32>,
    features: &Array2<f64>,
    min_pixels: usize,
    distance_threshold: f64,
    connectivity: Connectivity,
    interrupt: &dyn Interrupt,
) -> Result<usize> {
    let mut states = collect_states(clumps, features, connectivity);
    let threshold_sq = distance_threshold * distance_threshold;
    // Absorbed id -> absorbing id
    let mut absorbed: BTreeMap<u32, u32> = BTreeMap::new();

    loop {
        interrupt.check()?;

        let mut small: Vec<(usize, u32)> = states
            .iter()
            .filter(|(_, s)| s.count < min_pixels)
            .map(|(&id, s)| (s.count, id))
            .collect();
        small.sort_unstable();

        let mut changed = false;
        for (_, id) in small {
            let Some(state) = states.get(&id) else {
                continue;
            };
            if state.count >= min_pixels {
                continue;
            }
            let mean = state.mean();

            let mut best: Option<(f64, u32)> = None;
            for &n in &state.neighbours {
                let Some(other) = states.get(&n) else {
                    continue;
                };
                let d = squared_distance(other.mean().into_iter(), &mean);
                // Neighbours are visited in id order, so a strict < keeps the lower id
                if d <= threshold_sq && best.map_or(true, |(bd, _)| d < bd) {
                    best = Some((d, n));
                }
            }

            if let Some((_, target)) = best {
                absorb(&mut states, id, target);
                absorbed.insert(id, target);
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    if !absorbed.is_empty() {
        for v in clumps.iter_mut() {
            if *v != 0 {
                *v = resolve(&absorbed, *v);
            }
        }
    }
    Ok(absorbed.len())
}

fn collect_states(
    clumps: &Array2<u32>,
    features: &Array2<f64>,
    connectivity: Connectivity,
) -> BTreeMap<u32, ClumpState> {
    let (rows, cols) = clumps.dim();
    let bands = features.ncols();
    let mut states: BTreeMap<u32, ClumpState> = BTreeMap::new();

    for row in 0..rows {
        for col in 0..cols {
            let id = clumps[(row, col)];
            if id == 0 {
                continue;
            }
            let state = states.entry(id).or_insert_with(|| ClumpState {
                count: 0,
                sum: vec![0.0; bands],
                neighbours: BTreeSet::new(),
            });
            state.count += 1;
            for (acc, v) in state.sum.iter_mut().zip(features.row(row * cols + col).iter()) {
                *acc += v;
            }
            for (nr, nc) in connectivity.neighbours(row, col, rows, cols) {
                let n = clumps[(nr, nc)];
                if n != 0 && n != id {
                    state.neighbours.insert(n);
                }
            }
        }
    }
    states
}

/// Fold clump `from` into `into`, rewiring adjacency
fn absorb(states: &mut BTreeMap<u32, ClumpState>, from: u32, into: u32) {
    let Some(gone) = states.remove(&from) else {
        return;
    };
    for &n in &gone.neighbours {
        if let Some(s) = states.get_mut(&n) {
            s.neighbours.remove(&from);
            if n != into {
                s.neighbours.insert(into);
            }
        }
    }
    if let Some(target) = states.get_mut(&into) {
        target.count += gone.count;
        for (acc, v) in target.sum.iter_mut().zip(gone.sum.iter()) {
            *acc += v;
        }
        target
            .neighbours
            .extend(gone.neighbours.iter().copied().filter(|&n| n != into));
    }
}

fn resolve(absorbed: &BTreeMap<u32, u32>, mut id: u32) -> u32 {
    while let Some(&next) = absorbed.get(&id) {
        id = next;
    }
    id
}
