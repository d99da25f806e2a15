//! Connected-component labelling
//!
//! Groups 4- or 8-connected pixels carrying the same class into clumps.
//! Clump ids are assigned in raster scan order starting at 1; class 0 marks
//! pixels that belong to no clump.

use ndarray::Array2;
use std::collections::{BTreeMap, VecDeque};
use tiledseg_core::io::AttributeTable;
use tiledseg_core::{Connectivity, Raster};

/// Label connected runs of equal, non-zero classes.
///
/// # Returns
/// Clump ids (0 where the class is 0) and the number of clumps.
pub fn clump(classes: &Array2<u32>, connectivity: Connectivity) -> (Array2<u32>, u32) {
    let (rows, cols) = classes.dim();
    let mut clumps = Array2::<u32>::zeros((rows, cols));
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    let mut next_id: u32 = 0;

    for row in 0..rows {
        for col in 0..cols {
            let class = classes[(row, col)];
            if class == 0 || clumps[(row, col)] != 0 {
                continue;
            }

            next_id += 1;
            clumps[(row, col)] = next_id;
            queue.push_back((row, col));

            while let Some((r, c)) = queue.pop_front() {
                for (nr, nc) in connectivity.neighbours(r, c, rows, cols) {
                    if clumps[(nr, nc)] == 0 && classes[(nr, nc)] == class {
                        clumps[(nr, nc)] = next_id;
                        queue.push_back((nr, nc));
                    }
                }
            }
        }
    }

    (clumps, next_id)
}

/// Label the connected components of a binary mask, with an attribute table
/// holding each component's pixel count and extent.
pub fn label_components(mask: &Raster<u8>, connectivity: Connectivity) -> (Raster<u32>, AttributeTable) {
    let classes = mask.data().mapv(|v| u32::from(v != 0));
    let (ids, _) = clump(&classes, connectivity);

    let mut labels: Raster<u32> = mask.with_same_meta();
    *labels.data_mut() = ids;
    labels.set_nodata(Some(0));
    let table = AttributeTable::from_clumps(&labels);
    (labels, table)
}

/// Renumber non-zero ids densely from 1 in order of first appearance in a
/// raster scan. Returns the number of distinct ids.
pub fn relabel_in_scan_order(ids: &mut Array2<u32>) -> u32 {
    let mut mapping: BTreeMap<u32, u32> = BTreeMap::new();
    let mut next: u32 = 0;
    for v in ids.iter_mut() {
        if *v == 0 {
            continue;
        }
        let new = *mapping.entry(*v).or_insert_with(|| {
            next += 1;
            next
        });
        *v = new;
    }
    next
}
