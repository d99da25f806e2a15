//! Border clump detection
//!
//! A clump is a border clump when one of its pixels has a 4-neighbour that
//! lies outside the tile or carries no clump, and that neighbour is part of
//! the domain still being segmented. Without a domain every such neighbour
//! counts.

use std::collections::BTreeSet;
use tiledseg_core::io::AttributeTable;
use tiledseg_core::{Connectivity, Raster, Result, Window};

/// Identifies clumps touching a tile's footprint edge.
///
/// The optional domain is a full-extent binary raster (1 = pixel belongs to
/// the area being segmented) on the same pixel grid as the clump rasters.
#[derive(Debug, Clone, Copy, Default)]
pub struct BorderTracker<'a> {
    domain: Option<&'a Raster<u8>>,
}

impl<'a> BorderTracker<'a> {
    /// Every edge and every no-data neighbour makes a border
    pub fn new() -> Self {
        Self { domain: None }
    }

    /// Only neighbours inside `domain` make a border
    pub fn within(domain: &'a Raster<u8>) -> Self {
        Self {
            domain: Some(domain),
        }
    }

    /// Ids of the border clumps of `clumps`
    pub fn border_clumps(&self, clumps: &Raster<u32>) -> Result<BTreeSet<u32>> {
        let placement = match self.domain {
            Some(domain) => Some(domain.placement_of(clumps)?),
            None => None,
        };
        let (rows, cols) = clumps.shape();
        let data = clumps.data();
        let mut border = BTreeSet::new();

        for ((r, c), &id) in data.indexed_iter() {
            if id == 0 || border.contains(&id) {
                continue;
            }
            let touches = Connectivity::Four.offsets().iter().any(|&(dr, dc)| {
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                let inside = nr >= 0 && nc >= 0 && (nr as usize) < rows && (nc as usize) < cols;
                if inside && data[(nr as usize, nc as usize)] != 0 {
                    return false;
                }
                match (self.domain, placement) {
                    (Some(domain), Some(at)) => in_domain(domain, &at, nr, nc),
                    _ => true,
                }
            });
            if touches {
                border.insert(id);
            }
        }
        Ok(border)
    }

    /// Binary raster: 1 where the pixel belongs to a border clump
    pub fn border_mask(&self, clumps: &Raster<u32>) -> Result<Raster<u8>> {
        let border = self.border_clumps(clumps)?;
        Ok(mask_of(clumps, &border))
    }

    /// Border mask plus an attribute table with the border flags set
    pub fn track(&self, clumps: &Raster<u32>) -> Result<(Raster<u8>, AttributeTable)> {
        let border = self.border_clumps(clumps)?;
        let mut table = AttributeTable::from_clumps(clumps);
        table.mark_border(border.iter().copied());
        Ok((mask_of(clumps, &border), table))
    }
}

fn mask_of(clumps: &Raster<u32>, border: &BTreeSet<u32>) -> Raster<u8> {
    let mut mask: Raster<u8> = clumps.with_same_meta();
    for (m, id) in mask.data_mut().iter_mut().zip(clumps.data().iter()) {
        if border.contains(id) {
            *m = 1;
        }
    }
    mask
}

/// Whether tile-local (row, col) maps to a domain pixel set to 1
fn in_domain(domain: &Raster<u8>, at: &Window, row: isize, col: isize) -> bool {
    let gr = at.row_off as isize + row;
    let gc = at.col_off as isize + col;
    if gr < 0 || gc < 0 || gr as usize >= domain.rows() || gc as usize >= domain.cols() {
        return false;
    }
    domain.data()[(gr as usize, gc as usize)] == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiledseg_core::GeoTransform;

    #[test]
    fn test_without_domain_edges_and_nodata_count() {
        // Clump 2 sits in the interior surrounded by clump 1
        let clumps = Raster::from_vec(vec![1, 1, 1, 1, 2, 1, 1, 1, 1], 3, 3).unwrap();
        let mask = BorderTracker::new().border_mask(&clumps).unwrap();
        assert_eq!(mask.get(0, 0).unwrap(), 1);
        assert_eq!(mask.get(1, 1).unwrap(), 0);
    }

    #[test]
    fn test_domain_limits_borders_to_seams() {
        // 4x4 domain; the left tile covers columns 0..2
        let gt = GeoTransform::new(0.0, 4.0, 1.0, -1.0);
        let mut domain: Raster<u8> = Raster::filled(4, 4, 1);
        domain.set_transform(gt);

        let mut left: Raster<u32> = Raster::filled(4, 2, 1);
        left.set_transform(gt.for_window(&Window::new(0, 0, 4, 2)));
        let tracker = BorderTracker::within(&domain);
        // The seam at column 2 is inside the domain
        assert_eq!(tracker.border_clumps(&left).unwrap().len(), 1);

        // A single tile covering the whole domain has no seam
        let mut whole: Raster<u32> = Raster::filled(4, 4, 1);
        whole.set_transform(gt);
        assert!(tracker.border_clumps(&whole).unwrap().is_empty());

        // Invalid pixels across the seam do not make a border
        for r in 0..4 {
            domain.set(r, 2, 0).unwrap();
        }
        let tracker = BorderTracker::within(&domain);
        assert!(tracker.border_clumps(&left).unwrap().is_empty());
    }

    #[test]
    fn test_track_flags_table() {
        let clumps = Raster::from_vec(vec![1, 1, 1, 1, 2, 1, 1, 1, 1], 3, 3).unwrap();
        let (mask, table) = BorderTracker::new().track(&clumps).unwrap();
        assert_eq!(table.border_ids(), vec![1]);
        assert_eq!(mask.count_where(|v| v == 1), 8);
    }
}
