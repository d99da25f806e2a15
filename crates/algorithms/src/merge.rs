//! Compositing per-tile clump and border rasters into full-extent rasters
//!
//! Inputs are placed by their geotransform: each tile raster must lie on
//! the target's pixel grid and inside its extent.

use crate::segmentation::relabel_in_scan_order;
use ndarray::s;
use tiledseg_core::{Error, Raster, Result, Window};
use tracing::debug;

/// Largest clump id in a raster, 0 when it has none
pub fn max_id(clumps: &Raster<u32>) -> u32 {
    clumps.data().iter().copied().max().unwrap_or(0)
}

/// Appends clump rasters to a target, rebasing each input above the
/// target's running maximum id.
pub struct ClumpMerger<'a> {
    target: &'a mut Raster<u32>,
    max_id: u32,
}

impl<'a> ClumpMerger<'a> {
    pub fn new(target: &'a mut Raster<u32>) -> Self {
        let max_id = max_id(target);
        Self { target, max_id }
    }

    /// Current largest id in the target
    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    /// Rebase `input` by the running maximum and copy its non-zero pixels in.
    ///
    /// # Errors
    /// `OverlappingClumps` when the target already holds a clump where the
    /// input has one; nothing is written in that case.
    pub fn add(&mut self, input: &Raster<u32>) -> Result<Window> {
        let at = self.target.placement_of(input)?;
        let offset = self.max_id;

        let mut block = self
            .target
            .data_mut()
            .slice_mut(s![at.row_off..at.row_end(), at.col_off..at.col_end()]);

        if let Some(((r, c), _)) = input
            .data()
            .indexed_iter()
            .find(|&((r, c), &v)| v != 0 && block[(r, c)] != 0)
        {
            return Err(Error::OverlappingClumps {
                row: at.row_off + r,
                col: at.col_off + c,
            });
        }

        let input_max = max_id(input);
        let new_max = offset
            .checked_add(input_max)
            .ok_or(Error::ClumpIdOverflow { offset })?;

        for (t, &v) in block.iter_mut().zip(input.data().iter()) {
            if v != 0 {
                *t = v + offset;
            }
        }
        self.max_id = new_max;
        debug!("merged {} clumps at {} (offset {})", input_max, at, offset);
        Ok(at)
    }
}

/// Merge clump rasters into `target` in the given order
pub fn merge_clumps(target: &mut Raster<u32>, inputs: &[Raster<u32>]) -> Result<u32> {
    let mut merger = ClumpMerger::new(target);
    for input in inputs {
        merger.add(input)?;
    }
    Ok(merger.max_id())
}

/// OR each input border raster into `target`
pub fn merge_borders(target: &mut Raster<u8>, inputs: &[Raster<u8>]) -> Result<()> {
    for input in inputs {
        or_into(target, input)?;
    }
    Ok(())
}

/// OR a single binary raster into `target`
pub fn or_into(target: &mut Raster<u8>, input: &Raster<u8>) -> Result<()> {
    let at = target.placement_of(input)?;
    let mut block = target
        .data_mut()
        .slice_mut(s![at.row_off..at.row_end(), at.col_off..at.col_end()]);
    for (t, &v) in block.iter_mut().zip(input.data().iter()) {
        if v != 0 {
            *t = 1;
        }
    }
    Ok(())
}

/// Zero the target wherever `mask` is non-zero. Returns the number of
/// pixels cleared.
pub fn clear_where(target: &mut Raster<u32>, mask: &Raster<u8>) -> Result<usize> {
    let at = target.placement_of(mask)?;
    let mut block = target
        .data_mut()
        .slice_mut(s![at.row_off..at.row_end(), at.col_off..at.col_end()]);
    let mut cleared = 0;
    for (t, &m) in block.iter_mut().zip(mask.data().iter()) {
        if m != 0 && *t != 0 {
            *t = 0;
            cleared += 1;
        }
    }
    Ok(cleared)
}

/// Renumber ids densely from 1 in raster scan order. Returns the clump count.
pub fn relabel_sequential(target: &mut Raster<u32>) -> u32 {
    relabel_in_scan_order(target.data_mut())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiledseg_core::GeoTransform;

    fn tile(data: Vec<u32>, rows: usize, cols: usize, at: Window, gt: GeoTransform) -> Raster<u32> {
        let mut r = Raster::from_vec(data, rows, cols).unwrap();
        r.set_transform(gt.for_window(&at));
        r
    }

    #[test]
    fn test_merge_is_monotone() {
        let gt = GeoTransform::new(0.0, 2.0, 1.0, -1.0);
        let mut target: Raster<u32> = Raster::new(2, 4);
        target.set_transform(gt);

        let a = tile(vec![1, 2, 1, 3], 2, 2, Window::new(0, 0, 2, 2), gt);
        let b = tile(vec![1, 1, 2, 2], 2, 2, Window::new(0, 2, 2, 2), gt);
        let max = merge_clumps(&mut target, &[a, b]).unwrap();

        assert_eq!(max, 3 + 2);
        assert_eq!(max_id(&target), 5);
        assert_eq!(target.get(0, 2).unwrap(), 4);
        assert_eq!(target.get(1, 3).unwrap(), 5);
    }

    #[test]
    fn test_overlap_is_rejected() {
        let gt = GeoTransform::new(0.0, 2.0, 1.0, -1.0);
        let mut target: Raster<u32> = Raster::new(2, 2);
        target.set_transform(gt);

        let a = tile(vec![1, 0, 0, 0], 2, 2, Window::full(2, 2), gt);
        let b = tile(vec![0, 0, 0, 1], 1, 4, Window::new(1, 0, 1, 4), gt);
        merge_clumps(&mut target, &[a.clone()]).unwrap();

        // b does not fit the 2x2 target
        assert!(merge_clumps(&mut target, &[b]).is_err());

        let err = merge_clumps(&mut target, &[a]).unwrap_err();
        assert!(matches!(err, Error::OverlappingClumps { row: 0, col: 0 }));
    }

    #[test]
    fn test_clear_and_relabel() {
        let mut target = Raster::from_vec(vec![4, 4, 9, 9], 2, 2).unwrap();
        let mask = Raster::from_vec(vec![0u8, 0, 1, 1], 2, 2).unwrap();
        assert_eq!(clear_where(&mut target, &mask).unwrap(), 2);
        assert_eq!(relabel_sequential(&mut target), 1);
        assert_eq!(target.data().iter().copied().collect::<Vec<_>>(), vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_merge_borders_is_or() {
        let mut target: Raster<u8> = Raster::new(1, 3);
        let a = Raster::from_vec(vec![1u8, 0, 0], 1, 3).unwrap();
        let b = Raster::from_vec(vec![0u8, 0, 1], 1, 3).unwrap();
        merge_borders(&mut target, &[a, b]).unwrap();
        assert_eq!(target.data().iter().copied().collect::<Vec<_>>(), vec![1, 0, 1]);
    }
}
