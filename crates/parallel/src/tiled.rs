//! Tile layout over a raster
//!
//! A grid starts from regular cells of `tile_width` x `tile_height` pixels
//! (shifted by half a cell for stage 2), keeps only the pixels that are
//! valid and inside the optional base mask, and dissolves under-full cells
//! into their fullest adjacent full neighbour. Tile ids follow row-major
//! cell order, so the same input and parameters always give the same grid.

use crate::error::{PipelineError, Result, Stage};
use crate::workdir::WorkingDirectory;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tiledseg_core::io::{read_band, write_band, RasterBackend};
use tiledseg_core::{Error, Raster, Window};
use tracing::debug;

/// Shape of a grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub tile_width: usize,
    pub tile_height: usize,
    pub valid_threshold: f64,
    /// Shift cells up and left by half a tile
    pub offset: bool,
}

/// One tile of a grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    /// Unique within the grid, from 1
    pub id: u32,
    /// Centre of the bounding box, in CRS units
    pub centre: (f64, f64),
    /// Bounding box of the footprint in input pixels
    pub bbox: Window,
    /// Pixels in the footprint
    pub pixel_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
}

/// Regular cells clipped to a raster, in row-major order.
///
/// Yields `(cell_row, cell_col, window)`.
pub struct CellIterator {
    total_rows: usize,
    total_cols: usize,
    tile_rows: usize,
    tile_cols: usize,
    start_row: isize,
    start_col: isize,
    current_row: isize,
    current_col: isize,
    cell_row: usize,
    cell_col: usize,
}

impl CellIterator {
    pub fn new(total_rows: usize, total_cols: usize, tile_rows: usize, tile_cols: usize, offset: bool) -> Self {
        let tile_rows = tile_rows.max(1);
        let tile_cols = tile_cols.max(1);
        let (start_row, start_col) = if offset {
            (-((tile_rows / 2) as isize), -((tile_cols / 2) as isize))
        } else {
            (0, 0)
        };
        Self {
            total_rows,
            total_cols,
            tile_rows,
            tile_cols,
            start_row,
            start_col,
            current_row: start_row,
            current_col: start_col,
            cell_row: 0,
            cell_col: 0,
        }
    }

    /// Number of cell rows and columns
    pub fn dims(&self) -> (usize, usize) {
        let count = |start: isize, total: usize, step: usize| -> usize {
            let span = total as isize - start;
            if span <= 0 {
                0
            } else {
                (span as usize).div_ceil(step)
            }
        };
        (
            count(self.start_row, self.total_rows, self.tile_rows),
            count(self.start_col, self.total_cols, self.tile_cols),
        )
    }
}

impl Iterator for CellIterator {
    type Item = (usize, usize, Window);

    fn next(&mut self) -> Option<Self::Item> {
        if self.total_rows == 0 || self.total_cols == 0 || self.current_row >= self.total_rows as isize {
            return None;
        }

        let row_start = self.current_row.max(0) as usize;
        let col_start = self.current_col.max(0) as usize;
        let row_end = ((self.current_row + self.tile_rows as isize) as usize).min(self.total_rows);
        let col_end = ((self.current_col + self.tile_cols as isize) as usize).min(self.total_cols);
        let item = (
            self.cell_row,
            self.cell_col,
            Window::new(row_start, col_start, row_end - row_start, col_end - col_start),
        );

        self.current_col += self.tile_cols as isize;
        self.cell_col += 1;
        if self.current_col >= self.total_cols as isize {
            self.current_col = self.start_col;
            self.cell_col = 0;
            self.current_row += self.tile_rows as isize;
            self.cell_row += 1;
        }

        Some(item)
    }
}

/// A cell with its eligible pixel count and their extent
#[derive(Debug, Clone)]
struct Cell {
    window: Window,
    count: usize,
    extent: Option<Window>,
}

impl Cell {
    fn underfull(&self, threshold: f64) -> bool {
        (self.count as f64) < threshold * self.window.area() as f64
    }

    fn is_full(&self, threshold: f64) -> bool {
        self.count > 0 && !self.underfull(threshold)
    }
}

/// A cell of a whole-input grid with no valid pixel. It keeps the tile id
/// it would have had so runs can report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyCell {
    pub id: u32,
    pub window: Window,
}

/// Serialized form of a grid's tiles
#[derive(Debug, Serialize, Deserialize)]
struct GridLayout {
    rows: usize,
    cols: usize,
    tiles: Vec<Tile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    empty: Vec<EmptyCell>,
}

/// Tiles over one raster plus the label raster assigning pixels to them
#[derive(Debug, Clone)]
pub struct TileGrid {
    labels: Raster<u32>,
    tiles: Vec<Tile>,
    empty: Vec<EmptyCell>,
}

/// A tile id goes to a group of cells or, on a whole-input grid, to an
/// empty cell
enum Slot {
    Group(Vec<usize>),
    Empty(usize),
}

impl TileGrid {
    /// Lay tiles over the valid pixels of an input, given as its validity
    /// mask (non-zero valid), restricted to pixels where `base_mask` is
    /// non-zero when one is given.
    ///
    /// Without a base mask the grid covers the whole input and cells with
    /// no valid pixel are kept as [`EmptyCell`]s, numbered with the tiles.
    ///
    /// # Errors
    /// `EmptyGrid` when no base mask is given and the valid fraction of the
    /// whole input is below `valid_threshold`.
    pub fn build(valid: &Raster<u8>, spec: &GridSpec, base_mask: Option<&Raster<u8>>) -> Result<Self> {
        let (rows, cols) = valid.shape();
        let mut eligible: Raster<u8> = valid.with_same_meta();
        for (e, &v) in eligible.data_mut().iter_mut().zip(valid.data().iter()) {
            *e = u8::from(v != 0);
        }
        if let Some(mask) = base_mask {
            if mask.shape() != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: rows,
                    ec: cols,
                    ar: mask.rows(),
                    ac: mask.cols(),
                }
                .into());
            }
            for (e, &m) in eligible.data_mut().iter_mut().zip(mask.data().iter()) {
                if m == 0 {
                    *e = 0;
                }
            }
        }

        let total = eligible.count_where(|v| v != 0);
        if base_mask.is_none() {
            let valid_fraction = if rows * cols == 0 {
                0.0
            } else {
                total as f64 / (rows * cols) as f64
            };
            if total == 0 || valid_fraction < spec.valid_threshold {
                return Err(PipelineError::EmptyGrid {
                    valid_fraction,
                    threshold: spec.valid_threshold,
                });
            }
        }

        let iter = CellIterator::new(rows, cols, spec.tile_height, spec.tile_width, spec.offset);
        let (grid_rows, grid_cols) = iter.dims();
        let cells: Vec<Cell> = iter
            .map(|(_, _, window)| Self::measure(&eligible, window))
            .collect();

        let mut slots: Vec<Slot> = Self::group_cells(&cells, grid_rows, grid_cols, spec.valid_threshold)
            .into_iter()
            .map(Slot::Group)
            .collect();
        if base_mask.is_none() {
            slots.extend(
                cells
                    .iter()
                    .enumerate()
                    .filter(|(_, cell)| cell.count == 0)
                    .map(|(i, _)| Slot::Empty(i)),
            );
        }
        slots.sort_by_key(|slot| match slot {
            Slot::Group(members) => members[0],
            Slot::Empty(i) => *i,
        });

        let mut labels: Raster<u32> = eligible.with_same_meta();
        labels.set_nodata(Some(0));
        let mut tiles = Vec::with_capacity(slots.len());
        let mut empty = Vec::new();
        for (index, slot) in slots.iter().enumerate() {
            let id = index as u32 + 1;
            let members = match slot {
                Slot::Group(members) => members,
                Slot::Empty(i) => {
                    empty.push(EmptyCell {
                        id,
                        window: cells[*i].window,
                    });
                    continue;
                }
            };
            let mut bbox: Option<Window> = None;
            let mut pixel_count = 0;
            for &m in members {
                let cell = &cells[m];
                pixel_count += cell.count;
                if let Some(extent) = cell.extent {
                    bbox = Some(bbox.map_or(extent, |b| b.union(&extent)));
                }
                let w = cell.window;
                for r in w.row_off..w.row_end() {
                    for c in w.col_off..w.col_end() {
                        if eligible.data()[(r, c)] != 0 {
                            labels.data_mut()[(r, c)] = id;
                        }
                    }
                }
            }
            let Some(bbox) = bbox else { continue };
            tiles.push(Tile {
                id,
                centre: valid.transform().window_centre(&bbox),
                bbox,
                pixel_count,
                mask_path: None,
                image_path: None,
            });
        }

        debug!(
            "grid of {} tiles and {} empty cells from {}x{} cells ({} eligible pixels, offset: {})",
            tiles.len(),
            empty.len(),
            grid_rows,
            grid_cols,
            total,
            spec.offset
        );
        Ok(Self { labels, tiles, empty })
    }

    fn measure(eligible: &Raster<u8>, window: Window) -> Cell {
        let mut count = 0;
        let mut extent: Option<(usize, usize, usize, usize)> = None;
        for r in window.row_off..window.row_end() {
            for c in window.col_off..window.col_end() {
                if eligible.data()[(r, c)] == 0 {
                    continue;
                }
                count += 1;
                extent = Some(match extent {
                    None => (r, c, r, c),
                    Some((r0, c0, r1, c1)) => (r0.min(r), c0.min(c), r1.max(r), c1.max(c)),
                });
            }
        }
        Cell {
            window,
            count,
            extent: extent.map(|(r0, c0, r1, c1)| Window::from_extent(r0, c0, r1, c1)),
        }
    }

    /// Cell indices of each tile, ordered by their first cell.
    ///
    /// Empty cells are left out. Each under-full cell joins the adjacent
    /// full cell with the most eligible pixels (lowest index on ties); an
    /// under-full cell with no full neighbour stays on its own and never
    /// takes in another under-full cell.
    fn group_cells(cells: &[Cell], grid_rows: usize, grid_cols: usize, threshold: f64) -> Vec<Vec<usize>> {
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, cell) in cells.iter().enumerate() {
            if cell.is_full(threshold) {
                groups.insert(i, vec![i]);
            }
        }

        for (i, cell) in cells.iter().enumerate() {
            if cell.count == 0 || !cell.underfull(threshold) {
                continue;
            }
            let (gr, gc) = (i / grid_cols, i % grid_cols);
            let mut neighbours = BTreeSet::new();
            if gr > 0 {
                neighbours.insert(i - grid_cols);
            }
            if gr + 1 < grid_rows {
                neighbours.insert(i + grid_cols);
            }
            if gc > 0 {
                neighbours.insert(i - 1);
            }
            if gc + 1 < grid_cols {
                neighbours.insert(i + 1);
            }

            let mut best: Option<usize> = None;
            for n in neighbours {
                if !cells[n].is_full(threshold) {
                    continue;
                }
                if best.map_or(true, |b| cells[n].count > cells[b].count) {
                    best = Some(n);
                }
            }
            match best.and_then(|b| groups.get_mut(&b)) {
                Some(members) => members.push(i),
                None => {
                    groups.insert(i, vec![i]);
                }
            }
        }

        let mut groups: Vec<Vec<usize>> = groups
            .into_values()
            .map(|mut members| {
                members.sort_unstable();
                members
            })
            .collect();
        groups.sort_by_key(|members| members[0]);
        groups
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tiles_mut(&mut self) -> &mut [Tile] {
        &mut self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Tile> {
        self.tiles.iter().find(|t| t.id == id)
    }

    /// Cells of a whole-input grid that had no valid pixel, in id order
    pub fn empty_cells(&self) -> &[EmptyCell] {
        &self.empty
    }

    /// Full-extent raster of tile ids, 0 outside every footprint
    pub fn labels(&self) -> &Raster<u32> {
        &self.labels
    }

    /// Binary raster of one tile's footprint over its bounding box
    pub fn footprint(&self, tile: &Tile) -> Result<Raster<u8>> {
        let block = self.labels.window(&tile.bbox)?;
        let mut mask: Raster<u8> = block.with_same_meta();
        for (m, &id) in mask.data_mut().iter_mut().zip(block.data().iter()) {
            if id == tile.id {
                *m = 1;
            }
        }
        Ok(mask)
    }

    /// Write the label raster, the JSON layout and one footprint mask per
    /// tile into the working directory, recording the mask paths.
    pub fn persist(&mut self, backend: &dyn RasterBackend, workdir: &WorkingDirectory, stage: Stage) -> Result<()> {
        workdir.prepare_stage(stage)?;
        for i in 0..self.tiles.len() {
            let path = workdir.tile_mask(stage, self.tiles[i].id);
            write_band(backend, &path, &self.footprint(&self.tiles[i])?)?;
            self.tiles[i].mask_path = Some(path);
        }
        write_band(backend, &workdir.grid_labels(stage), &self.labels)?;

        let layout = GridLayout {
            rows: self.labels.rows(),
            cols: self.labels.cols(),
            tiles: self.tiles.clone(),
            empty: self.empty.clone(),
        };
        let writer = BufWriter::new(File::create(workdir.grid_layout(stage))?);
        serde_json::to_writer_pretty(writer, &layout)?;
        Ok(())
    }

    /// Reopen a persisted grid
    pub fn open(backend: &dyn RasterBackend, labels_path: &Path, layout_path: &Path) -> Result<Self> {
        let labels: Raster<u32> = read_band(backend, labels_path)?;
        let layout: GridLayout = serde_json::from_reader(BufReader::new(File::open(layout_path)?))?;
        if (layout.rows, layout.cols) != labels.shape() {
            return Err(Error::SizeMismatch {
                er: layout.rows,
                ec: layout.cols,
                ar: labels.rows(),
                ac: labels.cols(),
            }
            .into());
        }
        Ok(Self {
            labels,
            tiles: layout.tiles,
            empty: layout.empty,
        })
    }
}
