//! Raster attribute tables stored as JSON sidecars

use crate::error::Result;
use crate::raster::{Raster, Window};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One row of a clump attribute table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClumpAttributes {
    pub id: u32,
    /// Histogram value: number of pixels carrying this id
    pub pixel_count: u64,
    pub min_row: usize,
    pub min_col: usize,
    pub max_row: usize,
    pub max_col: usize,
    /// Set once border tracking has run
    #[serde(default)]
    pub border: bool,
}

impl ClumpAttributes {
    /// Pixel extent as a window (inclusive extents)
    pub fn extent(&self) -> Window {
        Window::from_extent(self.min_row, self.min_col, self.max_row, self.max_col)
    }
}

/// Per-id attributes of a labelled raster, ordered by id. Id 0 is never listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeTable {
    pub rows: Vec<ClumpAttributes>,
}

impl AttributeTable {
    /// Histogram and extents of every non-zero id
    pub fn from_clumps(clumps: &Raster<u32>) -> Self {
        let mut by_id: BTreeMap<u32, ClumpAttributes> = BTreeMap::new();
        for ((r, c), &id) in clumps.data().indexed_iter() {
            if id == 0 {
                continue;
            }
            let entry = by_id.entry(id).or_insert(ClumpAttributes {
                id,
                pixel_count: 0,
                min_row: r,
                min_col: c,
                max_row: r,
                max_col: c,
                border: false,
            });
            entry.pixel_count += 1;
            entry.min_row = entry.min_row.min(r);
            entry.min_col = entry.min_col.min(c);
            entry.max_row = entry.max_row.max(r);
            entry.max_col = entry.max_col.max(c);
        }
        Self {
            rows: by_id.into_values().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&ClumpAttributes> {
        self.rows
            .binary_search_by_key(&id, |row| row.id)
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Flag the given ids as border clumps
    pub fn mark_border(&mut self, ids: impl IntoIterator<Item = u32>) {
        for id in ids {
            if let Ok(i) = self.rows.binary_search_by_key(&id, |row| row.id) {
                self.rows[i].border = true;
            }
        }
    }

    /// Ids flagged as border clumps
    pub fn border_ids(&self) -> Vec<u32> {
        self.rows.iter().filter(|r| r.border).map(|r| r.id).collect()
    }

    /// Largest id present, 0 when empty
    pub fn max_id(&self) -> u32 {
        self.rows.last().map(|r| r.id).unwrap_or(0)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.flush()?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(file)?)
    }
}

/// Location of the attribute table belonging to a raster file
pub fn sidecar_path(raster_path: &Path) -> PathBuf {
    let mut name = raster_path.as_os_str().to_owned();
    name.push(".rat.json");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_and_extents() {
        let clumps = Raster::from_vec(vec![1, 1, 0, 0, 2, 2, 0, 2, 2], 3, 3).unwrap();
        let table = AttributeTable::from_clumps(&clumps);

        assert_eq!(table.len(), 2);
        let two = table.get(2).unwrap();
        assert_eq!(two.pixel_count, 4);
        assert_eq!(two.extent(), Window::new(1, 1, 2, 2));
        assert!(table.get(0).is_none());
        assert_eq!(table.max_id(), 2);
    }

    #[test]
    fn test_border_flags_persist() {
        let dir = tempfile::tempdir().unwrap();
        let raster_path = dir.path().join("7.clumps");
        let path = sidecar_path(&raster_path);
        assert!(path.to_string_lossy().ends_with("7.clumps.rat.json"));

        let clumps = Raster::from_vec(vec![1, 2, 3, 3], 2, 2).unwrap();
        let mut table = AttributeTable::from_clumps(&clumps);
        table.mark_border([3, 9]);
        table.write(&path).unwrap();

        let back = AttributeTable::read(&path).unwrap();
        assert_eq!(back.border_ids(), vec![3]);
        assert_eq!(back, table);
    }
}
