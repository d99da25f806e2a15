//! Nearest-tile lookup of stage-1 statistics

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tiledseg_algorithms::stats::TileStats;
use tiledseg_core::Error;

/// Where one stage-1 tile's statistics live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsEntry {
    pub tile_id: u32,
    pub centre: (f64, f64),
    pub centres_path: PathBuf,
    pub stretch_path: PathBuf,
}

impl StatsEntry {
    pub fn load(&self) -> tiledseg_core::Result<TileStats> {
        TileStats::read(&self.centres_path, &self.stretch_path, self.centre)
    }
}

/// Collects entries while stage 1 runs, appended by the workers as their
/// tiles finish. Sealing it yields the read-only [`StatsRegistry`].
#[derive(Debug, Default)]
pub struct StatsRegistryBuilder {
    entries: Mutex<BTreeMap<u32, StatsEntry>>,
}

impl StatsRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<u32, StatsEntry>> {
        // Inserts are whole, a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a tile's entry; each tile registers at most once
    pub fn register(&self, entry: StatsEntry) -> tiledseg_core::Result<()> {
        let mut entries = self.entries();
        if entries.contains_key(&entry.tile_id) {
            return Err(Error::Algorithm(format!(
                "statistics for tile {} registered twice",
                entry.tile_id
            )));
        }
        entries.insert(entry.tile_id, entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn seal(self) -> StatsRegistry {
        let entries = self.entries.into_inner().unwrap_or_else(PoisonError::into_inner);
        StatsRegistry {
            entries: entries.into_values().collect(),
        }
    }
}

/// Stage-1 statistics, ordered by tile id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsRegistry {
    entries: Vec<StatsEntry>,
}

impl StatsRegistry {
    pub fn entries(&self) -> &[StatsEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry whose tile centre is closest to `centre` (squared Euclidean
    /// distance in CRS units). Ties go to the lowest tile id.
    pub fn nearest(&self, centre: (f64, f64)) -> Option<&StatsEntry> {
        let mut best: Option<(f64, &StatsEntry)> = None;
        for entry in &self.entries {
            let dx = entry.centre.0 - centre.0;
            let dy = entry.centre.1 - centre.1;
            let d = dx * dx + dy * dy;
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, entry));
            }
        }
        best.map(|(_, e)| e)
    }

    /// Write `stats/index.json`
    pub fn write_index(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn read_index(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
