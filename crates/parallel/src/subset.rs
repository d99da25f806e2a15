//! Stage 3: the border pixels left after stage 2
//!
//! The remaining border mask is split into connected components. Large
//! components are cut out and segmented with the nearest stage-1
//! statistics; small ones, and large ones whose segmentation fails, are
//! burnt through as a single clump each.

use crate::error::{Result, Stage, TileFailure};
use crate::pool::{TaskBudget, WorkerPool};
use crate::registry::StatsRegistry;
use crate::segmenter::PerTileSegmenter;
use crate::source::InputRaster;
use crate::workdir::WorkingDirectory;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tiledseg_algorithms::merge::{clear_where, ClumpMerger};
use tiledseg_algorithms::params::SegmentationParams;
use tiledseg_algorithms::segmentation::label_components;
use tiledseg_core::io::{read_band, write_band};
use tiledseg_core::{Error, Raster, Window};
use tracing::{debug, warn};

/// One connected component of the border mask
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: u32,
    pub bbox: Window,
    pub pixel_count: usize,
    pub centre: (f64, f64),
    /// Set for components large enough to segment
    pub image_path: Option<PathBuf>,
}

impl Component {
    pub fn is_burn_through(&self) -> bool {
        self.image_path.is_none()
    }
}

/// The labelled border mask and its components, in id order
#[derive(Debug, Clone)]
pub struct Subsets {
    pub labels: Raster<u32>,
    pub components: Vec<Component>,
}

impl Subsets {
    pub fn segmentable(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(|c| !c.is_burn_through())
    }
}

/// What the merge did
#[derive(Debug, Clone, Default)]
pub struct SubsetOutcome {
    pub segmented: usize,
    pub burnt: usize,
    pub failures: Vec<TileFailure>,
}

pub struct SubsetSegmenter<'a> {
    segmenter: &'a PerTileSegmenter,
    registry: &'a StatsRegistry,
    params: &'a SegmentationParams,
    workdir: &'a WorkingDirectory,
}

impl<'a> SubsetSegmenter<'a> {
    pub fn new(
        segmenter: &'a PerTileSegmenter,
        registry: &'a StatsRegistry,
        params: &'a SegmentationParams,
        workdir: &'a WorkingDirectory,
    ) -> Self {
        Self {
            segmenter,
            registry,
            params,
            workdir,
        }
    }

    /// Label `border` and cut an image out of `input` for every component
    /// of at least `min_pixels` pixels.
    pub fn subsets(&self, input: &InputRaster, border: &Raster<u8>) -> Result<Subsets> {
        self.workdir.prepare_stage(Stage::Three)?;
        let (labels, table) = label_components(border, self.params.connectivity);

        let mut components = Vec::with_capacity(table.len());
        for row in &table.rows {
            let bbox = row.extent();
            let pixel_count = row.pixel_count as usize;
            let image_path = if pixel_count >= self.params.min_pixels {
                let path = self.workdir.tile_image(Stage::Three, row.id);
                let subset = input.masked_window(&labels, row.id, &bbox)?;
                self.segmenter.backend().write(&path, &subset)?;
                Some(path)
            } else {
                None
            };
            components.push(Component {
                id: row.id,
                bbox,
                pixel_count,
                centre: labels.transform().window_centre(&bbox),
                image_path,
            });
        }
        debug!(
            "{} border components, {} to segment",
            components.len(),
            components.iter().filter(|c| !c.is_burn_through()).count()
        );
        Ok(Subsets { labels, components })
    }

    /// Segment the large components on the pool with their nearest
    /// statistics. Returns each component's outcome, sorted by id.
    pub fn segment(&self, subsets: &Subsets, pool: &WorkerPool) -> Result<Vec<(u32, tiledseg_core::Result<()>)>> {
        let tasks: Vec<(u32, &Component)> = subsets.segmentable().map(|c| (c.id, c)).collect();
        pool.run(tasks, |id, component: &Component, budget: &TaskBudget| -> tiledseg_core::Result<()> {
            let entry = self
                .registry
                .nearest(component.centre)
                .ok_or_else(|| Error::Algorithm("no stage-1 statistics to reuse".into()))?;
            let stats = entry.load()?;
            let image = component
                .image_path
                .as_deref()
                .ok_or_else(|| Error::Other(format!("component {} has no image", id)))?;
            debug!("component {} reuses statistics of tile {}", id, entry.tile_id);
            self.segmenter.segment_reuse(
                image,
                &self.workdir.clumps(Stage::Three, id),
                &stats,
                self.params,
                budget,
            )
        })
    }

    /// Clear `border` from `clumps` and merge every component back in,
    /// burning through those that were small or failed.
    pub fn merge(
        &self,
        subsets: &Subsets,
        border: &Raster<u8>,
        results: Vec<(u32, tiledseg_core::Result<()>)>,
        clumps: &mut Raster<u32>,
    ) -> Result<SubsetOutcome> {
        let mut outcome = SubsetOutcome::default();
        let mut failed = BTreeSet::new();
        for (id, result) in results {
            if let Err(e) = result {
                warn!("stage 3 component {} failed, burning it through: {}", id, e);
                outcome.failures.push(TileFailure {
                    stage: Stage::Three,
                    tile_id: id,
                    cause: e.to_string(),
                });
                failed.insert(id);
            }
        }

        let cleared = clear_where(clumps, border)?;
        debug!("cleared {} stage-2 border pixels", cleared);

        let mut merger = ClumpMerger::new(clumps);
        for component in &subsets.components {
            let path = self.workdir.clumps(Stage::Three, component.id);
            let piece: Raster<u32> = if component.is_burn_through() || failed.contains(&component.id) {
                let piece = burn_through(&subsets.labels, component)?;
                write_band(self.segmenter.backend(), &path, &piece)?;
                outcome.burnt += 1;
                piece
            } else {
                outcome.segmented += 1;
                read_band(self.segmenter.backend(), &path)?
            };
            merger.add(&piece)?;
        }
        Ok(outcome)
    }
}

/// A component as a single clump (id 1) over its bounding box
fn burn_through(labels: &Raster<u32>, component: &Component) -> Result<Raster<u32>> {
    let mut piece = labels.window(&component.bbox)?;
    piece
        .data_mut()
        .mapv_inplace(|v| u32::from(v == component.id));
    Ok(piece)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::CancellationToken;
    use crate::registry::{StatsEntry, StatsRegistryBuilder};
    use std::sync::Arc;
    use tiledseg_algorithms::stats::{BandStretch, TileStats};
    use tiledseg_core::io::{GeoTiffBackend, RasterBackend};
    use tiledseg_core::{DataType, GeoTransform, MultiBandRaster};

    struct Fixture {
        workdir: WorkingDirectory,
        segmenter: PerTileSegmenter,
        registry: StatsRegistry,
        params: SegmentationParams,
        _root: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let workdir = WorkingDirectory::acquire(Some(root.path())).unwrap();
        let segmenter = PerTileSegmenter::shepherd(Arc::new(GeoTiffBackend::new()));

        let stats = TileStats {
            kcentres: vec![vec![0.0], vec![255.0]],
            stretch: vec![BandStretch {
                min: 10.0,
                max: 200.0,
                mean: 100.0,
                stdev: 100.0,
            }],
            centre: (0.0, 0.0),
        };
        let entry = StatsEntry {
            tile_id: 1,
            centre: (0.0, 0.0),
            centres_path: workdir.stats_centres(1),
            stretch_path: workdir.stats_stretch(1),
        };
        stats.write(&entry.centres_path, &entry.stretch_path).unwrap();
        let builder = StatsRegistryBuilder::new();
        builder.register(entry).unwrap();

        Fixture {
            workdir,
            segmenter,
            registry: builder.seal(),
            params: SegmentationParams {
                min_pixels: 6,
                ..Default::default()
            },
            _root: root,
        }
    }

    /// 10 x 12 image: left 10, right 200
    fn image() -> MultiBandRaster {
        let mut image = MultiBandRaster::new(1, 10, 12, DataType::U8);
        image.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));
        for ((_, _, c), v) in image.data_mut().indexed_iter_mut() {
            *v = if c < 6 { 10.0 } else { 200.0 };
        }
        image
    }

    fn input(f: &Fixture, image: &MultiBandRaster) -> InputRaster {
        let path = f._root.path().join("input.tif");
        let backend: Arc<dyn RasterBackend> = Arc::new(GeoTiffBackend::new());
        backend.write(&path, image).unwrap();
        InputRaster::open(backend, &path).unwrap()
    }

    #[test]
    fn test_small_components_burn_through_large_ones_split() {
        let f = fixture();
        let img = image();
        let mut border: Raster<u8> = img.valid_mask().with_same_meta();
        // A 2-row band across both halves, and a 2-pixel speck
        for r in 2..4 {
            for c in 0..12 {
                border.set(r, c, 1).unwrap();
            }
        }
        border.set(8, 1, 1).unwrap();
        border.set(8, 2, 1).unwrap();

        let mut clumps: Raster<u32> = img.valid_mask().with_same_meta();
        clumps.data_mut().fill(1);

        let sub = SubsetSegmenter::new(&f.segmenter, &f.registry, &f.params, &f.workdir);
        let subsets = sub.subsets(&input(&f, &img), &border).unwrap();
        assert_eq!(subsets.components.len(), 2);
        assert_eq!(subsets.segmentable().count(), 1);

        let pool = WorkerPool::new(2, CancellationToken::new(), None).unwrap();
        let results = sub.segment(&subsets, &pool).unwrap();
        let outcome = sub.merge(&subsets, &border, results, &mut clumps).unwrap();

        assert_eq!((outcome.segmented, outcome.burnt), (1, 1));
        assert!(outcome.failures.is_empty());
        // The band is split at the value change, the speck is one clump
        let left = clumps.get(2, 0).unwrap();
        let right = clumps.get(3, 11).unwrap();
        assert_ne!(left, right);
        assert_eq!(clumps.get(3, 5).unwrap(), left);
        assert_eq!(clumps.get(2, 6).unwrap(), right);
        assert_eq!(clumps.get(8, 1).unwrap(), clumps.get(8, 2).unwrap());
        assert!(![1, left, right].contains(&clumps.get(8, 1).unwrap()));
        // Untouched pixels keep their clump
        assert_eq!(clumps.get(0, 0).unwrap(), 1);
        assert!(clumps.data().iter().all(|&v| v > 0));
    }

    #[test]
    fn test_failed_component_is_burnt_through() {
        let f = fixture();
        let img = image();
        let mut border: Raster<u8> = img.valid_mask().with_same_meta();
        for c in 0..12 {
            border.set(5, c, 1).unwrap();
        }
        let mut clumps: Raster<u32> = img.valid_mask().with_same_meta();
        clumps.data_mut().fill(1);

        let sub = SubsetSegmenter::new(&f.segmenter, &f.registry, &f.params, &f.workdir);
        let subsets = sub.subsets(&input(&f, &img), &border).unwrap();
        let results = vec![(1, Err(Error::Algorithm("refused".into())))];
        let outcome = sub.merge(&subsets, &border, results, &mut clumps).unwrap();

        assert_eq!(outcome.burnt, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].stage, Stage::Three);
        let id = clumps.get(5, 0).unwrap();
        assert!((0..12).all(|c| clumps.get(5, c).unwrap() == id));
        assert_ne!(id, 1);
    }
}
