//! Three-stage tiled segmentation
//!
//! 1. Segment a regular grid, deriving statistics per tile. Clumps that
//!    touch a seam, and tiles that failed, form the border mask `B1`.
//! 2. Segment a half-tile offset grid restricted to `B1`, reusing the
//!    nearest stage-1 statistics. Seam clumps and failures form `B2`.
//! 3. Split `B2` into connected components and segment or burn them.
//!
//! Merges happen on the orchestrator thread in tile id order; the final
//! raster is renumbered in scan order.

use crate::config::PipelineConfig;
use crate::cutter::TileCutter;
use crate::error::{PipelineError, Result, Stage, TileFailure};
use crate::pool::{CancellationToken, TaskBudget, WorkerPool};
use crate::registry::{StatsEntry, StatsRegistry, StatsRegistryBuilder};
use crate::segmenter::{PerTileSegmenter, StatsOut};
use crate::source::InputRaster;
use crate::subset::SubsetSegmenter;
use crate::tiled::{GridSpec, Tile, TileGrid};
use crate::workdir::WorkingDirectory;
use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiledseg_algorithms::border::BorderTracker;
use tiledseg_algorithms::merge::{clear_where, or_into, relabel_sequential, ClumpMerger};
use tiledseg_algorithms::segmentation::{ShepherdSegmenter, TileSegmenter};
use tiledseg_core::io::{read_band, write_band, AttributeTable, GeoTiffBackend, RasterBackend};
use tiledseg_core::{Error, Raster};
use tracing::{debug, info, warn};

/// Where a run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PipelineState {
    Prepared,
    Stage1Tiled,
    Stage1Segmented,
    Stage1Merged,
    Stage2Tiled,
    Stage2Segmented,
    Stage2Merged,
    Stage3Subsetted,
    Stage3Segmented,
    Stage3Merged,
    Finalized,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Prepared => "prepared",
            PipelineState::Stage1Tiled => "stage 1 tiled",
            PipelineState::Stage1Segmented => "stage 1 segmented",
            PipelineState::Stage1Merged => "stage 1 merged",
            PipelineState::Stage2Tiled => "stage 2 tiled",
            PipelineState::Stage2Segmented => "stage 2 segmented",
            PipelineState::Stage2Merged => "stage 2 merged",
            PipelineState::Stage3Subsetted => "stage 3 subsetted",
            PipelineState::Stage3Segmented => "stage 3 segmented",
            PipelineState::Stage3Merged => "stage 3 merged",
            PipelineState::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// Tile counts of one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub tiles: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Result of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub output: PathBuf,
    /// Number of clumps in the output, ids `1..=clumps`
    pub clumps: u32,
    pub stages: [StageCounts; 3],
    /// Every tile or component that failed, in stage then id order
    pub skipped: Vec<TileFailure>,
    /// Per-tile error log, present when something was skipped
    pub error_log: Option<PathBuf>,
    pub mean_image: Option<PathBuf>,
}

impl RunSummary {
    pub fn counts(&self, stage: Stage) -> StageCounts {
        self.stages[stage.number() as usize - 1]
    }

    pub fn skipped_ids(&self, stage: Stage) -> Vec<u32> {
        self.skipped
            .iter()
            .filter(|f| f.stage == stage)
            .map(|f| f.tile_id)
            .collect()
    }
}

/// Called on every state transition
pub type Observer = Arc<dyn Fn(PipelineState) + Send + Sync>;

/// The state threaded through one run
pub struct PipelineContext<'a> {
    pub config: &'a PipelineConfig,
    pub workdir: WorkingDirectory,
    pub input: InputRaster,
    /// 1 where the input is valid
    pub valid: Raster<u8>,
    pub state: PipelineState,
    pub failures: Vec<TileFailure>,
    pub counts: [StageCounts; 3],
    observer: Option<Observer>,
}

impl<'a> PipelineContext<'a> {
    fn new(
        config: &'a PipelineConfig,
        workdir: WorkingDirectory,
        input: InputRaster,
        valid: Raster<u8>,
        observer: Option<Observer>,
    ) -> Self {
        Self {
            config,
            workdir,
            input,
            valid,
            state: PipelineState::Prepared,
            failures: Vec::new(),
            counts: [StageCounts::default(); 3],
            observer,
        }
    }

    fn advance(&mut self, state: PipelineState) {
        info!("run {}: {}", self.workdir.run_id(), state);
        self.state = state;
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }

    fn record(&mut self, stage: Stage, tile_id: u32, cause: impl fmt::Display) {
        warn!("skipping stage {} tile {}: {}", stage, tile_id, cause);
        self.failures.push(TileFailure {
            stage,
            tile_id,
            cause: cause.to_string(),
        });
    }

    fn stage_counts(&mut self, stage: Stage) -> &mut StageCounts {
        &mut self.counts[stage.number() as usize - 1]
    }
}

/// Runs the three stages over an input raster.
///
/// ```no_run
/// use std::path::Path;
/// use tiledseg_parallel::{Orchestrator, PipelineConfig};
///
/// let config = PipelineConfig { workers: 4, ..Default::default() };
/// let summary = Orchestrator::new()
///     .run(Path::new("scene.tif"), Path::new("clumps.tif"), &config)
///     .unwrap();
/// println!("{} clumps", summary.clumps);
/// ```
pub struct Orchestrator {
    backend: Arc<dyn RasterBackend>,
    primitive: Arc<dyn TileSegmenter>,
    token: CancellationToken,
    observer: Option<Observer>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// GeoTIFF files and the built-in segmentation primitive
    pub fn new() -> Self {
        Self {
            backend: Arc::new(GeoTiffBackend::new()),
            primitive: Arc::new(ShepherdSegmenter::new()),
            token: CancellationToken::new(),
            observer: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn RasterBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_segmenter(mut self, primitive: Arc<dyn TileSegmenter>) -> Self {
        self.primitive = primitive;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn on_transition(mut self, observer: impl Fn(PipelineState) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Token that cancels this orchestrator's runs
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Segment `input` into `output`.
    ///
    /// The input is read by window, never as a whole. The working
    /// directory is removed whatever the outcome. Per-tile failures are
    /// written to `<output>.tile-errors.log`.
    pub fn run(&self, input: &Path, output: &Path, config: &PipelineConfig) -> Result<RunSummary> {
        config.validate()?;
        let input = InputRaster::open(self.backend.clone(), input)?;
        if let Some(bands) = &config.segmentation.band_subset {
            if let Some(&bad) = bands.iter().find(|&&b| b > input.bands()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "band {} requested but {} has {} bands",
                    bad,
                    input.path().display(),
                    input.bands()
                )));
            }
        }

        let (rows, cols) = input.shape();
        info!(
            "segmenting {} ({} bands, {}x{}) with {} workers",
            input.path().display(),
            input.bands(),
            rows,
            cols,
            config.workers
        );
        let valid = input.valid_mask()?;
        let workdir = WorkingDirectory::acquire(config.tmp_dir.as_deref())?;
        let mut ctx = PipelineContext::new(config, workdir, input, valid, self.observer.clone());
        ctx.advance(PipelineState::Prepared);

        let outcome = self.run_stages(&mut ctx, output);
        ctx.failures.sort_by_key(|f| (f.stage, f.tile_id));
        let log = write_error_log(output, &ctx.failures);
        drop(ctx);

        let mut summary = outcome?;
        summary.error_log = log?;
        Ok(summary)
    }

    fn run_stages(&self, ctx: &mut PipelineContext<'_>, output: &Path) -> Result<RunSummary> {
        let pool = WorkerPool::new(ctx.config.workers, self.token.clone(), ctx.config.tile_timeout)?;
        let segmenter = PerTileSegmenter::new(self.backend.clone(), self.primitive.clone());

        let (registry, mut clumps, b1) = self.stage_one(ctx, &pool, &segmenter)?;
        self.check_cancelled()?;
        let b2 = self.stage_two(ctx, &pool, &segmenter, &registry, &mut clumps, &b1)?;
        self.check_cancelled()?;
        self.stage_three(ctx, &pool, &segmenter, &registry, &mut clumps, &b2)?;
        self.finalize(ctx, clumps, output)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn grid_spec(config: &PipelineConfig, stage: Stage) -> GridSpec {
        GridSpec {
            tile_width: config.tile_width,
            tile_height: config.tile_height,
            valid_threshold: config.valid_threshold,
            offset: stage == Stage::Two,
        }
    }

    /// Build, persist and cut the grid of `stage`
    fn tile(&self, ctx: &mut PipelineContext<'_>, stage: Stage, base: Option<&Raster<u8>>) -> Result<TileGrid> {
        let mut grid = TileGrid::build(&ctx.valid, &Self::grid_spec(ctx.config, stage), base)?;
        grid.persist(self.backend.as_ref(), &ctx.workdir, stage)?;
        TileCutter::new(self.backend.as_ref()).cut(&mut grid, &ctx.input, &ctx.workdir, stage)?;
        ctx.stage_counts(stage).tiles = grid.len() + grid.empty_cells().len();
        Ok(grid)
    }

    /// Split task outcomes into succeeded ids (with their values) and
    /// record the failures
    fn sort_outcomes<T>(
        ctx: &mut PipelineContext<'_>,
        stage: Stage,
        results: Vec<(u32, tiledseg_core::Result<T>)>,
    ) -> (Vec<(u32, T)>, Vec<u32>) {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (id, outcome) in results {
            match outcome {
                Ok(value) => succeeded.push((id, value)),
                Err(e) => {
                    ctx.record(stage, id, &e);
                    failed.push(id);
                }
            }
        }
        let counts = ctx.stage_counts(stage);
        counts.succeeded = succeeded.len();
        counts.failed += failed.len();
        (succeeded, failed)
    }

    fn stage_one(
        &self,
        ctx: &mut PipelineContext<'_>,
        pool: &WorkerPool,
        segmenter: &PerTileSegmenter,
    ) -> Result<(StatsRegistry, Raster<u32>, Raster<u8>)> {
        let grid = self.tile(ctx, Stage::One, None)?;
        for cell in grid.empty_cells() {
            ctx.record(Stage::One, cell.id, format_args!("no valid pixels in {}", cell.window));
        }
        ctx.stage_counts(Stage::One).failed = grid.empty_cells().len();
        ctx.advance(PipelineState::Stage1Tiled);

        let builder = StatsRegistryBuilder::new();
        let results = {
            let workdir = &ctx.workdir;
            let params = &ctx.config.segmentation;
            let tracker = BorderTracker::within(&ctx.valid);
            let builder = &builder;
            let tasks: Vec<(u32, &Tile)> = grid.tiles().iter().map(|t| (t.id, t)).collect();
            pool.run(tasks, |id, tile: &Tile, budget: &TaskBudget| -> tiledseg_core::Result<()> {
                let clumps = workdir.clumps(Stage::One, id);
                let entry = StatsEntry {
                    tile_id: id,
                    centre: tile.centre,
                    centres_path: workdir.stats_centres(id),
                    stretch_path: workdir.stats_stretch(id),
                };
                segmenter.segment_derive(
                    &workdir.tile_image(Stage::One, id),
                    &clumps,
                    StatsOut {
                        centres: &entry.centres_path,
                        stretch: &entry.stretch_path,
                    },
                    params,
                    budget,
                )?;
                let borders = segmenter.track_borders(&clumps, &workdir.border(Stage::One, id), &tracker)?;
                debug!("stage 1 tile {}: {} border clumps", id, borders);
                builder.register(entry)
            })?
        };

        let (succeeded, failed) = Self::sort_outcomes(ctx, Stage::One, results);
        if succeeded.is_empty() {
            return Err(PipelineError::NoValidTiles { failed: failed.len() });
        }
        debug!("{} stage-1 statistics registered", builder.len());
        ctx.advance(PipelineState::Stage1Segmented);

        let backend = self.backend.as_ref();
        let mut clumps: Raster<u32> = ctx.valid.with_same_meta();
        clumps.set_nodata(Some(0));
        let mut border: Raster<u8> = ctx.valid.with_same_meta();
        {
            let mut merger = ClumpMerger::new(&mut clumps);
            for (id, _) in &succeeded {
                let tile: Raster<u32> = read_band(backend, &ctx.workdir.clumps(Stage::One, *id))?;
                merger.add(&tile)?;
            }
        }
        for (id, _) in &succeeded {
            let mask: Raster<u8> = read_band(backend, &ctx.workdir.border(Stage::One, *id))?;
            or_into(&mut border, &mask)?;
        }
        burn_failed_footprints(&grid, &failed, &mut border)?;
        write_band(backend, &ctx.workdir.composite_clumps(Stage::One), &clumps)?;
        write_band(backend, &ctx.workdir.composite_border(Stage::One), &border)?;
        ctx.advance(PipelineState::Stage1Merged);

        let registry = builder.seal();
        registry.write_index(&ctx.workdir.stats_index())?;
        Ok((registry, clumps, border))
    }

    fn stage_two(
        &self,
        ctx: &mut PipelineContext<'_>,
        pool: &WorkerPool,
        segmenter: &PerTileSegmenter,
        registry: &StatsRegistry,
        clumps: &mut Raster<u32>,
        b1: &Raster<u8>,
    ) -> Result<Raster<u8>> {
        let backend = self.backend.as_ref();
        let mut border: Raster<u8> = ctx.valid.with_same_meta();

        let grid = self.tile(ctx, Stage::Two, Some(b1))?;
        ctx.advance(PipelineState::Stage2Tiled);
        if grid.is_empty() {
            info!("no stage-1 border pixels, nothing to redo in stage 2");
        }

        let results = {
            let workdir = &ctx.workdir;
            let params = &ctx.config.segmentation;
            let tracker = BorderTracker::within(b1);
            let tasks: Vec<(u32, &Tile)> = grid.tiles().iter().map(|t| (t.id, t)).collect();
            pool.run(tasks, |id, tile: &Tile, budget: &TaskBudget| -> tiledseg_core::Result<()> {
                let entry = registry
                    .nearest(tile.centre)
                    .ok_or_else(|| Error::Algorithm("no stage-1 statistics to reuse".into()))?;
                debug!("stage 2 tile {} reuses statistics of tile {}", id, entry.tile_id);
                let clumps = workdir.clumps(Stage::Two, id);
                segmenter.segment_reuse(
                    &workdir.tile_image(Stage::Two, id),
                    &clumps,
                    &entry.load()?,
                    params,
                    budget,
                )?;
                segmenter.track_borders(&clumps, &workdir.border(Stage::Two, id), &tracker)?;
                Ok(())
            })?
        };
        let (succeeded, failed) = Self::sort_outcomes(ctx, Stage::Two, results);
        ctx.advance(PipelineState::Stage2Segmented);

        // All replaced footprints are cleared before the first add
        for (id, _) in &succeeded {
            if let Some(tile) = grid.get(*id) {
                clear_where(clumps, &grid.footprint(tile)?)?;
            }
        }
        {
            let mut merger = ClumpMerger::new(clumps);
            for (id, _) in &succeeded {
                let tile: Raster<u32> = read_band(backend, &ctx.workdir.clumps(Stage::Two, *id))?;
                merger.add(&tile)?;
            }
        }
        for (id, _) in &succeeded {
            let mask: Raster<u8> = read_band(backend, &ctx.workdir.border(Stage::Two, *id))?;
            or_into(&mut border, &mask)?;
        }
        burn_failed_footprints(&grid, &failed, &mut border)?;
        write_band(backend, &ctx.workdir.composite_clumps(Stage::Two), &*clumps)?;
        write_band(backend, &ctx.workdir.composite_border(Stage::Two), &border)?;
        ctx.advance(PipelineState::Stage2Merged);
        Ok(border)
    }

    fn stage_three(
        &self,
        ctx: &mut PipelineContext<'_>,
        pool: &WorkerPool,
        segmenter: &PerTileSegmenter,
        registry: &StatsRegistry,
        clumps: &mut Raster<u32>,
        b2: &Raster<u8>,
    ) -> Result<()> {
        let outcome = {
            let subset = SubsetSegmenter::new(segmenter, registry, &ctx.config.segmentation, &ctx.workdir);
            let subsets = subset.subsets(&ctx.input, b2)?;
            let results = subset.segment(&subsets, pool)?;
            let outcome = subset.merge(&subsets, b2, results, clumps)?;
            (subsets.components.len(), outcome)
        };
        let (components, outcome) = outcome;
        // Reported once the subset segmenter releases the context
        ctx.advance(PipelineState::Stage3Subsetted);
        ctx.advance(PipelineState::Stage3Segmented);

        let counts = ctx.stage_counts(Stage::Three);
        counts.tiles = components;
        counts.failed = outcome.failures.len();
        counts.succeeded = components - outcome.failures.len();
        for failure in outcome.failures {
            warn!("{}", failure);
            ctx.failures.push(failure);
        }
        info!(
            "stage 3: {} components segmented, {} burnt through",
            outcome.segmented, outcome.burnt
        );
        ctx.advance(PipelineState::Stage3Merged);
        Ok(())
    }

    fn finalize(&self, ctx: &mut PipelineContext<'_>, mut clumps: Raster<u32>, output: &Path) -> Result<RunSummary> {
        let backend = self.backend.as_ref();
        let count = relabel_sequential(&mut clumps);
        clumps.set_nodata(Some(0));
        write_band(backend, output, &clumps)?;
        backend.write_attribute_table(output, &AttributeTable::from_clumps(&clumps))?;

        if let Some(path) = &ctx.config.mean_image {
            let means = ctx.input.clump_means(&clumps)?;
            backend.write(path, &means)?;
            info!("wrote clump means to {}", path.display());
        }
        ctx.advance(PipelineState::Finalized);
        ctx.failures.sort_by_key(|f| (f.stage, f.tile_id));
        info!(
            "{} clumps written to {} ({} tiles skipped)",
            count,
            output.display(),
            ctx.failures.len()
        );

        Ok(RunSummary {
            run_id: ctx.workdir.run_id().to_string(),
            output: output.to_path_buf(),
            clumps: count,
            stages: ctx.counts,
            skipped: ctx.failures.clone(),
            error_log: None,
            mean_image: ctx.config.mean_image.clone(),
        })
    }
}

/// Mark the footprints of failed tiles as border so a later stage redoes them
fn burn_failed_footprints(grid: &TileGrid, failed: &[u32], border: &mut Raster<u8>) -> Result<()> {
    for id in failed {
        if let Some(tile) = grid.get(*id) {
            or_into(border, &grid.footprint(tile)?)?;
        }
    }
    Ok(())
}

/// Path of the per-tile error log for an output raster
pub fn error_log_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".tile-errors.log");
    PathBuf::from(name)
}

/// Write failures as JSON lines next to the output. A stale log from an
/// earlier run is removed when there is nothing to report.
fn write_error_log(output: &Path, failures: &[TileFailure]) -> Result<Option<PathBuf>> {
    let path = error_log_path(output);
    if failures.is_empty() {
        if path.exists() {
            fs::remove_file(&path)?;
        }
        return Ok(None);
    }
    let mut writer = BufWriter::new(File::create(&path)?);
    for failure in failures {
        serde_json::to_writer(&mut writer, failure)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(Some(path))
}

/// Run with GeoTIFF files and the built-in primitive
pub fn run(input: &Path, output: &Path, config: &PipelineConfig) -> Result<RunSummary> {
    Orchestrator::new().run(input, output, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_log_path_appends_suffix() {
        assert_eq!(
            error_log_path(Path::new("/out/clumps.tif")),
            PathBuf::from("/out/clumps.tif.tile-errors.log")
        );
    }

    #[test]
    fn test_error_log_is_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.tif");
        let failures = vec![
            TileFailure {
                stage: Stage::One,
                tile_id: 1,
                cause: "too few samples".into(),
            },
            TileFailure {
                stage: Stage::Two,
                tile_id: 4,
                cause: "timed out".into(),
            },
        ];
        let path = write_error_log(&output, &failures).unwrap().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let back: Vec<TileFailure> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(back, failures);

        // Nothing to report removes the stale log
        assert!(write_error_log(&output, &[]).unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_states_are_ordered() {
        assert!(PipelineState::Prepared < PipelineState::Stage1Tiled);
        assert!(PipelineState::Stage3Merged < PipelineState::Finalized);
        assert_eq!(PipelineState::Stage2Segmented.to_string(), "stage 2 segmented");
    }
}
