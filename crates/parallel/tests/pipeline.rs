//! End-to-end runs of the orchestrator over synthetic GeoTIFF scenes.
//!
//! Scenes are a tenth of the size of the reference scenarios so the suite
//! stays fast; the full-size runs are `#[ignore]`d.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiledseg_core::io::{read_band, GeoTiffBackend, RasterBackend};
use tiledseg_core::{DataType, GeoTransform, MultiBandRaster, Raster};
use tiledseg_parallel::pipeline::error_log_path;
use tiledseg_parallel::prelude::*;
use tiledseg_parallel::{PipelineState, TileFailure};

struct Scene {
    dir: tempfile::TempDir,
    input: PathBuf,
}

impl Scene {
    /// Single-band U8 scene; 0 is no-data
    fn new(rows: usize, cols: usize, value: impl Fn(usize, usize) -> f64) -> Self {
        let mut image = MultiBandRaster::new(1, rows, cols, DataType::U8);
        image.set_transform(GeoTransform::new(300_000.0, 4_500_000.0, 10.0, -10.0));
        image.set_nodata(Some(0.0));
        for ((_, r, c), v) in image.data_mut().indexed_iter_mut() {
            *v = value(r, c);
        }
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scene.tif");
        GeoTiffBackend::new().write(&input, &image).unwrap();
        Self { dir, input }
    }

    fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn config(tile: usize) -> PipelineConfig {
    PipelineConfig {
        tile_width: tile,
        tile_height: tile,
        ..Default::default()
    }
}

/// Tiles too small for the default 60 clusters at 1-in-100 sampling
fn small(tile: usize) -> PipelineConfig {
    PipelineConfig {
        segmentation: SegmentationParams {
            num_clusters: 8,
            sampling: 10,
            ..Default::default()
        },
        ..config(tile)
    }
}

fn clumps_of(path: &Path) -> Raster<u32> {
    read_band(&GeoTiffBackend::new(), path).unwrap()
}

fn ids(raster: &Raster<u32>) -> BTreeSet<u32> {
    raster.data().iter().copied().filter(|&v| v > 0).collect()
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    let mut names: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    names.sort();
    names
}

/// Left half 100, right half 200
fn two_rectangles(rows: usize, cols: usize) -> Scene {
    Scene::new(rows, cols, move |_, c| if c < cols / 2 { 100.0 } else { 200.0 })
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

fn single_constant_tile(size: usize) {
    let scene = Scene::new(size, size, |_, _| 100.0);
    let output = scene.output("clumps.tif");
    let cfg = PipelineConfig {
        segmentation: SegmentationParams {
            num_clusters: 4,
            ..Default::default()
        },
        ..config(size)
    };

    let summary = Orchestrator::new().run(&scene.input, &output, &cfg).unwrap();

    assert_eq!(summary.clumps, 1);
    assert_eq!(summary.counts(Stage::One).tiles, 1);
    assert_eq!(summary.counts(Stage::Two).tiles, 0);
    assert_eq!(summary.counts(Stage::Three).tiles, 0);
    assert!(summary.skipped.is_empty());
    assert!(summary.error_log.is_none());

    let clumps = clumps_of(&output);
    assert!(clumps.data().iter().all(|&v| v == 1));
    let table = GeoTiffBackend::new().read_attribute_table(&output).unwrap();
    assert_eq!(table.get(1).unwrap().pixel_count, (size * size) as u64);
}

#[test]
fn scenario_single_constant_tile() {
    single_constant_tile(200);
}

#[test]
#[ignore = "full-size scene"]
fn scenario_single_constant_tile_full_size() {
    single_constant_tile(2000);
}

fn two_rectangles_split_at_the_value_change(rows: usize, cols: usize, tile: usize) {
    let scene = two_rectangles(rows, cols);
    let output = scene.output("clumps.tif");
    let summary = Orchestrator::new()
        .run(&scene.input, &output, &config(tile))
        .unwrap();

    assert_eq!(summary.clumps, 2);
    let clumps = clumps_of(&output);
    assert_eq!(ids(&clumps).len(), 2);
    let a = clumps.get(0, 0).unwrap();
    let b = clumps.get(0, cols - 1).unwrap();
    assert_ne!(a, b);
    for ((_, c), &id) in clumps.data().indexed_iter() {
        assert_eq!(id, if c < cols / 2 { a } else { b }, "column {}", c);
    }
}

#[test]
fn scenario_two_rectangles() {
    two_rectangles_split_at_the_value_change(200, 400, 100);
}

#[test]
#[ignore = "full-size scene"]
fn scenario_two_rectangles_full_size() {
    two_rectangles_split_at_the_value_change(2000, 4000, 1000);
}

fn seam_straddling_stripe(size: usize, tile: usize, half_width: usize) {
    let seam = tile;
    let stripe = seam - half_width..seam + half_width;
    let scene = {
        let stripe = stripe.clone();
        Scene::new(size, size, move |r, _| if stripe.contains(&r) { 50.0 } else { 200.0 })
    };
    let output = scene.output("clumps.tif");
    Orchestrator::new()
        .run(&scene.input, &output, &config(tile))
        .unwrap();

    let clumps = clumps_of(&output);
    let id = clumps.get(stripe.start, 0).unwrap();
    for r in stripe.clone() {
        for c in 0..size {
            assert_eq!(clumps.get(r, c).unwrap(), id, "pixel ({}, {})", r, c);
        }
    }
    assert_ne!(clumps.get(stripe.start - 1, 0).unwrap(), id);
    assert_ne!(clumps.get(stripe.end, 0).unwrap(), id);
}

#[test]
fn scenario_seam_straddling_stripe() {
    seam_straddling_stripe(300, 100, 5);
}

#[test]
#[ignore = "full-size scene"]
fn scenario_seam_straddling_stripe_full_size() {
    seam_straddling_stripe(3000, 1000, 10);
}

#[test]
fn scenario_unsegmentable_tile_is_skipped_and_redone() {
    // The top-left tile keeps only 15 valid rows: 1500 pixels give 15
    // samples, too few for 20 clusters
    let scene = Scene::new(300, 300, |r, c| if r < 85 && c < 100 { 0.0 } else { 200.0 });
    let output = scene.output("clumps.tif");
    let cfg = PipelineConfig {
        valid_threshold: 0.1,
        segmentation: SegmentationParams {
            num_clusters: 20,
            ..Default::default()
        },
        ..config(100)
    };

    let summary = Orchestrator::new().run(&scene.input, &output, &cfg).unwrap();

    assert_eq!(summary.skipped_ids(Stage::One), vec![1]);
    assert_eq!(summary.counts(Stage::One).failed, 1);
    assert_eq!(summary.counts(Stage::One).succeeded, 8);

    let clumps = clumps_of(&output);
    for ((r, c), &id) in clumps.data().indexed_iter() {
        let hole = r < 85 && c < 100;
        assert_eq!(id == 0, hole, "pixel ({}, {})", r, c);
    }

    let log = summary.error_log.as_ref().unwrap();
    assert_eq!(log, &error_log_path(&output));
    let text = std::fs::read_to_string(log).unwrap();
    let first: TileFailure = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!((first.stage, first.tile_id), (Stage::One, 1));
}

fn unsegmentable_no_data_tile(size: usize, tile: usize) {
    let scene = Scene::new(size, size, move |r, c| {
        if r < tile && c < tile {
            0.0
        } else if c < size / 2 {
            100.0
        } else {
            200.0
        }
    });
    let output = scene.output("clumps.tif");

    let summary = Orchestrator::new().run(&scene.input, &output, &config(tile)).unwrap();

    assert_eq!(summary.skipped_ids(Stage::One), vec![1]);
    assert_eq!(summary.counts(Stage::One).tiles, 9);
    assert_eq!(summary.counts(Stage::One).succeeded, 8);
    assert_eq!(summary.counts(Stage::One).failed, 1);

    let clumps = clumps_of(&output);
    for ((r, c), &id) in clumps.data().indexed_iter() {
        let hole = r < tile && c < tile;
        assert_eq!(id == 0, hole, "pixel ({}, {})", r, c);
    }

    let log = summary.error_log.as_ref().unwrap();
    let text = std::fs::read_to_string(log).unwrap();
    let logged: Vec<TileFailure> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    let stage_one: Vec<&TileFailure> = logged.iter().filter(|f| f.stage == Stage::One).collect();
    assert_eq!(stage_one.len(), 1);
    assert_eq!(stage_one[0].tile_id, 1);
    assert!(stage_one[0].cause.contains("no valid pixels"), "{}", stage_one[0].cause);
}

#[test]
fn scenario_no_data_tile_is_reported_as_skipped() {
    unsegmentable_no_data_tile(300, 100);
}

#[test]
#[ignore = "full-size scene"]
fn scenario_no_data_tile_is_reported_as_skipped_full_size() {
    unsegmentable_no_data_tile(3000, 1000);
}

// ---------------------------------------------------------------------------
// Determinism and cleanup
// ---------------------------------------------------------------------------

#[test]
fn worker_count_does_not_change_the_output() {
    let scene = two_rectangles(200, 400);
    let mut outputs = Vec::new();
    for workers in [1, 4, 16] {
        let output = scene.output(&format!("clumps-{}.tif", workers));
        let cfg = PipelineConfig {
            workers,
            ..config(100)
        };
        Orchestrator::new().run(&scene.input, &output, &cfg).unwrap();
        outputs.push(std::fs::read(&output).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], outputs[2]);
}

#[test]
fn empty_grid_leaves_nothing_behind() {
    let scene = Scene::new(50, 50, |_, _| 0.0);
    let root = tempfile::tempdir().unwrap();
    let cfg = PipelineConfig {
        tmp_dir: Some(root.path().to_path_buf()),
        ..config(25)
    };

    let err = Orchestrator::new()
        .run(&scene.input, &scene.output("clumps.tif"), &cfg)
        .unwrap_err();

    assert!(matches!(err, PipelineError::EmptyGrid { .. }), "{:?}", err);
    assert!(entries(root.path()).is_empty());
    assert!(!scene.output("clumps.tif").exists());
}

#[test]
fn caller_tmp_dir_keeps_its_own_files() {
    let scene = two_rectangles(100, 100);
    let root = tempfile::tempdir().unwrap();
    let marker = root.path().join("keep.me");
    std::fs::write(&marker, b"mine").unwrap();
    let cfg = PipelineConfig {
        tmp_dir: Some(root.path().to_path_buf()),
        ..small(50)
    };

    let summary = Orchestrator::new()
        .run(&scene.input, &scene.output("clumps.tif"), &cfg)
        .unwrap();

    assert_eq!(entries(root.path()), vec![marker]);
    assert!(!root.path().join(&summary.run_id).exists());
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

#[test]
fn transitions_are_reported_in_order() {
    let scene = two_rectangles(100, 200);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = {
        let seen = seen.clone();
        Orchestrator::new().on_transition(move |state| seen.lock().unwrap().push(state))
    };
    orchestrator
        .run(&scene.input, &scene.output("clumps.tif"), &small(50))
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&PipelineState::Prepared));
    assert_eq!(seen.last(), Some(&PipelineState::Finalized));
    assert_eq!(seen.len(), 11);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn cancelled_run_stops_and_cleans_up() {
    let scene = two_rectangles(100, 200);
    let root = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let cfg = PipelineConfig {
        tmp_dir: Some(root.path().to_path_buf()),
        ..small(50)
    };

    let err = Orchestrator::new()
        .with_cancellation(token)
        .run(&scene.input, &scene.output("clumps.tif"), &cfg)
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled), "{:?}", err);
    assert!(entries(root.path()).is_empty());
}

#[test]
fn every_tile_timing_out_is_no_valid_tiles() {
    let scene = two_rectangles(100, 200);
    let cfg = PipelineConfig {
        tile_timeout: Some(Duration::from_nanos(1)),
        ..small(50)
    };

    let err = Orchestrator::new()
        .run(&scene.input, &scene.output("clumps.tif"), &cfg)
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoValidTiles { failed: 8 }), "{:?}", err);
    // Per-tile failures are still logged
    assert!(error_log_path(&scene.output("clumps.tif")).exists());
}

#[test]
fn band_subset_beyond_the_input_is_rejected() {
    let scene = two_rectangles(20, 20);
    let cfg = PipelineConfig {
        segmentation: SegmentationParams {
            band_subset: Some(vec![1, 2]),
            ..Default::default()
        },
        ..config(10)
    };
    let err = Orchestrator::new()
        .run(&scene.input, &scene.output("clumps.tif"), &cfg)
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidConfig(_)), "{:?}", err);
}

#[test]
fn mean_image_holds_clump_means() {
    let scene = two_rectangles(100, 200);
    let means = scene.output("means.tif");
    let cfg = PipelineConfig {
        mean_image: Some(means.clone()),
        ..small(50)
    };
    let summary = Orchestrator::new()
        .run(&scene.input, &scene.output("clumps.tif"), &cfg)
        .unwrap();
    assert_eq!(summary.mean_image.as_deref(), Some(means.as_path()));

    let image = GeoTiffBackend::new().read(&means).unwrap();
    approx::assert_relative_eq!(image.data()[[0, 10, 10]], 100.0);
    approx::assert_relative_eq!(image.data()[[0, 10, 190]], 200.0);
}
