//! Integration tests chaining the primitive, border tracking and merging
//! over hand-cut tiles of a synthetic scene.
//!
//! The scene is 40×80, left half 100 and right half 200, with a no-data hole
//! in the top-left corner. It is cut into two 40×40 tiles side by side.

use tiledseg_algorithms::prelude::*;
use tiledseg_core::io::{read_band, write_band};

fn scene() -> MultiBandRaster {
    let mut image = MultiBandRaster::new(1, 40, 80, DataType::U8);
    image.set_transform(GeoTransform::new(500_000.0, 7_000_000.0, 30.0, -30.0));
    for ((_, r, c), v) in image.data_mut().indexed_iter_mut() {
        *v = if r < 5 && c < 5 {
            0.0
        } else if c < 40 {
            100.0
        } else {
            200.0
        };
    }
    image
}

fn params() -> SegmentationParams {
    SegmentationParams {
        num_clusters: 4,
        min_pixels: 10,
        sampling: 10,
        ..Default::default()
    }
}

fn tiles(image: &MultiBandRaster) -> Vec<MultiBandRaster> {
    vec![
        image.window(&Window::new(0, 0, 40, 40)).unwrap(),
        image.window(&Window::new(0, 40, 40, 40)).unwrap(),
    ]
}

// ---------------------------------------------------------------------------
// Primitive
// ---------------------------------------------------------------------------

#[test]
fn constant_tiles_become_single_clumps() {
    let image = scene();
    for tile in tiles(&image) {
        let out = ShepherdSegmenter
            .segment_derive(&tile, &params(), &Uninterrupted)
            .unwrap();
        assert_eq!(max_id(&out.clumps), 1);
        assert_eq!(out.clumps.count_where(|v| v == 1), tile.valid_count());
    }
}

// ---------------------------------------------------------------------------
// Borders and merging
// ---------------------------------------------------------------------------

#[test]
fn seam_clumps_are_borders_and_merge_is_disjoint() {
    let image = scene();
    let valid = image.valid_mask();

    let mut composite: Raster<u32> = valid.with_same_meta();
    let mut borders: Raster<u8> = valid.with_same_meta();

    let outputs: Vec<Raster<u32>> = tiles(&image)
        .iter()
        .map(|t| {
            ShepherdSegmenter
                .segment_derive(t, &params(), &Uninterrupted)
                .unwrap()
                .clumps
        })
        .collect();

    let tracker = BorderTracker::within(&valid);
    let masks: Vec<Raster<u8>> = outputs
        .iter()
        .map(|c| tracker.border_mask(c).unwrap())
        .collect();

    let total = merge_clumps(&mut composite, &outputs).unwrap();
    merge_borders(&mut borders, &masks).unwrap();

    assert_eq!(total, 2);
    // Every valid pixel is covered exactly once, no-data stays 0
    for ((r, c), &id) in composite.data().indexed_iter() {
        assert_eq!(id > 0, valid.get(r, c).unwrap() == 1, "pixel ({}, {})", r, c);
    }
    // Both tiles' clumps touch the seam at column 40
    assert_eq!(borders.get(20, 39).unwrap(), 1);
    assert_eq!(borders.get(20, 40).unwrap(), 1);
}

#[test]
fn clump_rasters_survive_the_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("1.clumps");
    let backend = GeoTiffBackend::new();

    let tile = &tiles(&scene())[1];
    let clumps = ShepherdSegmenter
        .segment_derive(tile, &params(), &Uninterrupted)
        .unwrap()
        .clumps;

    let (_, table) = BorderTracker::new().track(&clumps).unwrap();
    write_band(&backend, &path, &clumps).unwrap();
    backend.write_attribute_table(&path, &table).unwrap();

    let back: Raster<u32> = read_band(&backend, &path).unwrap();
    assert_eq!(back.data(), clumps.data());
    assert_eq!(back.transform(), clumps.transform());
    assert_eq!(backend.read_attribute_table(&path).unwrap(), table);
}
