//! Benchmarks for the per-tile segmentation primitive

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tiledseg_algorithms::interrupt::Uninterrupted;
use tiledseg_algorithms::params::SegmentationParams;
use tiledseg_algorithms::segmentation::{ShepherdSegmenter, TileSegmenter};
use tiledseg_core::{DataType, GeoTransform, MultiBandRaster};

/// Three-band tile with smooth gradients and a few blocky patches
fn create_tile(size: usize) -> MultiBandRaster {
    let mut image = MultiBandRaster::new(3, size, size, DataType::U16);
    image.set_transform(GeoTransform::new(0.0, size as f64, 1.0, -1.0));
    for ((b, row, col), v) in image.data_mut().indexed_iter_mut() {
        let patch = ((row / 37) * 7 + (col / 23) * 13) % 11;
        let noise = ((row * 7 + col * 13 + b * 5) % 17) as f64;
        *v = 200.0 + (b as f64 + 1.0) * 40.0 * patch as f64 + noise;
    }
    image
}

fn bench_segment_derive(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmentation/derive");
    group.sample_size(10);
    let params = SegmentationParams {
        num_clusters: 30,
        sampling: 20,
        ..Default::default()
    };
    for size in [128, 256, 512] {
        let tile = create_tile(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                ShepherdSegmenter
                    .segment_derive(black_box(&tile), &params, &Uninterrupted)
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_segment_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmentation/reuse");
    group.sample_size(10);
    let params = SegmentationParams {
        num_clusters: 30,
        sampling: 20,
        ..Default::default()
    };
    for size in [128, 256, 512] {
        let tile = create_tile(size);
        let stats = ShepherdSegmenter
            .segment_derive(&tile, &params, &Uninterrupted)
            .unwrap()
            .stats;
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                ShepherdSegmenter
                    .segment_reuse(black_box(&tile), &stats, &params, &Uninterrupted)
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_segment_derive, bench_segment_reuse);
criterion_main!(benches);
