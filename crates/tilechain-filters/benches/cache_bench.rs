//! Benchmarks for the tile cache stage.
//!
//! Run with: `cargo bench -p tilechain-filters`

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use tilechain_core::{IRect, ISize, ScalarType, TileRequest};
use tilechain_filters::{CachingFilter, GeneratedSource, Pipeline, ScalarRemapFilter, StageId};

const EXTENT: u32 = 1024;

fn ramp_pipeline(tile: u32) -> (Pipeline, StageId) {
    let mut p = Pipeline::new();
    let src = GeneratedSource::new(ScalarType::U16, 1, IRect::from_size(EXTENT, EXTENT), |x, y, _| {
        ((x + y) % 4096 + 1) as f64
    });
    let src = p.add("ramp", src, &[]).unwrap();
    let cache = p
        .chain("cache", CachingFilter::new().with_tile_size(ISize::square(tile)), src)
        .unwrap();
    (p, cache)
}

/// Cold reads populate the cache; warm reads are served from it.
fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    let request = TileRequest::full_res(IRect::new(100, 100, 256, 256));
    group.throughput(Throughput::Elements(256 * 256));

    for tile in [64u32, 128, 256] {
        group.bench_with_input(BenchmarkId::new("cold", tile), &tile, |b, &tile| {
            let (mut p, cache) = ramp_pipeline(tile);
            b.iter(|| {
                p.configure::<CachingFilter>(cache, |f| f.flush()).unwrap();
                black_box(p.get_tile(cache, black_box(&request)).unwrap())
            })
        });

        group.bench_with_input(BenchmarkId::new("warm", tile), &tile, |b, &tile| {
            let (mut p, cache) = ramp_pipeline(tile);
            p.get_tile(cache, &request).unwrap();
            b.iter(|| black_box(p.get_tile(cache, black_box(&request)).unwrap()))
        });
    }

    group.finish();
}

/// Remapping behind a warm cache.
fn bench_remap(c: &mut Criterion) {
    let mut group = c.benchmark_group("remap");
    let request = TileRequest::full_res(IRect::from_size(256, 256));
    group.throughput(Throughput::Elements(256 * 256));

    for output in [ScalarType::U8, ScalarType::F32, ScalarType::NormalizedF32] {
        group.bench_with_input(BenchmarkId::new("u16_to", output.name()), &output, |b, &output| {
            let (mut p, cache) = ramp_pipeline(64);
            let remap = p.chain("remap", ScalarRemapFilter::new(output), cache).unwrap();
            p.get_tile(remap, &request).unwrap();
            b.iter(|| black_box(p.get_tile(remap, black_box(&request)).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cache, bench_remap);
criterion_main!(benches);
