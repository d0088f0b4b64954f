//! Criterion benchmarks for the frame transform hot path.
//!
//! Every output frame passes through one of these transforms on a worker
//! thread, so per-frame cost bounds the sustainable frame rate per worker.
//!
//! Run with: cargo bench -p jf-transform --bench transform

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jf_core::{DetectorLayout, PixelDepth};
use jf_transform::Transform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn raw_frame(layout: &DetectorLayout, seed: u64) -> Vec<i16> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..layout.raw_frame_pixels())
        .map(|_| rng.gen_range(-200..4000))
        .collect()
}

fn corrected(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_corrected");

    for modules in [2usize, 8] {
        let layout = DetectorLayout::new(modules).unwrap();
        let source = raw_frame(&layout, 1);
        let mut words = vec![0u32; layout.composite_bytes(PixelDepth::Two) / 4];

        group.throughput(Throughput::Bytes(layout.raw_frame_bytes() as u64));
        group.bench_with_input(BenchmarkId::new("modules", modules), &modules, |b, _| {
            b.iter(|| {
                Transform::Corrected
                    .apply(&layout, &[black_box(&source)], bytemuck::cast_slice_mut(&mut words))
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn summed(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_summed");
    let layout = DetectorLayout::new(2).unwrap();

    for frames in [2u32, 4, 10] {
        let owned: Vec<Vec<i16>> = (0..frames).map(|i| raw_frame(&layout, u64::from(i))).collect();
        let sources: Vec<&[i16]> = owned.iter().map(Vec::as_slice).collect();
        let mut words = vec![0u32; layout.composite_bytes(PixelDepth::Four) / 4];

        group.throughput(Throughput::Bytes(layout.raw_frame_bytes() as u64 * u64::from(frames)));
        group.bench_with_input(BenchmarkId::new("frames", frames), &frames, |b, &frames| {
            b.iter(|| {
                Transform::Summed { frames }
                    .apply(&layout, black_box(&sources), bytemuck::cast_slice_mut(&mut words))
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, corrected, summed);
criterion_main!(benches);
