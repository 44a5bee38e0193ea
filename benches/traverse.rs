//! CPU vs GPU traversal benchmark.
//!
//! Compares the rayon reference path against the wgpu kernels across batch
//! sizes to locate the dispatch-overhead crossover. The GPU side times
//! launch plus synchronization and is skipped when no adapter is present.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use glam::Vec3;
use ropewalk::prelude::*;

/// Deterministic pseudo-random primitive boxes.
fn generate_boxes(count: usize, extent: f32) -> Vec<Aabb> {
    (0..count)
        .map(|i| {
            let t = i as f32;
            let center = Vec3::new(
                (t * 12.9898).sin() * extent,
                (t * 78.233).sin() * extent,
                (t * 37.719).sin() * extent,
            );
            Aabb::from_sphere(center, 0.5)
        })
        .collect()
}

/// Median-split LBVH with skip ropes over the boxes.
fn build_lbvh(prims: &[Aabb]) -> Lbvh {
    let n = prims.len();
    let n_internal = n - 1;
    let n_nodes = 2 * n - 1;
    let mut lo = vec![Vec3::ZERO; n_nodes];
    let mut hi = vec![Vec3::ZERO; n_nodes];
    let mut left = vec![LBVH_SENTINEL; n_nodes];
    let mut rope = vec![LBVH_SENTINEL; n_nodes];

    fn build(
        prims: &[Aabb],
        a: usize,
        b: usize,
        rope_to: i32,
        next_internal: &mut usize,
        n_internal: usize,
        lo: &mut [Vec3],
        hi: &mut [Vec3],
        left: &mut [i32],
        rope: &mut [i32],
    ) -> usize {
        if b - a == 1 {
            let idx = n_internal + a;
            lo[idx] = prims[a].lo;
            hi[idx] = prims[a].hi;
            rope[idx] = rope_to;
            return idx;
        }
        let idx = *next_internal;
        *next_internal += 1;
        let mid = (a + b) / 2;
        let right_idx = if b - mid == 1 { n_internal + mid } else { idx + (mid - a) };
        let l = build(prims, a, mid, right_idx as i32, next_internal, n_internal, lo, hi, left, rope);
        build(prims, mid, b, rope_to, next_internal, n_internal, lo, hi, left, rope);
        left[idx] = l as i32;
        rope[idx] = rope_to;
        lo[idx] = lo[l].min(lo[right_idx]);
        hi[idx] = hi[l].max(hi[right_idx]);
        idx
    }

    let mut next_internal = 0;
    build(
        prims,
        0,
        n,
        LBVH_SENTINEL,
        &mut next_internal,
        n_internal,
        &mut lo,
        &mut hi,
        &mut left,
        &mut rope,
    );
    Lbvh::from_parts(0, lo, hi, left, rope, (0..n as i32).collect()).unwrap()
}

fn sphere_queries(count: usize, extent: f32) -> SphereQuery {
    let mut query = SphereQuery::new();
    for i in 0..count {
        let t = i as f32 + 0.5;
        query.push(
            Vec3::new(
                (t * 93.989).sin() * extent,
                (t * 47.230).sin() * extent,
                (t * 11.135).sin() * extent,
            ),
            1.0,
        );
    }
    query
}

fn bench_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("traverse");

    #[cfg(feature = "gpu")]
    let gpu = GpuContext::new().ok();

    for &n in &[1_000usize, 10_000, 100_000] {
        let prims = generate_boxes(n, 40.0);
        let tree = build_lbvh(&prims);
        let compressed = compress(&tree, &NullTransformOp);
        let query = sphere_queries(n, 40.0);
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("cpu", n), &n, |b, _| {
            b.iter(|| {
                let mut out = CountOp::new();
                traverse(&compressed, &query, &SelfOp, &mut out).unwrap();
                black_box(out.counts()[0])
            })
        });

        #[cfg(feature = "gpu")]
        if let Some(ctx) = &gpu {
            let mut traverser = LbvhTraverser::with_context(ctx.clone());
            traverser.set_autotuner_params(false, u32::MAX);
            traverser.setup(&tree).unwrap();
            group.bench_with_input(BenchmarkId::new("gpu", n), &n, |b, _| {
                b.iter(|| {
                    let mut out = CountOp::new();
                    traverser.traverse(&mut out, &query, &tree).unwrap();
                    ctx.sync();
                    black_box(());
                })
            });
        }
    }

    group.finish();
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compress");

    for &n in &[10_000usize, 100_000] {
        let prims = generate_boxes(n, 40.0);
        let tree = build_lbvh(&prims);
        group.throughput(Throughput::Elements((2 * n - 1) as u64));
        group.bench_with_input(BenchmarkId::new("cpu", n), &n, |b, _| {
            b.iter(|| black_box(compress(&tree, &NullTransformOp).node_count()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_traversal, bench_compression);
criterion_main!(benches);
