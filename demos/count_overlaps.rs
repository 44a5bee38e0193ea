//! Count overlapping primitives for a batch of sphere queries, on the CPU
//! reference path and (when an adapter is present) on the GPU.
//!
//! ```sh
//! cargo run --example count_overlaps --release
//! ```

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

fn main() {
    const N: usize = 50_000;
    const EXTENT: f32 = 60.0;

    let prims = generate_boxes(N, EXTENT);
    let tree = build_lbvh(&prims);
    println!(
        "tree: {} primitives, {} nodes ({} B compressed)",
        tree.primitive_count(),
        tree.node_count(),
        tree.node_count() * 16
    );

    // one query sphere per primitive, as in a neighbor-list pass
    let mut query = SphereQuery::new();
    for b in &prims {
        query.push((b.lo + b.hi) * 0.5, 2.0);
    }

    let compressed = compress(&tree, &NullTransformOp);
    let mut cpu_out = CountOp::new();
    let start = std::time::Instant::now();
    traverse(&compressed, &query, &SelfOp, &mut cpu_out).unwrap();
    let total: u64 = cpu_out.counts().iter().map(|&c| c as u64).sum();
    println!(
        "cpu: {} overlaps in {:.2?} ({:.1} per query)",
        total,
        start.elapsed(),
        total as f64 / N as f64
    );

    #[cfg(feature = "gpu")]
    match LbvhTraverser::new() {
        Ok(mut traverser) => {
            let mut gpu_out = CountOp::new();
            let start = std::time::Instant::now();
            traverser.traverse(&mut gpu_out, &query, &tree).unwrap();
            gpu_out.download(traverser.context()).unwrap();
            let gpu_total: u64 = gpu_out.counts().iter().map(|&c| c as u64).sum();
            println!("gpu: {} overlaps in {:.2?}", gpu_total, start.elapsed());
            let mismatches = gpu_out
                .counts()
                .iter()
                .zip(cpu_out.counts())
                .filter(|(g, c)| g != c)
                .count();
            println!("gpu vs cpu: {} mismatching queries", mismatches);
        }
        Err(e) => println!("gpu: unavailable ({})", e),
    }
}
