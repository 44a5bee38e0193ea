//! Common fixtures for the integration suites: a minimal median-split LBVH
//! builder and a brute-force overlap reference.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::Rng;
use ropewalk::prelude::*;

/// Build a median-split LBVH with skip ropes over primitive AABBs, in the
/// linear layout traversal expects: internal nodes first (preorder), leaves
/// after, leaf `i` holding primitive `i`.
pub fn build_lbvh(prims: &[Aabb]) -> Lbvh {
    let n = prims.len();
    if n == 0 {
        return Lbvh::empty();
    }
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
        // preorder numbering fixes the right child's index before it is built
        let right_idx = if b - mid == 1 { n_internal + mid } else { idx + (mid - a) };
        let l = build(prims, a, mid, right_idx as i32, next_internal, n_internal, lo, hi, left, rope);
        let r = build(prims, mid, b, rope_to, next_internal, n_internal, lo, hi, left, rope);
        assert_eq!(r, right_idx);
        left[idx] = l as i32;
        rope[idx] = rope_to;
        lo[idx] = lo[l].min(lo[r]);
        hi[idx] = hi[l].max(hi[r]);
        idx
    }

    let mut next_internal = 0;
    let root = build(
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
    assert_eq!(root, 0);

    Lbvh::from_parts(0, lo, hi, left, rope, (0..n as i32).collect()).unwrap()
}

/// The four-corner fixture: unit-ish spheres at the corners of a 2x2 square
/// in the z = 0 plane.
#[allow(dead_code)]
pub fn corner_tree() -> (Vec<Aabb>, Lbvh) {
    let prims: Vec<Aabb> = [
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(2.0, 0.0, 0.0),
        Vec3::new(0.0, 2.0, 0.0),
        Vec3::new(2.0, 2.0, 0.0),
    ]
    .iter()
    .map(|&c| Aabb::from_sphere(c, 0.5))
    .collect();
    let tree = build_lbvh(&prims);
    (prims, tree)
}

/// Random primitive boxes inside `[-extent, extent]^3`.
#[allow(dead_code)]
pub fn random_boxes(rng: &mut StdRng, n: usize, extent: f32, max_half_width: f32) -> Vec<Aabb> {
    (0..n)
        .map(|_| {
            let center = Vec3::new(
                rng.gen_range(-extent..extent),
                rng.gen_range(-extent..extent),
                rng.gen_range(-extent..extent),
            );
            let half = Vec3::new(
                rng.gen_range(0.0..max_half_width),
                rng.gen_range(0.0..max_half_width),
                rng.gen_range(0.0..max_half_width),
            );
            Aabb::new(center - half, center + half)
        })
        .collect()
}

/// Sphere-vs-AABB overlap, matching the traversal test.
#[allow(dead_code)]
pub fn sphere_hits_box(center: Vec3, radius: f32, b: &Aabb) -> bool {
    let nearest = center.clamp(b.lo, b.hi);
    (nearest - center).length_squared() <= radius * radius
}

/// Every `(primitive, image)` pair whose translated sphere overlaps the
/// primitive's exact (uncompressed) AABB. The compressed traversal must
/// report a superset of these.
#[allow(dead_code)]
pub fn brute_force_sphere(
    prims: &[Aabb],
    center: Vec3,
    radius: f32,
    images: &ImageListOp,
) -> Vec<(usize, usize)> {
    let mut hits = Vec::new();
    for img in 0..images.size() {
        let c = center + images.shift(img);
        for (p, b) in prims.iter().enumerate() {
            if sphere_hits_box(c, radius, b) {
                hits.push((p, img));
            }
        }
    }
    hits
}
