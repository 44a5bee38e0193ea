//! Integration tests: compressed trees stay conservative.
//!
//! The decoded bounds of every node must contain the node's original AABB,
//! bins must stay on the 10-bit grid, and compression must be a pure
//! function of its input.

mod common;

use common::*;
use glam::{UVec3, Vec3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use ropewalk::prelude::*;

fn assert_conservative(tree: &Lbvh, compressed: &CompressedLbvh) {
    assert_eq!(compressed.node_count(), tree.node_count());
    for (i, node) in compressed.nodes().iter().enumerate() {
        assert!(node.lo_bin().cmple(UVec3::splat(1023)).all());
        assert!(node.hi_bin().cmple(UVec3::splat(1023)).all());
        assert!(node.hi_bin().cmpge(node.lo_bin()).all());

        let (lo, hi) = compressed.decode(node);
        assert!(
            lo.cmple(tree.lo()[i]).all(),
            "node {}: decoded lo {:?} exceeds original {:?}",
            i,
            lo,
            tree.lo()[i]
        );
        assert!(
            hi.cmpge(tree.hi()[i]).all(),
            "node {}: decoded hi {:?} under original {:?}",
            i,
            hi,
            tree.hi()[i]
        );
    }
}

#[test]
fn random_trees_stay_conservative() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..50 {
        let n = 1 + (round % 17) * 4;
        let prims = random_boxes(&mut rng, n, 50.0, 2.0);
        let tree = build_lbvh(&prims);
        let compressed = compress(&tree, &NullTransformOp);
        assert_conservative(&tree, &compressed);
    }
}

#[test]
fn root_node_spans_the_grid() {
    let mut rng = StdRng::seed_from_u64(7);
    let prims = random_boxes(&mut rng, 33, 10.0, 1.0);
    let tree = build_lbvh(&prims);
    let compressed = compress(&tree, &NullTransformOp);

    let root = &compressed.nodes()[tree.root() as usize];
    assert_eq!(root.lo_bin(), UVec3::ZERO);
    assert_eq!(root.hi_bin(), UVec3::splat(1023));
    assert_eq!(compressed.lo(), tree.lo()[0]);
    assert_eq!(compressed.hi(), tree.hi()[0]);
}

#[test]
fn single_primitive_leaf_is_the_root() {
    let prims = vec![Aabb::from_sphere(Vec3::new(3.0, -1.0, 2.0), 0.75)];
    let tree = build_lbvh(&prims);
    assert_eq!(tree.node_count(), 1);

    let compressed = compress(&tree, &NullTransformOp);
    let node = &compressed.nodes()[0];
    assert!(node.is_leaf());
    assert_eq!(node.primitive(), 0);
    assert_eq!(node.rope(), LBVH_SENTINEL);
    assert_eq!(node.lo_bin(), UVec3::ZERO);
    assert_eq!(node.hi_bin(), UVec3::splat(1023));
    assert_conservative(&tree, &compressed);
}

#[test]
fn repeated_compression_is_byte_identical() {
    let mut rng = StdRng::seed_from_u64(99);
    let prims = random_boxes(&mut rng, 40, 25.0, 3.0);
    let tree = build_lbvh(&prims);

    let first = compress(&tree, &NullTransformOp);
    let second = compress(&tree, &NullTransformOp);
    let a: &[u8] = bytemuck::cast_slice(first.nodes());
    let b: &[u8] = bytemuck::cast_slice(second.nodes());
    assert_eq!(a, b);
    assert_eq!(first.bin(), second.bin());
}

#[test]
fn degenerate_axis_has_zero_bin_width() {
    // everything in the z = 4 plane
    let prims: Vec<Aabb> = (0..9)
        .map(|i| {
            let c = Vec3::new(i as f32, (i * i % 5) as f32, 4.0);
            let mut b = Aabb::from_sphere(c, 0.3);
            b.lo.z = 4.0;
            b.hi.z = 4.0;
            b
        })
        .collect();
    let tree = build_lbvh(&prims);
    let compressed = compress(&tree, &NullTransformOp);

    assert_eq!(compressed.bin().z, 0.0);
    assert!(compressed.bin().x > 0.0);
    for node in compressed.nodes() {
        assert_eq!(node.lo_bin().z, 0);
        assert_eq!(node.hi_bin().z, 0);
    }
    assert_conservative(&tree, &compressed);
}

#[test]
fn transform_is_cached_per_leaf() {
    let mut rng = StdRng::seed_from_u64(11);
    let prims = random_boxes(&mut rng, 8, 5.0, 0.5);
    let tree = build_lbvh(&prims);
    let map = MapTransformOp::new((0..8).map(|i| 100 + i).collect());
    let compressed = compress(&tree, &map);

    for i in 0..tree.node_count() {
        let node = &compressed.nodes()[i];
        if i >= tree.internal_count() {
            assert!(node.is_leaf());
            let prim = (i - tree.internal_count()) as i32;
            assert_eq!(node.primitive(), 100 + prim);
        } else {
            assert!(!node.is_leaf());
        }
    }
}

#[test]
fn storage_is_sixteen_bytes_per_node() {
    let mut rng = StdRng::seed_from_u64(3);
    let prims = random_boxes(&mut rng, 21, 5.0, 0.5);
    let tree = build_lbvh(&prims);
    let compressed = compress(&tree, &NullTransformOp);
    assert_eq!(compressed.node_count(), 41);
    assert_eq!(compressed.memory_bytes(), 41 * 16);
}
