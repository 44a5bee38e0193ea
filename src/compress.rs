//! Conservative 10-bit compression of an LBVH into the traversal format.
//!
//! The root AABB is discretized into 1024 bins per axis and every node's
//! bounds are snapped onto that grid: lower bounds round down, upper bounds
//! round up. Decompression therefore always yields a box enclosing the
//! original node, at the cost of occasional false-positive overlaps about
//! one bin wide.
//!
//! This module is the reference (CPU) implementation; the GPU compression
//! kernel performs the identical arithmetic with one thread per node.

use glam::{UVec3, Vec3};

use crate::node::{CompressedNode, BIN_COUNT, BIN_MAX};
use crate::ops::TransformOp;
use crate::tree::{Lbvh, LBVH_SENTINEL};

/// A compressed LBVH: dense nodes plus the three root scalars needed to
/// decode them.
#[derive(Debug, Clone, Default)]
pub struct CompressedLbvh {
    root: i32,
    nodes: Vec<CompressedNode>,
    lo: Vec3,
    hi: Vec3,
    bin: Vec3,
}

impl CompressedLbvh {
    pub(crate) fn new(root: i32, nodes: Vec<CompressedNode>, lo: Vec3, hi: Vec3, bin: Vec3) -> Self {
        CompressedLbvh { root, nodes, lo, hi, bin }
    }

    /// Root node index, or [`LBVH_SENTINEL`] for an empty tree.
    #[inline]
    pub fn root(&self) -> i32 {
        self.root
    }

    /// The compressed nodes.
    #[inline]
    pub fn nodes(&self) -> &[CompressedNode] {
        &self.nodes
    }

    /// Number of nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Lower bound of the root AABB.
    #[inline]
    pub fn lo(&self) -> Vec3 {
        self.lo
    }

    /// Upper bound of the root AABB.
    #[inline]
    pub fn hi(&self) -> Vec3 {
        self.hi
    }

    /// Bin width per axis.
    #[inline]
    pub fn bin(&self) -> Vec3 {
        self.bin
    }

    /// Node storage size in bytes.
    #[inline]
    pub fn memory_bytes(&self) -> usize {
        self.nodes.len() * std::mem::size_of::<CompressedNode>()
    }

    /// Decode a node's bounds back into floats.
    ///
    /// A lower bin decodes to its lower edge and an upper bin to its upper
    /// edge, so the result encloses the node's original AABB.
    #[inline]
    pub fn decode(&self, node: &CompressedNode) -> (Vec3, Vec3) {
        let lo = self.lo + node.lo_bin().as_vec3() * self.bin;
        let hi = self.lo + (node.hi_bin() + UVec3::ONE).as_vec3() * self.bin;
        (lo, hi)
    }
}

/// Bin width along one axis, widened so the top bin edge decodes at or past
/// the root's upper bound even after rounding.
fn conservative_bin(lo0: f32, hi0: f32) -> f32 {
    let mut bin = (hi0 - lo0) / BIN_COUNT as f32;
    while lo0 + BIN_COUNT as f32 * bin < hi0 {
        bin = bin.next_up();
    }
    bin
}

/// Snap one axis of a node's bounds onto the root grid.
///
/// Returns `(lo_bin, hi_bin)` with the fix-up steps applied so that the
/// decoded interval `[lo0 + lo_bin*bin, lo0 + (hi_bin+1)*bin]` contains
/// `[lo, hi]`. A zero-width axis collapses to bin 0.
fn quantize_axis(lo: f32, hi: f32, lo0: f32, bin: f32) -> (u32, u32) {
    if bin == 0.0 {
        return (0, 0);
    }

    let mut lo_bin = ((lo - lo0) / bin).floor().clamp(0.0, BIN_MAX as f32) as i32;
    while lo_bin > 0 && lo0 + lo_bin as f32 * bin > lo {
        lo_bin -= 1;
    }

    let mut hi_bin = (((hi - lo0) / bin).ceil() - 1.0).clamp(0.0, BIN_MAX as f32) as i32;
    hi_bin = hi_bin.max(lo_bin);
    while hi_bin < BIN_MAX as i32 && lo0 + (hi_bin + 1) as f32 * bin < hi {
        hi_bin += 1;
    }

    (lo_bin as u32, hi_bin as u32)
}

fn quantize(lo: Vec3, hi: Vec3, lo0: Vec3, bin: Vec3) -> (UVec3, UVec3) {
    let x = quantize_axis(lo.x, hi.x, lo0.x, bin.x);
    let y = quantize_axis(lo.y, hi.y, lo0.y, bin.y);
    let z = quantize_axis(lo.z, hi.z, lo0.z, bin.z);
    (UVec3::new(x.0, y.0, z.0), UVec3::new(x.1, y.1, z.1))
}

/// Compress a tree, caching `transform(primitive)` in each leaf.
///
/// Runs once per node; the output is deterministic for a fixed input, so
/// repeated compressions of the same tree are byte-identical.
pub fn compress<T: TransformOp>(tree: &Lbvh, transform: &T) -> CompressedLbvh {
    if tree.primitive_count() == 0 {
        return CompressedLbvh {
            root: LBVH_SENTINEL,
            ..CompressedLbvh::default()
        };
    }

    let root = tree.root() as usize;
    let lo0 = tree.lo()[root];
    let hi0 = tree.hi()[root];
    let bin = Vec3::new(
        conservative_bin(lo0.x, hi0.x),
        conservative_bin(lo0.y, hi0.y),
        conservative_bin(lo0.z, hi0.z),
    );

    let n_internal = tree.internal_count();
    let nodes = (0..tree.node_count())
        .map(|i| {
            let (lo_bin, hi_bin) = quantize(tree.lo()[i], tree.hi()[i], lo0, bin);
            let z = if i >= n_internal {
                !transform.transform(tree.primitive()[i - n_internal])
            } else {
                tree.left()[i]
            };
            CompressedNode::pack(lo_bin, hi_bin, z, tree.rope()[i])
        })
        .collect();

    CompressedLbvh {
        root: tree.root(),
        nodes,
        lo: lo0,
        hi: hi0,
        bin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{MapTransformOp, NullTransformOp};
    use crate::tree::Aabb;

    fn leaf_tree(boxes: &[Aabb], root_box: Aabb) -> Lbvh {
        // two-primitive fixture: internal root, two leaves
        assert_eq!(boxes.len(), 2);
        Lbvh::from_parts(
            0,
            vec![root_box.lo, boxes[0].lo, boxes[1].lo],
            vec![root_box.hi, boxes[0].hi, boxes[1].hi],
            vec![1, LBVH_SENTINEL, LBVH_SENTINEL],
            vec![LBVH_SENTINEL, 2, LBVH_SENTINEL],
            vec![0, 1],
        )
        .unwrap()
    }

    #[test]
    fn empty_tree_compresses_to_nothing() {
        let c = compress(&Lbvh::empty(), &NullTransformOp);
        assert_eq!(c.node_count(), 0);
        assert_eq!(c.root(), LBVH_SENTINEL);
    }

    #[test]
    fn root_spans_the_full_grid() {
        let a = Aabb::new(Vec3::splat(-1.0), Vec3::splat(0.0));
        let b = Aabb::new(Vec3::splat(0.0), Vec3::splat(3.0));
        let tree = leaf_tree(&[a, b], a.union(&b));
        let c = compress(&tree, &NullTransformOp);

        let root = &c.nodes()[0];
        assert_eq!(root.lo_bin(), UVec3::ZERO);
        assert_eq!(root.hi_bin(), UVec3::splat(BIN_MAX));
        let (lo, hi) = c.decode(root);
        assert!(lo.cmple(Vec3::splat(-1.0)).all());
        assert!(hi.cmpge(Vec3::splat(3.0)).all());
    }

    #[test]
    fn decoded_nodes_contain_originals() {
        let a = Aabb::new(Vec3::new(0.1, 0.2, 0.3), Vec3::new(0.4, 0.5, 0.6));
        let b = Aabb::new(Vec3::new(2.0, 1.0, 7.0), Vec3::new(3.0, 1.5, 9.0));
        let tree = leaf_tree(&[a, b], a.union(&b));
        let c = compress(&tree, &NullTransformOp);

        for (i, node) in c.nodes().iter().enumerate() {
            let (lo, hi) = c.decode(node);
            assert!(lo.cmple(tree.lo()[i]).all(), "node {} lower bound", i);
            assert!(hi.cmpge(tree.hi()[i]).all(), "node {} upper bound", i);
            assert!(node.hi_bin().cmpge(node.lo_bin()).all());
        }
    }

    #[test]
    fn zero_width_axis_collapses_without_nan() {
        // all boxes flat in z
        let a = Aabb::new(Vec3::new(0.0, 0.0, 5.0), Vec3::new(1.0, 1.0, 5.0));
        let b = Aabb::new(Vec3::new(2.0, 0.0, 5.0), Vec3::new(3.0, 1.0, 5.0));
        let tree = leaf_tree(&[a, b], a.union(&b));
        let c = compress(&tree, &NullTransformOp);

        assert_eq!(c.bin().z, 0.0);
        for node in c.nodes() {
            assert_eq!(node.lo_bin().z, 0);
            assert_eq!(node.hi_bin().z, 0);
            let (lo, hi) = c.decode(node);
            assert_eq!(lo.z, 5.0);
            assert_eq!(hi.z, 5.0);
        }
    }

    #[test]
    fn leaves_cache_the_transformed_primitive() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0));
        let tree = leaf_tree(&[a, b], a.union(&b));
        let map = MapTransformOp::new(vec![40, 50]);
        let c = compress(&tree, &map);

        assert!(!c.nodes()[0].is_leaf());
        assert_eq!(c.nodes()[0].left_child(), 1);
        assert!(c.nodes()[1].is_leaf());
        assert_eq!(c.nodes()[1].primitive(), 40);
        assert_eq!(c.nodes()[2].primitive(), 50);
        assert_eq!(c.nodes()[1].rope(), 2);
        assert_eq!(c.nodes()[2].rope(), LBVH_SENTINEL);
    }

    #[test]
    fn compression_is_deterministic() {
        let a = Aabb::new(Vec3::new(0.13, 0.7, -2.4), Vec3::new(1.9, 2.2, 0.1));
        let b = Aabb::new(Vec3::new(-5.0, 1.0, 3.0), Vec3::new(-1.0, 4.0, 8.0));
        let tree = leaf_tree(&[a, b], a.union(&b));
        let first = compress(&tree, &NullTransformOp);
        let second = compress(&tree, &NullTransformOp);
        assert_eq!(first.nodes(), second.nodes());
        assert_eq!(first.bin(), second.bin());
    }
}
