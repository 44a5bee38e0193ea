//! Input LBVH view and bounding-box primitives.
//!
//! The tree itself is produced by an external builder (e.g. a Morton-code
//! LBVH constructor). This module defines the host-side handover format:
//! per-node bounds, left-child links, skip ropes, and per-leaf primitive
//! indices, in the usual linear layout where the internal nodes occupy the
//! front of the array and the leaves the back.

use glam::Vec3;

use crate::Error;

/// Rope value marking the end of traversal.
///
/// A rope either points at the next node to visit when descent is not taken,
/// or holds this sentinel to terminate the walk.
pub const LBVH_SENTINEL: i32 = i32::MIN;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Lower corner.
    pub lo: Vec3,
    /// Upper corner.
    pub hi: Vec3,
}

impl Aabb {
    /// Create an AABB from its corners.
    #[inline]
    pub fn new(lo: Vec3, hi: Vec3) -> Self {
        Aabb { lo, hi }
    }

    /// Create an empty (inverted) AABB.
    #[inline]
    pub fn empty() -> Self {
        Aabb {
            lo: Vec3::splat(f32::INFINITY),
            hi: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    /// AABB of a sphere.
    #[inline]
    pub fn from_sphere(center: Vec3, radius: f32) -> Self {
        Aabb {
            lo: center - Vec3::splat(radius),
            hi: center + Vec3::splat(radius),
        }
    }

    /// Expand to include a point.
    #[inline]
    pub fn expand_point(&mut self, point: Vec3) {
        self.lo = self.lo.min(point);
        self.hi = self.hi.max(point);
    }

    /// Smallest AABB enclosing both boxes.
    #[inline]
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }

    /// True if `other` lies entirely inside this box (componentwise).
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.lo.cmple(other.lo).all() && self.hi.cmpge(other.hi).all()
    }
}

/// Host-side view of a built LBVH.
///
/// For `n` primitives the tree has `2n - 1` nodes: internal nodes at indices
/// `[0, n - 1)` and leaves at `[n - 1, 2n - 1)`. Leaf `i` corresponds to
/// primitive `primitive[i - (n - 1)]`. The `left` entry of a leaf is unused;
/// ropes chain siblings and end at [`LBVH_SENTINEL`].
#[derive(Debug, Clone, Default)]
pub struct Lbvh {
    root: i32,
    lo: Vec<Vec3>,
    hi: Vec<Vec3>,
    left: Vec<i32>,
    rope: Vec<i32>,
    primitive: Vec<i32>,
}

impl Lbvh {
    /// Tree with no primitives. Compression and traversal treat it as a no-op.
    pub fn empty() -> Self {
        Lbvh::default()
    }

    /// Assemble a tree from builder output.
    ///
    /// `lo`, `hi`, `left`, and `rope` must all have `2 * primitive.len() - 1`
    /// entries (or all be empty), and `root` must index a node.
    pub fn from_parts(
        root: i32,
        lo: Vec<Vec3>,
        hi: Vec<Vec3>,
        left: Vec<i32>,
        rope: Vec<i32>,
        primitive: Vec<i32>,
    ) -> Result<Self, Error> {
        let n = primitive.len();
        let n_nodes = if n == 0 { 0 } else { 2 * n - 1 };
        if lo.len() != n_nodes || hi.len() != n_nodes {
            return Err(Error::MalformedTree("bounds arrays must hold one AABB per node"));
        }
        if left.len() != n_nodes || rope.len() != n_nodes {
            return Err(Error::MalformedTree("link arrays must hold one entry per node"));
        }
        if n_nodes > 0 && !(0..n_nodes as i32).contains(&root) {
            return Err(Error::MalformedTree("root is not a node index"));
        }
        Ok(Lbvh {
            root,
            lo,
            hi,
            left,
            rope,
            primitive,
        })
    }

    /// Number of primitives.
    #[inline]
    pub fn primitive_count(&self) -> usize {
        self.primitive.len()
    }

    /// Number of internal nodes (`primitives - 1`, or 0 for an empty tree).
    #[inline]
    pub fn internal_count(&self) -> usize {
        self.primitive.len().saturating_sub(1)
    }

    /// Total number of nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.lo.len()
    }

    /// Root node index.
    #[inline]
    pub fn root(&self) -> i32 {
        self.root
    }

    /// True if `node` indexes a leaf.
    #[inline]
    pub fn is_leaf(&self, node: usize) -> bool {
        node >= self.internal_count()
    }

    /// Per-node lower bounds.
    #[inline]
    pub fn lo(&self) -> &[Vec3] {
        &self.lo
    }

    /// Per-node upper bounds.
    #[inline]
    pub fn hi(&self) -> &[Vec3] {
        &self.hi
    }

    /// Per-node left-child indices (valid for internal nodes only).
    #[inline]
    pub fn left(&self) -> &[i32] {
        &self.left
    }

    /// Per-node skip ropes.
    #[inline]
    pub fn rope(&self) -> &[i32] {
        &self.rope
    }

    /// Per-leaf primitive indices.
    #[inline]
    pub fn primitive(&self) -> &[i32] {
        &self.primitive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_union_and_contains() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(0.5), Vec3::splat(2.0));
        let u = a.union(&b);
        assert_eq!(u.lo, Vec3::ZERO);
        assert_eq!(u.hi, Vec3::splat(2.0));
        assert!(u.contains(&a));
        assert!(u.contains(&b));
        assert!(!a.contains(&b));
    }

    #[test]
    fn single_leaf_tree() {
        let b = Aabb::from_sphere(Vec3::ZERO, 1.0);
        let tree = Lbvh::from_parts(
            0,
            vec![b.lo],
            vec![b.hi],
            vec![LBVH_SENTINEL],
            vec![LBVH_SENTINEL],
            vec![7],
        )
        .unwrap();
        assert_eq!(tree.primitive_count(), 1);
        assert_eq!(tree.internal_count(), 0);
        assert_eq!(tree.node_count(), 1);
        assert!(tree.is_leaf(0));
    }

    #[test]
    fn mismatched_arrays_rejected() {
        let err = Lbvh::from_parts(
            0,
            vec![Vec3::ZERO],
            vec![Vec3::ONE, Vec3::ONE],
            vec![0],
            vec![0],
            vec![0],
        );
        assert!(err.is_err());
    }
}
