//! Query volume operations.

use glam::{DVec3, Vec3, Vec4, Vec4Swizzles};

/// A batch of search volumes and their overlap test.
///
/// `setup` produces a per-query token once per walk; `translate` shifts the
/// token by an image vector; `overlap` tests the shifted token against a
/// decompressed node AABB. All three run in the inner traversal loop, in
/// single precision.
pub trait QueryOp {
    /// Per-query setup token.
    type Volume: Copy + Send + Sync;

    /// Number of queries in the batch.
    fn size(&self) -> usize;

    /// Fetch the token for query `index`.
    fn setup(&self, index: usize) -> Self::Volume;

    /// Rigidly translate a token.
    fn translate(&self, volume: Self::Volume, shift: Vec3) -> Self::Volume;

    /// Does the volume overlap the AABB `[lo, hi]`?
    fn overlap(&self, volume: Self::Volume, lo: Vec3, hi: Vec3) -> bool;
}

/// Sphere volumes stored as `(center, radius)`.
#[derive(Debug, Clone, Default)]
pub struct SphereQuery {
    spheres: Vec<Vec4>,
}

impl SphereQuery {
    /// Empty batch.
    pub fn new() -> Self {
        SphereQuery::default()
    }

    /// Append a sphere.
    pub fn push(&mut self, center: Vec3, radius: f32) {
        self.spheres.push(center.extend(radius));
    }

    /// Append a double-precision sphere, narrowed conservatively.
    ///
    /// The center rounds to the nearest `f32`; the radius absorbs the
    /// rounding error and is then bumped by one ULP, so every overlap found
    /// in double precision is also found in single precision.
    pub fn push_f64(&mut self, center: DVec3, radius: f64) {
        let c = center.as_vec3();
        let err = (center - c.as_dvec3()).length();
        let r = ((radius + err) as f32).next_up();
        self.spheres.push(c.extend(r));
    }

    /// The raw `(center, radius)` records.
    pub fn spheres(&self) -> &[Vec4] {
        &self.spheres
    }
}

impl QueryOp for SphereQuery {
    type Volume = Vec4;

    #[inline]
    fn size(&self) -> usize {
        self.spheres.len()
    }

    #[inline]
    fn setup(&self, index: usize) -> Vec4 {
        self.spheres[index]
    }

    #[inline]
    fn translate(&self, volume: Vec4, shift: Vec3) -> Vec4 {
        (volume.xyz() + shift).extend(volume.w)
    }

    #[inline]
    fn overlap(&self, volume: Vec4, lo: Vec3, hi: Vec3) -> bool {
        let center = volume.xyz();
        let nearest = center.clamp(lo, hi);
        (nearest - center).length_squared() <= volume.w * volume.w
    }
}

/// Box volumes stored as `(lo, hi)` corner pairs.
#[derive(Debug, Clone, Default)]
pub struct BoxQuery {
    boxes: Vec<(Vec3, Vec3)>,
}

impl BoxQuery {
    /// Empty batch.
    pub fn new() -> Self {
        BoxQuery::default()
    }

    /// Append a box.
    pub fn push(&mut self, lo: Vec3, hi: Vec3) {
        self.boxes.push((lo, hi));
    }

    /// Append a double-precision box, narrowed conservatively.
    ///
    /// The lower corner rounds down and the upper corner rounds up, so the
    /// single-precision box always encloses the double-precision one.
    pub fn push_f64(&mut self, lo: DVec3, hi: DVec3) {
        let mut lo32 = lo.as_vec3();
        let mut hi32 = hi.as_vec3();
        for k in 0..3 {
            if lo32[k] as f64 > lo[k] {
                lo32[k] = lo32[k].next_down();
            }
            if (hi32[k] as f64) < hi[k] {
                hi32[k] = hi32[k].next_up();
            }
        }
        self.boxes.push((lo32, hi32));
    }

    /// The raw corner pairs.
    pub fn boxes(&self) -> &[(Vec3, Vec3)] {
        &self.boxes
    }
}

impl QueryOp for BoxQuery {
    type Volume = (Vec3, Vec3);

    #[inline]
    fn size(&self) -> usize {
        self.boxes.len()
    }

    #[inline]
    fn setup(&self, index: usize) -> (Vec3, Vec3) {
        self.boxes[index]
    }

    #[inline]
    fn translate(&self, volume: (Vec3, Vec3), shift: Vec3) -> (Vec3, Vec3) {
        (volume.0 + shift, volume.1 + shift)
    }

    #[inline]
    fn overlap(&self, volume: (Vec3, Vec3), lo: Vec3, hi: Vec3) -> bool {
        volume.0.cmple(hi).all() && volume.1.cmpge(lo).all()
    }
}
