//! # ropewalk
//!
//! Massive AABB overlap queries over a compressed linear BVH, traversed
//! stacklessly along skip ropes.
//!
//! A built LBVH is compressed into 16 bytes per node: the node bounds are
//! snapped onto a 1024-bin grid spanning the root AABB (conservatively, so
//! decoded boxes always enclose the originals), and the left-child/rope
//! links are packed alongside. Thousands of independent queries then walk
//! the tree without per-thread stacks — descend on overlap, follow the rope
//! otherwise — which maps directly onto one GPU thread per query.
//!
//! ## Features
//!
//! - **Compression**: 10-bit conservative AABB quantization, 16 B/node
//! - **Traversal**: stackless skip-rope walk with a 32-image bitmask for
//!   periodic boundary conditions
//! - **Polymorphic ops**: sphere/box queries, count/neighbor-list outputs,
//!   image translations, primitive transforms — monomorphised per
//!   combination
//! - **GPU path** (feature `gpu`, default): wgpu compute kernels with
//!   per-kernel block-size autotuning; the CPU path is the reference
//!   implementation of the same arithmetic
//!
//! ## Example
//!
//! ```rust
//! use glam::Vec3;
//! use ropewalk::prelude::*;
//!
//! // a one-primitive tree straight from a builder
//! let bounds = Aabb::from_sphere(Vec3::ZERO, 1.0);
//! let tree = Lbvh::from_parts(
//!     0,
//!     vec![bounds.lo],
//!     vec![bounds.hi],
//!     vec![LBVH_SENTINEL],
//!     vec![LBVH_SENTINEL],
//!     vec![0],
//! )
//! .unwrap();
//!
//! // compress, then count overlaps for one sphere query
//! let compressed = compress(&tree, &NullTransformOp);
//! let mut query = SphereQuery::new();
//! query.push(Vec3::new(0.5, 0.0, 0.0), 0.25);
//!
//! let mut out = CountOp::new();
//! traverse(&compressed, &query, &SelfOp, &mut out).unwrap();
//! assert_eq!(out.counts(), &[1]);
//! ```

#![warn(missing_docs)]

pub mod autotune;
pub mod compress;
pub mod node;
pub mod ops;
pub mod traverse;
pub mod tree;

#[cfg(feature = "gpu")]
pub mod gpu;

use thiserror::Error as ThisError;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors raised before any traversal work is issued.
///
/// Device-side failures are not wrapped here; they surface through the
/// device runtime at the next synchronization.
#[derive(Debug, ThisError)]
pub enum Error {
    /// More images than the 32-bit active-image mask can track.
    #[error("a maximum of 32 image vectors are supported, got {0}")]
    TooManyImages(usize),

    /// Builder output with inconsistent array lengths or an invalid root.
    #[error("malformed LBVH: {0}")]
    MalformedTree(&'static str),

    /// Device path failure.
    #[cfg(feature = "gpu")]
    #[error(transparent)]
    Gpu(#[from] gpu::GpuError),
}

/// Commonly used types and functions.
pub mod prelude {
    pub use crate::autotune::{Autotuner, AutotunerConfig};
    pub use crate::compress::{compress, CompressedLbvh};
    pub use crate::node::CompressedNode;
    pub use crate::ops::{
        BoxQuery, CountOp, ImageListOp, MapTransformOp, NeighborListOp, NullTransformOp, OutputOp,
        QueryOp, SelfOp, SphereQuery, TransformOp, TranslateOp,
    };
    pub use crate::traverse::{traverse, MAX_IMAGES};
    pub use crate::tree::{Aabb, Lbvh, LBVH_SENTINEL};
    pub use crate::Error;

    #[cfg(feature = "gpu")]
    pub use crate::gpu::{
        wgsl::{DeviceOutputOp, DeviceQueryOp, DeviceTransformOp, DeviceTranslateOp},
        GpuContext, GpuError, LbvhTraverser,
    };
}
