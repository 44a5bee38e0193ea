//! Image translation operations.

use glam::Vec3;

/// A set of rigid translations ("images") applied to every query volume.
///
/// The tree itself knows nothing about periodic boundary conditions; callers
/// encode them as image vectors. Image 0 is always the untranslated volume.
/// Traversal tracks the overlapping images of a query in a 32-bit mask, so a
/// set may hold at most 32 images.
pub trait TranslateOp {
    /// Number of images, including the untranslated one.
    fn size(&self) -> usize;

    /// Translation vector of image `index`.
    fn shift(&self, index: usize) -> Vec3;
}

/// Only the untranslated volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfOp;

impl TranslateOp for SelfOp {
    #[inline]
    fn size(&self) -> usize {
        1
    }

    #[inline]
    fn shift(&self, _index: usize) -> Vec3 {
        Vec3::ZERO
    }
}

/// The untranslated volume plus an explicit list of additional translations.
///
/// Image 0 is the identity; image `i` applies `images[i - 1]`. For 3D
/// periodic boundary conditions the list holds the up-to-26 neighboring cell
/// offsets.
#[derive(Debug, Clone, Default)]
pub struct ImageListOp {
    images: Vec<Vec3>,
}

impl ImageListOp {
    /// Build from the additional translations.
    pub fn new(images: &[Vec3]) -> Self {
        ImageListOp {
            images: images.to_vec(),
        }
    }

    /// Append a translation.
    pub fn push(&mut self, image: Vec3) {
        self.images.push(image);
    }
}

impl TranslateOp for ImageListOp {
    #[inline]
    fn size(&self) -> usize {
        1 + self.images.len()
    }

    #[inline]
    fn shift(&self, index: usize) -> Vec3 {
        if index == 0 {
            Vec3::ZERO
        } else {
            self.images[index - 1]
        }
    }
}
