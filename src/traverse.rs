//! Stackless rope traversal of a compressed LBVH (reference CPU path).
//!
//! Each query walks the tree without a stack: descend to the left child when
//! an internal node overlaps, otherwise follow the skip rope. Leaves emit
//! one hit per overlapping image and then follow their rope too. A node
//! reached through a rope is never revisited, so a walk takes at most one
//! step per node.
//!
//! Queries are independent, so the batch runs on a rayon pool with one
//! account per query and commits in index order.

use rayon::prelude::*;

use crate::compress::CompressedLbvh;
use crate::ops::{OutputOp, QueryOp, TranslateOp};
use crate::tree::LBVH_SENTINEL;
use crate::Error;

/// Hard cap on the image count, from the 32-bit active-image mask.
pub const MAX_IMAGES: usize = 32;

/// Walk one query through the tree, reporting hits into `account`.
///
/// The active-image mask is primed against the root volume; an image that
/// misses the root can never hit a descendant and is dropped for the whole
/// walk. Returns the number of nodes visited.
pub(crate) fn walk<Q: QueryOp, T: TranslateOp, O: OutputOp>(
    tree: &CompressedLbvh,
    query: &Q,
    images: &T,
    out: &O,
    index: usize,
    account: &mut O::Account,
) -> u32 {
    let volume = query.setup(index);

    let mut active: u32 = 0;
    for i in 0..images.size() {
        let translated = query.translate(volume, images.shift(i));
        if query.overlap(translated, tree.lo(), tree.hi()) {
            active |= 1 << i;
        }
    }
    if active == 0 {
        return 0;
    }

    let mut visited = 0;
    let mut node = tree.root();
    while node != LBVH_SENTINEL {
        visited += 1;
        let n = tree.nodes()[node as usize];
        let (lo, hi) = tree.decode(&n);
        let leaf = n.is_leaf();

        let mut hit = false;
        let mut bits = active;
        while bits != 0 {
            let i = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            let translated = query.translate(volume, images.shift(i));
            if query.overlap(translated, lo, hi) {
                hit = true;
                if leaf {
                    out.process(account, n.primitive(), i);
                }
            }
        }

        node = if hit && !leaf { n.left_child() } else { n.rope() };
    }
    visited
}

/// Traverse the tree for every query across every image.
///
/// Reports each primitive whose compressed AABB overlaps a translated query
/// volume, once per overlapping image. Empty trees, empty query batches, and
/// empty image sets are silent no-ops; more than [`MAX_IMAGES`] images is an
/// error raised before any work starts.
pub fn traverse<Q, T, O>(tree: &CompressedLbvh, query: &Q, images: &T, out: &mut O) -> Result<(), Error>
where
    Q: QueryOp + Sync,
    T: TranslateOp + Sync,
    O: OutputOp + Sync,
{
    if tree.node_count() == 0 || query.size() == 0 || images.size() == 0 {
        return Ok(());
    }
    if images.size() > MAX_IMAGES {
        return Err(Error::TooManyImages(images.size()));
    }

    out.prepare(query.size());
    let shared: &O = out;
    let accounts: Vec<O::Account> = (0..query.size())
        .into_par_iter()
        .map(|q| {
            let mut account = O::Account::default();
            walk(tree, query, images, shared, q, &mut account);
            account
        })
        .collect();
    for (q, account) in accounts.into_iter().enumerate() {
        out.commit(q, account);
    }
    Ok(())
}
