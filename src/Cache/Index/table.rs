// Key -> record handle map living in a segment.

use crate::Cache::Key::TaggedKey;
use crate::Core::layout::IndexRoot;
use crate::Core::Segment;
use std::marker::PhantomData;

/// Buckets a fresh table starts with.
pub const INITIAL_BUCKETS: usize = 16;

/// Seed for key hashing. Part of the segment layout: every process must
/// hash a key to the same bucket.
pub const HASH_SEED: u64 = 0x5254_425f_4b45_5953;

/// One slot of the open-addressing table.
///
/// `handle == 0` marks an empty bucket (offset 0 is inside the segment
/// header, so no record lives there). The full hash is kept so growing the
/// table and shifting entries on removal never re-hash keys.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Bucket<P> {
    pub handle: u64,
    pub hash: u64,
    pub key: P,
}

/// View of one index of a segment.
///
/// Linear probing over a power-of-two table of [`Bucket`]s kept at most 3/4
/// full, with backward-shift deletion so there are no tombstones. The
/// table is reached through the index root in the segment header on every
/// call; nothing is cached across calls, since another process may have
/// grown (and moved) the table in between.
///
/// Keys are unique: no two occupied buckets hold equal keys.
pub struct Index<'s, P: TaggedKey> {
    pub(crate) segment: &'s Segment,
    pub(crate) root: *mut IndexRoot,
    pub(crate) _key: PhantomData<P>,
}
