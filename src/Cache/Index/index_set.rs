// Projection indexes kept next to the primary index of a cache.

use super::table::{Bucket, Index, INITIAL_BUCKETS};
use crate::Cache::Key::{ProjectFrom, TaggedKey};
use crate::Core::alloc::{class_block_size, size_class};
use crate::Core::Segment;
use crate::error::{CacheError, CacheResult};
use crate::Structs::Handle;
use sha2::{Digest, Sha256};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::mem::{align_of, size_of};

/// Slot of the primary (full key) index.
pub const PRIMARY_SLOT: usize = 0;

/// Feed the identity of key type `P` into a schema fingerprint.
pub fn describe_key<P: TaggedKey>(hasher: &mut Sha256) {
    hasher.update(type_name::<P>().as_bytes());
    hasher.update((size_of::<P>() as u64).to_le_bytes());
    hasher.update((align_of::<P>() as u64).to_le_bytes());
    for tag in P::TAGS {
        hasher.update(tag.as_bytes());
        hasher.update([0u8]);
    }
}

/// Allocator bytes an empty table for `P` takes.
pub fn initial_table_bytes<P: TaggedKey>() -> usize {
    size_class(Index::<P>::table_bytes(INITIAL_BUCKETS))
        .map(class_block_size)
        .unwrap_or(usize::MAX)
}

/// A set of secondary indexes over projections of the full key `K`.
///
/// Implemented for `()` (no secondary index) and for tuples of up to three
/// key types that each project from `K`. Element `i` of the tuple lives in
/// index slot `i + 1`. Every index in the set is unique, like the primary.
///
/// The `unsafe` methods require the segment lock: read mode for lookups,
/// write mode for everything that changes an index.
pub trait IndexSet<K: TaggedKey>: 'static {
    /// Number of secondary indexes.
    const COUNT: usize;

    fn describe(hasher: &mut Sha256);

    /// Largest bucket alignment among the secondary key types.
    fn max_align() -> usize;

    /// Allocator bytes the empty tables take.
    fn initial_bytes() -> usize;

    /// Index slot holding keys of type `P`, if `P` is in the set.
    fn slot_of<P: TaggedKey>() -> Option<usize>;

    unsafe fn create_all(segment: &Segment) -> CacheResult<()>;

    /// Whether any projection of `key` is held by a record other than `owner`.
    unsafe fn conflicts(segment: &Segment, key: &K, owner: Option<Handle>) -> CacheResult<bool>;

    unsafe fn reserve_all(segment: &Segment, additional: usize) -> CacheResult<()>;

    unsafe fn insert_all(segment: &Segment, key: &K, handle: Handle) -> CacheResult<()>;

    unsafe fn remove_all(segment: &Segment, key: &K) -> CacheResult<()>;

    unsafe fn rekey_all(segment: &Segment, old: &K, new: &K) -> CacheResult<()>;

    /// Check every secondary entry against the live records (`handle -> full key`).
    unsafe fn verify_all(segment: &Segment, records: &HashMap<Handle, K>) -> CacheResult<()>;
}

impl<K: TaggedKey> IndexSet<K> for () {
    const COUNT: usize = 0;

    fn describe(_hasher: &mut Sha256) {}

    fn max_align() -> usize {
        1
    }

    fn initial_bytes() -> usize {
        0
    }

    fn slot_of<P: TaggedKey>() -> Option<usize> {
        None
    }

    unsafe fn create_all(_segment: &Segment) -> CacheResult<()> {
        Ok(())
    }

    unsafe fn conflicts(_segment: &Segment, _key: &K, _owner: Option<Handle>) -> CacheResult<bool> {
        Ok(false)
    }

    unsafe fn reserve_all(_segment: &Segment, _additional: usize) -> CacheResult<()> {
        Ok(())
    }

    unsafe fn insert_all(_segment: &Segment, _key: &K, _handle: Handle) -> CacheResult<()> {
        Ok(())
    }

    unsafe fn remove_all(_segment: &Segment, _key: &K) -> CacheResult<()> {
        Ok(())
    }

    unsafe fn rekey_all(_segment: &Segment, _old: &K, _new: &K) -> CacheResult<()> {
        Ok(())
    }

    unsafe fn verify_all(_segment: &Segment, _records: &HashMap<Handle, K>) -> CacheResult<()> {
        Ok(())
    }
}

/// Check one secondary index against the live records.
unsafe fn verify_projection<K: TaggedKey, P: ProjectFrom<K>>(
    segment: &Segment,
    slot: usize,
    records: &HashMap<Handle, K>,
) -> CacheResult<()> {
    let entries = Index::<P>::attach(segment, slot)?.find_all()?;
    if entries.len() != records.len() {
        return Err(CacheError::corruption(format!(
            "index {} holds {} entries for {} records",
            slot,
            entries.len(),
            records.len()
        )));
    }
    for (projected, handle) in entries {
        match records.get(&handle) {
            Some(full) if P::project_from(full) == projected => {}
            Some(full) => {
                return Err(CacheError::corruption(format!(
                    "index {} maps {:?} to the record of {:?}",
                    slot, projected, full
                )))
            }
            None => {
                return Err(CacheError::corruption(format!(
                    "index {} maps {:?} to {:#x}, which is not a live record",
                    slot,
                    projected,
                    handle.offset()
                )))
            }
        }
    }
    Ok(())
}

macro_rules! impl_index_set {
    ($count:expr; $($P:ident => $slot:expr),+) => {
        impl<K: TaggedKey, $($P: ProjectFrom<K>),+> IndexSet<K> for ($($P,)+) {
            const COUNT: usize = $count;

            fn describe(hasher: &mut Sha256) {
                $(describe_key::<$P>(hasher);)+
            }

            fn max_align() -> usize {
                let mut align = 1;
                $(align = align.max(align_of::<Bucket<$P>>());)+
                align
            }

            fn initial_bytes() -> usize {
                0 $(+ initial_table_bytes::<$P>())+
            }

            fn slot_of<Q: TaggedKey>() -> Option<usize> {
                $(
                    if TypeId::of::<Q>() == TypeId::of::<$P>() {
                        return Some($slot);
                    }
                )+
                None
            }

            unsafe fn create_all(segment: &Segment) -> CacheResult<()> {
                $(Index::<$P>::create(segment, $slot)?;)+
                Ok(())
            }

            unsafe fn conflicts(segment: &Segment, key: &K, owner: Option<Handle>) -> CacheResult<bool> {
                $(
                    let projected = <$P as ProjectFrom<K>>::project_from(key);
                    if let Some(found) = Index::<$P>::attach(segment, $slot)?.find(&projected)? {
                        if Some(found) != owner {
                            return Ok(true);
                        }
                    }
                )+
                Ok(false)
            }

            unsafe fn reserve_all(segment: &Segment, additional: usize) -> CacheResult<()> {
                $(Index::<$P>::attach(segment, $slot)?.reserve(additional)?;)+
                Ok(())
            }

            unsafe fn insert_all(segment: &Segment, key: &K, handle: Handle) -> CacheResult<()> {
                $(
                    let projected = <$P as ProjectFrom<K>>::project_from(key);
                    if !Index::<$P>::attach(segment, $slot)?.insert(projected, handle)? {
                        return Err(CacheError::corruption(format!(
                            "index {} already holds {:?}",
                            $slot, projected
                        )));
                    }
                )+
                Ok(())
            }

            unsafe fn remove_all(segment: &Segment, key: &K) -> CacheResult<()> {
                $(
                    let projected = <$P as ProjectFrom<K>>::project_from(key);
                    if !Index::<$P>::attach(segment, $slot)?.remove(&projected)? {
                        return Err(CacheError::corruption(format!(
                            "index {} has no entry for {:?}",
                            $slot, projected
                        )));
                    }
                )+
                Ok(())
            }

            unsafe fn rekey_all(segment: &Segment, old: &K, new: &K) -> CacheResult<()> {
                $(
                    let from = <$P as ProjectFrom<K>>::project_from(old);
                    let to = <$P as ProjectFrom<K>>::project_from(new);
                    if from != to && !Index::<$P>::attach(segment, $slot)?.rekey(&from, to)? {
                        return Err(CacheError::corruption(format!(
                            "index {} could not move {:?} to {:?}",
                            $slot, from, to
                        )));
                    }
                )+
                Ok(())
            }

            unsafe fn verify_all(segment: &Segment, records: &HashMap<Handle, K>) -> CacheResult<()> {
                $(verify_projection::<K, $P>(segment, $slot, records)?;)+
                Ok(())
            }
        }
    };
}

impl_index_set!(1; A => 1);
impl_index_set!(2; A => 1, B => 2);
impl_index_set!(3; A => 1, B => 2, C => 3);
