// The generic cache: one record store plus one unique index per key shape,
// all inside one segment and guarded by the segment's reader/writer lock.

use super::Index::{describe_key, initial_table_bytes, Index, IndexSet, PRIMARY_SLOT};
use super::Key::{ProjectFrom, TaggedKey};
use super::Store::{RecordStore, StoredRecord};
use crate::config::CacheConfig;
use crate::Core::alloc::{class_block_size, size_class};
use crate::Core::layout::{BLOCK_ALIGN, MAX_INDEXES};
use crate::Core::{SchemaLayout, Segment};
use crate::error::{CacheError, CacheResult, SegmentAttachError};
use crate::Structs::{Flat, Handle};
use sha2::{Digest, Sha256};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use tracing::trace;

/// A multi-process cache of `T` records keyed by `K`.
///
/// `K` is the full key; it is unique and stored with every record. `X` adds
/// unique secondary indexes over projections of `K` (a tuple of key types, or
/// `()` for none). Records are reachable through every index at all times:
/// each operation either completes on all of them or changes nothing.
///
/// Reads take the shared lock and copy values out; writes take the
/// exclusive lock. A write is visible to every process attached to the same
/// segment as soon as the call returns.
///
/// `Ok(false)` and empty results are the normal "duplicate key" and "not
/// found" outcomes. `Err` means the segment is unusable (corrupt or full).
pub struct EntityCache<T: Flat, K: TaggedKey, X: IndexSet<K> = ()> {
    segment: Segment,
    _schema: PhantomData<fn() -> (T, K, X)>,
}

impl<T: Flat, K: TaggedKey, X: IndexSet<K>> EntityCache<T, K, X> {
    /// Identity and footprint of this cache's segment layout.
    pub fn layout() -> Result<SchemaLayout, SegmentAttachError> {
        let record_size = RecordStore::<K, T>::record_size();
        let record_align = align_of::<StoredRecord<K, T>>();
        let bucket_align = align_of::<super::Index::Bucket<K>>().max(X::max_align());
        if record_align > BLOCK_ALIGN || bucket_align > BLOCK_ALIGN {
            return Err(SegmentAttachError::UnsupportedLayout {
                reason: format!(
                    "record alignment {} / key alignment {} exceeds {}",
                    record_align, bucket_align, BLOCK_ALIGN
                ),
            });
        }
        let index_count = 1 + X::COUNT;
        if index_count > MAX_INDEXES {
            return Err(SegmentAttachError::UnsupportedLayout {
                reason: format!("{} indexes, at most {} supported", index_count, MAX_INDEXES),
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(b"rtb-datacache/entity");
        hasher.update(type_name::<T>().as_bytes());
        hasher.update((size_of::<T>() as u64).to_le_bytes());
        hasher.update((align_of::<T>() as u64).to_le_bytes());
        describe_key::<K>(&mut hasher);
        X::describe(&mut hasher);

        let record_block = size_class(record_size).map(class_block_size).unwrap_or(usize::MAX);
        Ok(SchemaLayout {
            fingerprint: hasher.finalize().into(),
            record_size,
            index_count,
            min_data_bytes: initial_table_bytes::<K>()
                .saturating_add(X::initial_bytes())
                .saturating_add(record_block),
        })
    }

    /// Attach to the shared segment named by `config`.
    ///
    /// Fails fast: a process that cannot attach gets an error here rather
    /// than a cache that always comes back empty.
    pub fn open(config: &CacheConfig) -> CacheResult<Self> {
        let segment = Segment::attach(config, &Self::layout()?)?;
        Self::from_segment(segment)
    }

    /// A cache over private memory, same semantics minus the sharing.
    pub fn in_process(capacity: usize) -> CacheResult<Self> {
        let segment = Segment::in_process(capacity, &Self::layout()?)?;
        Self::from_segment(segment)
    }

    fn from_segment(segment: Segment) -> CacheResult<Self> {
        if segment.is_creator() {
            let created = {
                let _guard = segment.write_lock();
                unsafe {
                    Index::<K>::create(&segment, PRIMARY_SLOT).and_then(|_| X::create_all(&segment))
                }
            };
            if let Err(e) = created {
                segment.abandon();
                return Err(e);
            }
            segment.publish();
        }
        Ok(Self {
            segment,
            _schema: PhantomData,
        })
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    fn slot_of<P: TaggedKey>() -> Option<usize> {
        if TypeId::of::<P>() == TypeId::of::<K>() {
            Some(PRIMARY_SLOT)
        } else {
            X::slot_of::<P>()
        }
    }

    /// Copy out the record at `handle`, checking it is the one `expected`
    /// says it is.
    fn load(
        store: &RecordStore<'_, K, T>,
        handle: Handle,
        expected: impl FnOnce(&K) -> bool,
    ) -> CacheResult<StoredRecord<K, T>> {
        let record = store.get(handle)?;
        if !expected(&record.key) {
            return Err(CacheError::corruption(format!(
                "index entry {:#x} points at the record of {:?}",
                handle.offset(),
                record.key
            )));
        }
        Ok(record)
    }

    /// Records whose key projects to `key`.
    ///
    /// With `P` = `K`, or a key type `X` indexes, this is an exact lookup
    /// returning zero or one record. Any other projection of `K` is answered
    /// by scanning the primary index and may return several.
    pub fn retrieve<P: ProjectFrom<K>>(&self, key: &P) -> CacheResult<Vec<T>> {
        let _guard = self.segment.read_lock();
        let store = unsafe { RecordStore::<K, T>::attach(&self.segment) };

        if let Some(slot) = Self::slot_of::<P>() {
            let index = unsafe { Index::<P>::attach(&self.segment, slot)? };
            return match index.find(key)? {
                Some(handle) => {
                    let record = Self::load(&store, handle, |k| P::project_from(k) == *key)?;
                    Ok(vec![record.value])
                }
                None => {
                    trace!(segment = self.name(), ?key, "retrieve: not found");
                    Ok(Vec::new())
                }
            };
        }

        let index = unsafe { Index::<K>::attach(&self.segment, PRIMARY_SLOT)? };
        let mut values = Vec::new();
        for (full, handle) in index.find_all()? {
            if P::project_from(&full) == *key {
                values.push(Self::load(&store, handle, |k| *k == full)?.value);
            }
        }
        Ok(values)
    }

    /// Every record, in no particular order.
    pub fn retrieve_all(&self) -> CacheResult<Vec<T>> {
        Ok(self
            .retrieve_entries()?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Every record with its full key, in no particular order.
    pub fn retrieve_entries(&self) -> CacheResult<Vec<(K, T)>> {
        let _guard = self.segment.read_lock();
        let store = unsafe { RecordStore::<K, T>::attach(&self.segment) };
        let index = unsafe { Index::<K>::attach(&self.segment, PRIMARY_SLOT)? };

        index
            .find_all()?
            .into_iter()
            .map(|(key, handle)| -> CacheResult<(K, T)> {
                let record = Self::load(&store, handle, |k| *k == key)?;
                Ok((key, record.value))
            })
            .collect()
    }

    /// Add `value` under `key`.
    ///
    /// Returns `false` and changes nothing if `key`, or any indexed
    /// projection of it, is already taken.
    pub fn insert(&self, key: K, value: T) -> CacheResult<bool> {
        let _guard = self.segment.write_lock();
        let store = unsafe { RecordStore::<K, T>::attach(&self.segment) };
        let primary = unsafe { Index::<K>::attach(&self.segment, PRIMARY_SLOT)? };

        if primary.find(&key)?.is_some() || unsafe { X::conflicts(&self.segment, &key, None)? } {
            trace!(segment = self.name(), ?key, "insert: key conflict");
            return Ok(false);
        }

        // Grow tables first: past this point only the record allocation can
        // run out of space, and it happens before anything is linked.
        primary.reserve(1)?;
        unsafe { X::reserve_all(&self.segment, 1)? };

        let handle = store.put(key, value)?;
        if !primary.insert(key, handle)? {
            return Err(CacheError::corruption(format!(
                "primary index took {:?} during insert",
                key
            )));
        }
        unsafe { X::insert_all(&self.segment, &key, handle)? };
        Ok(true)
    }

    /// Overwrite the value under `key` in place. Returns `false` if absent.
    pub fn update(&self, key: &K, value: T) -> CacheResult<bool> {
        let _guard = self.segment.write_lock();
        let store = unsafe { RecordStore::<K, T>::attach(&self.segment) };
        let primary = unsafe { Index::<K>::attach(&self.segment, PRIMARY_SLOT)? };

        let handle = match primary.find(key)? {
            Some(handle) => handle,
            None => {
                trace!(segment = self.name(), ?key, "update: not found");
                return Ok(false);
            }
        };
        Self::load(&store, handle, |k| k == key)?;
        store.overwrite(handle, *key, value)?;
        Ok(true)
    }

    /// Overwrite the value under `old` and move it to `new`.
    ///
    /// Returns `false` if `old` is absent, or if `new` differs from `old`
    /// and it (or an indexed projection of it) belongs to another record. A
    /// rejected call leaves the record under `old` untouched.
    pub fn update_key(&self, old: &K, value: T, new: K) -> CacheResult<bool> {
        let _guard = self.segment.write_lock();
        let store = unsafe { RecordStore::<K, T>::attach(&self.segment) };
        let primary = unsafe { Index::<K>::attach(&self.segment, PRIMARY_SLOT)? };

        let handle = match primary.find(old)? {
            Some(handle) => handle,
            None => {
                trace!(segment = self.name(), key = ?old, "update_key: not found");
                return Ok(false);
            }
        };
        Self::load(&store, handle, |k| k == old)?;

        let moving = new != *old;
        if moving
            && (primary.find(&new)?.is_some()
                || unsafe { X::conflicts(&self.segment, &new, Some(handle))? })
        {
            trace!(segment = self.name(), from = ?old, to = ?new, "update_key: key conflict");
            return Ok(false);
        }

        store.overwrite(handle, new, value)?;
        if moving {
            if !primary.rekey(old, new)? {
                return Err(CacheError::corruption(format!(
                    "primary index could not move {:?} to {:?}",
                    old, new
                )));
            }
            unsafe { X::rekey_all(&self.segment, old, &new)? };
        }
        Ok(true)
    }

    /// Drop the record under `key`. Returns `false` if absent.
    pub fn remove(&self, key: &K) -> CacheResult<bool> {
        let _guard = self.segment.write_lock();
        let store = unsafe { RecordStore::<K, T>::attach(&self.segment) };
        let primary = unsafe { Index::<K>::attach(&self.segment, PRIMARY_SLOT)? };

        let handle = match primary.find(key)? {
            Some(handle) => handle,
            None => {
                trace!(segment = self.name(), ?key, "remove: not found");
                return Ok(false);
            }
        };
        Self::load(&store, handle, |k| k == key)?;

        primary.take(key)?;
        unsafe { X::remove_all(&self.segment, key)? };
        store.erase(handle)?;
        Ok(true)
    }

    /// Number of records.
    pub fn len(&self) -> CacheResult<usize> {
        let _guard = self.segment.read_lock();
        let store = unsafe { RecordStore::<K, T>::attach(&self.segment) };
        Ok(store.len() as usize)
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Walk every index and record and check they agree.
    ///
    /// Each index must hold exactly one entry per record, pointing at a
    /// record whose key matches, and the allocator must account for exactly
    /// the records plus one table per index.
    pub fn verify(&self) -> CacheResult<()> {
        let _guard = self.segment.read_lock();
        let store = unsafe { RecordStore::<K, T>::attach(&self.segment) };
        let primary = unsafe { Index::<K>::attach(&self.segment, PRIMARY_SLOT)? };

        let mut records: HashMap<Handle, K> = HashMap::with_capacity(primary.len());
        for (key, handle) in primary.find_all()? {
            Self::load(&store, handle, |k| *k == key)?;
            if records.insert(handle, key).is_some() {
                return Err(CacheError::corruption(format!(
                    "record {:#x} is indexed under two keys",
                    handle.offset()
                )));
            }
        }
        if records.len() as u64 != store.len() {
            return Err(CacheError::corruption(format!(
                "primary index holds {} entries, store counts {} records",
                records.len(),
                store.len()
            )));
        }

        unsafe { X::verify_all(&self.segment, &records)? };

        let blocks = self.segment.allocator().live_blocks();
        let expected = store.len() + 1 + X::COUNT as u64;
        if blocks != expected {
            return Err(CacheError::corruption(format!(
                "{} live blocks, expected {} ({} records + {} index tables)",
                blocks,
                expected,
                store.len(),
                1 + X::COUNT
            )));
        }
        Ok(())
    }
}

impl<T: Flat, K: TaggedKey, X: IndexSet<K>> std::fmt::Debug for EntityCache<T, K, X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("record", &type_name::<T>())
            .field("key", &type_name::<K>())
            .field("segment", &self.segment)
            .finish()
    }
}
