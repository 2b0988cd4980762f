use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr;

use twox_hash::XxHash64;

use super::table::{Bucket, Index, HASH_SEED, INITIAL_BUCKETS};
use crate::Cache::Key::TaggedKey;
use crate::Core::Segment;
use crate::error::{CacheError, CacheResult};
use crate::Structs::Handle;

/// Hash of `key` as stored in buckets.
#[inline]
pub fn hash_key<P: Hash>(key: &P) -> u64 {
    let mut hasher = XxHash64::with_seed(HASH_SEED);
    key.hash(&mut hasher);
    hasher.finish()
}

/// Smallest table that keeps `entries` at or below 3/4 load.
#[inline]
fn buckets_for(entries: usize, current: usize) -> usize {
    let mut buckets = current.max(INITIAL_BUCKETS);
    while entries * 4 > buckets * 3 {
        buckets *= 2;
    }
    buckets
}

impl<'s, P: TaggedKey> Index<'s, P> {
    /// Bytes of the bucket array of a table with `buckets` buckets.
    pub fn table_bytes(buckets: usize) -> usize {
        buckets * size_of::<Bucket<P>>()
    }

    /// Lay out an empty table in index `slot`.
    ///
    /// # Safety
    /// Caller holds the write lock (or is the creator before publishing).
    pub unsafe fn create(segment: &'s Segment, slot: usize) -> CacheResult<Self> {
        let root = segment.index_root(slot)?;
        let table = segment.allocator().allocate(Self::table_bytes(INITIAL_BUCKETS))?;
        (*root).table = table.offset();
        (*root).buckets = INITIAL_BUCKETS as u64;
        (*root).len = 0;
        (*root).bucket_size = size_of::<Bucket<P>>() as u32;
        (*root).key_size = size_of::<P>() as u32;
        Ok(Self {
            segment,
            root,
            _key: PhantomData,
        })
    }

    /// View of the index in `slot`, checked against `P`'s layout.
    ///
    /// # Safety
    /// Caller holds the segment lock for as long as the view is used: read
    /// mode for lookups, write mode for anything that mutates.
    pub unsafe fn attach(segment: &'s Segment, slot: usize) -> CacheResult<Self> {
        let root = segment.index_root(slot)?;
        if (*root).key_size as usize != size_of::<P>()
            || (*root).bucket_size as usize != size_of::<Bucket<P>>()
        {
            return Err(CacheError::corruption(format!(
                "index {} stores {}-byte keys in {}-byte buckets, expected {} and {}",
                slot,
                (*root).key_size,
                (*root).bucket_size,
                size_of::<P>(),
                size_of::<Bucket<P>>()
            )));
        }
        Ok(Self {
            segment,
            root,
            _key: PhantomData,
        })
    }

    /// Number of keys in the index.
    pub fn len(&self) -> usize {
        unsafe { (*self.root).len as usize }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of buckets in the current table.
    pub fn bucket_count(&self) -> usize {
        unsafe { (*self.root).buckets as usize }
    }

    fn table(&self) -> CacheResult<(*mut Bucket<P>, usize)> {
        let (table, buckets) = unsafe { ((*self.root).table, (*self.root).buckets as usize) };
        if buckets == 0 || !buckets.is_power_of_two() {
            return Err(CacheError::corruption(format!(
                "index table has {} buckets",
                buckets
            )));
        }
        let base = self
            .segment
            .allocator()
            .payload(Handle::from_offset(table), Self::table_bytes(buckets))?;
        Ok((base as *mut Bucket<P>, buckets))
    }

    /// Bucket holding `key` (`Ok`) or the empty bucket where it would go (`Err`).
    fn probe(
        &self,
        base: *mut Bucket<P>,
        buckets: usize,
        key: &P,
        hash: u64,
    ) -> CacheResult<Result<usize, usize>> {
        let mask = buckets - 1;
        let mut idx = hash as usize & mask;
        for _ in 0..buckets {
            let bucket = unsafe { ptr::read(base.add(idx)) };
            if bucket.handle == 0 {
                return Ok(Err(idx));
            }
            if bucket.hash == hash && bucket.key == *key {
                return Ok(Ok(idx));
            }
            idx = (idx + 1) & mask;
        }
        Err(CacheError::corruption(
            "index table has no empty bucket".to_string(),
        ))
    }

    /// Handle stored under `key`.
    pub fn find(&self, key: &P) -> CacheResult<Option<Handle>> {
        let (base, buckets) = self.table()?;
        match self.probe(base, buckets, key, hash_key(key))? {
            Ok(idx) => Ok(Some(Handle::from_offset(unsafe { (*base.add(idx)).handle }))),
            Err(_) => Ok(None),
        }
    }

    /// Every (key, handle) pair, in table order.
    pub fn find_all(&self) -> CacheResult<Vec<(P, Handle)>> {
        let (base, buckets) = self.table()?;
        let mut entries = Vec::with_capacity(self.len());
        for idx in 0..buckets {
            let bucket = unsafe { ptr::read(base.add(idx)) };
            if bucket.handle != 0 {
                entries.push((bucket.key, Handle::from_offset(bucket.handle)));
            }
        }
        if entries.len() != self.len() {
            return Err(CacheError::corruption(format!(
                "index holds {} entries but records {}",
                entries.len(),
                self.len()
            )));
        }
        Ok(entries)
    }

    /// Add `key -> handle`. Returns `false` and changes nothing if `key`
    /// is already present.
    pub fn insert(&self, key: P, handle: Handle) -> CacheResult<bool> {
        if handle.is_null() {
            return Err(CacheError::corruption(
                "refusing to index the null handle".to_string(),
            ));
        }
        if self.find(&key)?.is_some() {
            return Ok(false);
        }
        self.reserve(1)?;

        let hash = hash_key(&key);
        let (base, buckets) = self.table()?;
        match self.probe(base, buckets, &key, hash)? {
            Ok(_) => Ok(false),
            Err(idx) => {
                unsafe {
                    ptr::write(
                        base.add(idx),
                        Bucket {
                            handle: handle.offset(),
                            hash,
                            key,
                        },
                    );
                    (*self.root).len += 1;
                }
                Ok(true)
            }
        }
    }

    /// Drop `key`. Returns `false` if it was not present.
    pub fn remove(&self, key: &P) -> CacheResult<bool> {
        Ok(self.take(key)?.is_some())
    }

    /// Drop `key` and return the handle it pointed at.
    pub fn take(&self, key: &P) -> CacheResult<Option<Handle>> {
        let (base, buckets) = self.table()?;
        let idx = match self.probe(base, buckets, key, hash_key(key))? {
            Ok(idx) => idx,
            Err(_) => return Ok(None),
        };
        let handle = unsafe { (*base.add(idx)).handle };

        // Backward shift: pull later members of the probe run into the hole
        // unless that would move them before their home bucket.
        let mask = buckets - 1;
        let mut hole = idx;
        let mut next = idx;
        unsafe {
            loop {
                next = (next + 1) & mask;
                let bucket = ptr::read(base.add(next));
                if bucket.handle == 0 {
                    break;
                }
                let home = bucket.hash as usize & mask;
                let from_home = next.wrapping_sub(home) & mask;
                let from_hole = next.wrapping_sub(hole) & mask;
                if from_home >= from_hole {
                    ptr::write(base.add(hole), bucket);
                    hole = next;
                }
            }
            ptr::write_bytes(base.add(hole), 0, 1);
            (*self.root).len -= 1;
        }
        Ok(Some(Handle::from_offset(handle)))
    }

    /// Move the entry under `old` to `new`.
    ///
    /// Returns `false` without any change if `old` is absent or `new` is
    /// held by another entry. Rekeying to the same key is a successful
    /// no-op. The table never holds both keys, nor neither, at any point a
    /// lock holder could observe.
    pub fn rekey(&self, old: &P, new: P) -> CacheResult<bool> {
        let handle = match self.find(old)? {
            Some(handle) => handle,
            None => return Ok(false),
        };
        if *old == new {
            return Ok(true);
        }
        if self.find(&new)?.is_some() {
            return Ok(false);
        }

        // Removing first frees a bucket, so the insert cannot need to grow.
        self.take(old)?;
        if !self.insert(new, handle)? {
            return Err(CacheError::corruption(
                "rekey target appeared during rekey".to_string(),
            ));
        }
        Ok(true)
    }

    /// Grow the table, if needed, so `additional` more keys fit under the
    /// load limit. On failure the index is unchanged.
    pub fn reserve(&self, additional: usize) -> CacheResult<()> {
        let current = self.bucket_count();
        let wanted = buckets_for(self.len() + additional, current);
        if wanted != current {
            self.rehash(wanted)?;
        }
        Ok(())
    }

    fn rehash(&self, new_buckets: usize) -> CacheResult<()> {
        let allocator = self.segment.allocator();
        let (old_base, old_buckets) = self.table()?;
        let old_table = unsafe { Handle::from_offset((*self.root).table) };

        let new_table = allocator.allocate(Self::table_bytes(new_buckets))?;
        let new_base = allocator.payload(new_table, Self::table_bytes(new_buckets))? as *mut Bucket<P>;

        let mask = new_buckets - 1;
        for idx in 0..old_buckets {
            let bucket = unsafe { ptr::read(old_base.add(idx)) };
            if bucket.handle == 0 {
                continue;
            }
            let mut slot = bucket.hash as usize & mask;
            unsafe {
                while (*new_base.add(slot)).handle != 0 {
                    slot = (slot + 1) & mask;
                }
                ptr::write(new_base.add(slot), bucket);
            }
        }

        unsafe {
            (*self.root).table = new_table.offset();
            (*self.root).buckets = new_buckets as u64;
        }
        allocator.deallocate(old_table)?;
        tracing::debug!(
            segment = self.segment.name(),
            from = old_buckets,
            to = new_buckets,
            "index table grown"
        );
        Ok(())
    }
}
