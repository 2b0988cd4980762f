// Records inside a segment, one allocator block each.

use crate::Core::Segment;
use crate::error::{CacheError, CacheResult};
use crate::Structs::{Flat, Handle};
use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr;

/// What a record block holds: the full key next to the payload, so any
/// index can be re-derived from the record alone.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoredRecord<K, T> {
    pub key: K,
    pub value: T,
}

unsafe impl<K: Flat, T: Flat> Flat for StoredRecord<K, T> {}

/// View of the records of a segment.
///
/// Records are reached only through handles. Values are copied in and out;
/// no reference into the segment escapes a call. Handles are recycled after
/// `erase`, so a handle must not be used once it has been erased.
pub struct RecordStore<'s, K: Flat, T: Flat> {
    segment: &'s Segment,
    _record: PhantomData<StoredRecord<K, T>>,
}

impl<'s, K: Flat, T: Flat> RecordStore<'s, K, T> {
    /// # Safety
    /// Caller holds the segment lock for as long as the view is used: read
    /// mode for `get`, write mode for anything that mutates.
    pub unsafe fn attach(segment: &'s Segment) -> Self {
        Self {
            segment,
            _record: PhantomData,
        }
    }

    /// Bytes one record occupies inside its block.
    pub const fn record_size() -> usize {
        size_of::<StoredRecord<K, T>>()
    }

    /// Number of live records.
    pub fn len(&self) -> u64 {
        self.segment.record_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, handle: Handle) -> CacheResult<*mut StoredRecord<K, T>> {
        let ptr = self
            .segment
            .allocator()
            .payload(handle, Self::record_size())?;
        Ok(ptr as *mut StoredRecord<K, T>)
    }

    /// Store a new record and return its handle.
    pub fn put(&self, key: K, value: T) -> CacheResult<Handle> {
        let handle = self.segment.allocator().allocate(Self::record_size())?;
        let slot = self.slot(handle)?;
        unsafe { ptr::write_unaligned(slot, StoredRecord { key, value }) };
        self.segment.set_record_count(self.len() + 1);
        Ok(handle)
    }

    /// Copy out the record at `handle`.
    pub fn get(&self, handle: Handle) -> CacheResult<StoredRecord<K, T>> {
        let slot = self.slot(handle)?;
        Ok(unsafe { ptr::read_unaligned(slot) })
    }

    /// Replace the record at `handle` in place.
    pub fn overwrite(&self, handle: Handle, key: K, value: T) -> CacheResult<()> {
        let slot = self.slot(handle)?;
        unsafe { ptr::write_unaligned(slot, StoredRecord { key, value }) };
        Ok(())
    }

    /// Free the record at `handle`.
    pub fn erase(&self, handle: Handle) -> CacheResult<()> {
        let count = self.len();
        if count == 0 {
            return Err(CacheError::corruption(format!(
                "erasing record {:#x} from an empty store",
                handle.offset()
            )));
        }
        self.segment.allocator().deallocate(handle)?;
        self.segment.set_record_count(count - 1);
        Ok(())
    }
}
