// A named block of memory holding one cache: header, allocator, records and
// indexes. Everything inside is addressed by offset from the segment start.

use super::alloc::SegmentAllocator;
use super::layout::*;
use super::rwlock::{ReadGuard, SharedRwLock, WriteGuard};
use super::SharedMemory::{
    attach_shared_memory, create_shared_memory, unlink_shared_memory, HeapMemory,
    SharedMemoryBackend, REGION_ALIGN,
};
use crate::config::{AttachMode, CacheConfig};
use crate::error::{CacheError, CacheResult, SegmentAttachError};
use crate::Structs::Handle;
use std::io;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Identity and minimum footprint of what a segment will hold.
///
/// Built by the cache from its record, key and index types; two processes
/// can share a segment only if their layouts agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLayout {
    /// SHA-256 over type names, sizes, alignments and tags.
    pub fingerprint: [u8; 32],
    /// Size of one stored record.
    pub record_size: usize,
    /// Number of indexes (primary included).
    pub index_count: usize,
    /// Bytes the creator allocates before publishing (initial index tables).
    pub min_data_bytes: usize,
}

pub struct Segment {
    shm: Box<dyn SharedMemoryBackend>,
    header: *mut SegmentHeader,
    name: String,
    created: bool,
}

// The header and data area are only touched under the in-segment lock.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Largest capacity a segment can be mapped with.
pub const MAX_CAPACITY: usize = isize::MAX as usize & !(REGION_ALIGN - 1);

/// Round a requested capacity up to the region alignment, refusing sizes no
/// mapping can have.
fn region_capacity(requested: usize) -> Result<usize, SegmentAttachError> {
    match requested.checked_add(REGION_ALIGN - 1) {
        Some(padded) if padded & !(REGION_ALIGN - 1) <= MAX_CAPACITY => {
            Ok(padded & !(REGION_ALIGN - 1))
        }
        _ => Err(SegmentAttachError::CapacityTooLarge {
            requested,
            max: MAX_CAPACITY,
        }),
    }
}

fn validate_name(name: &str) -> Result<(), SegmentAttachError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.len() > 255 {
        "name is longer than 255 bytes"
    } else if name.contains('/') || name.contains('\0') {
        "name contains '/' or NUL"
    } else if name == "." || name == ".." {
        "name is a directory reference"
    } else {
        return Ok(());
    };
    Err(SegmentAttachError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

impl Segment {
    /// Create or open the named segment described by `config`.
    ///
    /// A creator lays out an empty header and returns with the segment still
    /// unpublished; it must set up its indexes and call [`Segment::publish`].
    /// An opener waits (up to `config.init_timeout`) for publication and then
    /// checks magic, version, capacity and schema.
    pub fn attach(config: &CacheConfig, schema: &SchemaLayout) -> Result<Self, SegmentAttachError> {
        let name = config.ipc_name.as_str();
        validate_name(name)?;

        let capacity = region_capacity(config.capacity)?;
        check_capacity(capacity, schema)?;

        let result = match config.attach_mode {
            AttachMode::Create => {
                if unlink_shared_memory(name).map_err(|e| SegmentAttachError::from_io(name, e))? {
                    info!(segment = name, "replaced stale segment");
                }
                Self::create_named(name, capacity, schema)
            }
            AttachMode::Open => Self::open_named(name, capacity, schema, config.init_timeout),
            AttachMode::OpenOrCreate => match Self::create_named(name, capacity, schema) {
                Err(SegmentAttachError::AlreadyExists { .. }) => {
                    Self::open_named(name, capacity, schema, config.init_timeout)
                }
                other => other,
            },
        };

        if let Err(e) = &result {
            warn!(segment = name, error = %e, "failed to attach segment");
        }
        result
    }

    /// A segment in private heap memory with the same layout and locking.
    pub fn in_process(capacity: usize, schema: &SchemaLayout) -> Result<Self, SegmentAttachError> {
        let capacity = region_capacity(capacity)?;
        check_capacity(capacity, schema)?;

        let shm = HeapMemory::new(capacity)
            .map_err(|e| SegmentAttachError::from_io("<in-process>", e))?;
        let segment = Self::from_backend(Box::new(shm), "<in-process>".to_string(), true);
        segment.init_header(capacity, schema);
        Ok(segment)
    }

    fn create_named(name: &str, capacity: usize, schema: &SchemaLayout) -> Result<Self, SegmentAttachError> {
        let shm = create_shared_memory(name, capacity)
            .map_err(|e| SegmentAttachError::from_io(name, e))?;
        let segment = Self::from_backend(shm, name.to_string(), true);
        segment.init_header(capacity, schema);
        info!(segment = name, capacity, "created segment");
        Ok(segment)
    }

    fn open_named(
        name: &str,
        capacity: usize,
        schema: &SchemaLayout,
        timeout: Duration,
    ) -> Result<Self, SegmentAttachError> {
        let start = Instant::now();

        // The creator may not have sized the file yet.
        let shm = loop {
            match attach_shared_memory(name) {
                Ok(shm) => break shm,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && start.elapsed() < timeout => {
                    std::thread::sleep(Duration::from_micros(100));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(SegmentAttachError::NotInitialized {
                        name: name.to_string(),
                        waited_ms: start.elapsed().as_millis(),
                    });
                }
                Err(e) => return Err(SegmentAttachError::from_io(name, e)),
            }
        };

        if shm.size() < HEADER_SIZE {
            return Err(SegmentAttachError::CapacityMismatch {
                name: name.to_string(),
                expected: capacity,
                actual: shm.size(),
            });
        }

        let segment = Self::from_backend(shm, name.to_string(), false);
        segment.wait_ready(start, timeout)?;
        segment.verify_header(capacity, schema)?;

        info!(segment = name, capacity, "opened segment");
        Ok(segment)
    }

    fn from_backend(shm: Box<dyn SharedMemoryBackend>, name: String, created: bool) -> Self {
        let header = shm.as_ptr() as *mut SegmentHeader;
        Self {
            shm,
            header,
            name,
            created,
        }
    }

    fn init_header(&self, capacity: usize, schema: &SchemaLayout) {
        let data_start = align_up(HEADER_SIZE, REGION_ALIGN) as u64;
        unsafe {
            std::ptr::write(
                self.header,
                SegmentHeader {
                    magic: MAGIC_NUMBER,
                    version: LAYOUT_VERSION,
                    state: std::sync::atomic::AtomicU32::new(STATE_INITIALIZING),
                    capacity: capacity as u64,
                    record_size: schema.record_size as u32,
                    index_count: schema.index_count as u32,
                    schema: schema.fingerprint,
                    lock: crossbeam_utils::CachePadded::new(SharedRwLock::new()),
                    alloc: AllocatorState {
                        data_start,
                        bump: data_start,
                        end: capacity as u64,
                        live_bytes: 0,
                        live_blocks: 0,
                        free_heads: [0; NUM_SIZE_CLASSES],
                    },
                    record_count: 0,
                    indexes: [IndexRoot::default(); MAX_INDEXES],
                },
            );
        }
    }

    fn wait_ready(&self, start: Instant, timeout: Duration) -> Result<(), SegmentAttachError> {
        let state = unsafe { &(*self.header).state };
        while state.load(Ordering::Acquire) != STATE_READY {
            if start.elapsed() >= timeout {
                // distinguish "not ours" from "creator still busy (or died)"
                let magic = unsafe { std::ptr::read_volatile(&(*self.header).magic) };
                if magic != MAGIC_NUMBER {
                    return Err(SegmentAttachError::BadMagic {
                        name: self.name.clone(),
                    });
                }
                return Err(SegmentAttachError::NotInitialized {
                    name: self.name.clone(),
                    waited_ms: start.elapsed().as_millis(),
                });
            }
            std::thread::sleep(Duration::from_micros(100));
        }
        Ok(())
    }

    fn verify_header(&self, capacity: usize, schema: &SchemaLayout) -> Result<(), SegmentAttachError> {
        let header = unsafe { &*self.header };
        if header.magic != MAGIC_NUMBER {
            return Err(SegmentAttachError::BadMagic {
                name: self.name.clone(),
            });
        }
        if header.version != LAYOUT_VERSION {
            return Err(SegmentAttachError::VersionMismatch {
                name: self.name.clone(),
                found: header.version,
                expected: LAYOUT_VERSION,
            });
        }
        let actual = header.capacity as usize;
        if actual != capacity || self.shm.size() != capacity {
            return Err(SegmentAttachError::CapacityMismatch {
                name: self.name.clone(),
                expected: capacity,
                actual: actual.max(self.shm.size()),
            });
        }
        if header.schema != schema.fingerprint
            || header.record_size as usize != schema.record_size
            || header.index_count as usize != schema.index_count
        {
            return Err(SegmentAttachError::SchemaMismatch {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Make a freshly created segment visible to openers.
    pub fn publish(&self) {
        unsafe { (*self.header).state.store(STATE_READY, Ordering::Release) };
        debug!(segment = %self.name, "segment published");
    }

    /// Unlink a segment this process created but could not set up, so later
    /// attaches start over instead of waiting for a publish that never comes.
    pub(crate) fn abandon(&self) {
        if !self.created || !self.is_shared() {
            return;
        }
        match unlink_shared_memory(&self.name) {
            Ok(_) => warn!(segment = %self.name, "abandoned unpublished segment"),
            Err(e) => warn!(segment = %self.name, error = %e, "failed to unlink unpublished segment"),
        }
    }

    /// Whether this process created (rather than opened) the segment.
    pub fn is_creator(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.shm.size()
    }

    /// Whether other processes can attach this segment.
    pub fn is_shared(&self) -> bool {
        self.shm.is_shared()
    }

    /// Start of this process's mapping. Differs between processes.
    pub fn base_ptr(&self) -> *mut u8 {
        self.shm.as_ptr()
    }

    pub fn backend(&self) -> &dyn SharedMemoryBackend {
        &*self.shm
    }

    pub(crate) fn header_ptr(&self) -> *mut SegmentHeader {
        self.header
    }

    pub fn lock(&self) -> &SharedRwLock {
        unsafe { &(*self.header).lock }
    }

    pub fn read_lock(&self) -> ReadGuard<'_> {
        self.lock().read()
    }

    pub fn write_lock(&self) -> WriteGuard<'_> {
        self.lock().write()
    }

    pub fn allocator(&self) -> SegmentAllocator<'_> {
        SegmentAllocator::new(self)
    }

    /// Turn `handle` into an address in this process, checking that
    /// `len` bytes from it lie inside the carved part of the data area.
    pub fn resolve(&self, handle: Handle, len: usize) -> CacheResult<*mut u8> {
        let (data_start, bump) = unsafe {
            let alloc = &(*self.header).alloc;
            (alloc.data_start, alloc.bump)
        };
        let offset = handle.offset();
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if offset >= data_start && end <= bump => {
                Ok(unsafe { self.base_ptr().add(offset as usize) })
            }
            _ => Err(CacheError::corruption(format!(
                "handle {:#x}+{} outside data area [{:#x}, {:#x})",
                offset, len, data_start, bump
            ))),
        }
    }

    /// Pointer to the root of index `slot`.
    pub(crate) fn index_root(&self, slot: usize) -> CacheResult<*mut IndexRoot> {
        let count = unsafe { (*self.header).index_count as usize };
        if slot >= count || slot >= MAX_INDEXES {
            return Err(CacheError::corruption(format!(
                "index slot {} out of range ({} indexes)",
                slot, count
            )));
        }
        Ok(unsafe { &mut (*self.header).indexes[slot] as *mut IndexRoot })
    }

    /// Number of live records. Caller holds the lock.
    pub fn record_count(&self) -> u64 {
        unsafe { (*self.header).record_count }
    }

    pub(crate) fn set_record_count(&self, count: u64) {
        unsafe { (*self.header).record_count = count }
    }

    /// Remove the named segment. Attached processes keep their mapping until
    /// they drop it; new attaches will not find it.
    pub fn destroy(name: &str) -> Result<bool, SegmentAttachError> {
        validate_name(name)?;
        let removed = unlink_shared_memory(name).map_err(|e| SegmentAttachError::from_io(name, e))?;
        if removed {
            info!(segment = name, "destroyed segment");
        }
        Ok(removed)
    }
}

fn check_capacity(capacity: usize, schema: &SchemaLayout) -> Result<(), SegmentAttachError> {
    if schema.index_count == 0 || schema.index_count > MAX_INDEXES {
        return Err(SegmentAttachError::UnsupportedLayout {
            reason: format!(
                "{} indexes requested, between 1 and {} supported",
                schema.index_count, MAX_INDEXES
            ),
        });
    }
    let needed = align_up(HEADER_SIZE, REGION_ALIGN).saturating_add(schema.min_data_bytes);
    if capacity < needed {
        return Err(SegmentAttachError::CapacityTooSmall {
            requested: capacity,
            needed,
        });
    }
    Ok(())
}
