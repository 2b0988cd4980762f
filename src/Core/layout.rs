use super::rwlock::SharedRwLock;
use crossbeam_utils::CachePadded;
use std::sync::atomic::AtomicU32;

/// "RTB_DCCH" - identifies a mapping as an entity cache segment.
pub const MAGIC_NUMBER: u64 = 0x5254_425F_4443_4348;

/// Version of everything below. Bump on any change to these structs.
pub const LAYOUT_VERSION: u32 = 1;

/// Primary index plus up to three projection indexes.
pub const MAX_INDEXES: usize = 4;

/// Header `state` before the creator has finished laying out the segment.
pub const STATE_INITIALIZING: u32 = 0;
/// Header `state` once the segment may be used by anyone.
pub const STATE_READY: u32 = 1;

/// Smallest block is 32 bytes (16 header + 16 payload).
pub const MIN_BLOCK_SHIFT: u32 = 5;

/// Block sizes 2^5 ..= 2^44.
pub const NUM_SIZE_CLASSES: usize = 40;

/// Every block payload starts on this boundary.
pub const BLOCK_ALIGN: usize = 16;

pub const BLOCK_LIVE: u32 = 0x4C49_5645; // "LIVE"
pub const BLOCK_FREE: u32 = 0x4652_4545; // "FREE"

/// Prefix of every allocator block. Handles point just past it.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BlockHeader {
    /// `BLOCK_LIVE` or `BLOCK_FREE`.
    pub magic: u32,
    /// Size class; the block spans `1 << (class + MIN_BLOCK_SHIFT)` bytes.
    pub class: u32,
    /// Offset of the next free payload of the same class (0 = end of list).
    pub next_free: u64,
}

pub const BLOCK_HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();

const _: () = assert!(BLOCK_HEADER_SIZE == BLOCK_ALIGN);

/// Bookkeeping of the size-class allocator. Mutated only under the write lock.
#[repr(C)]
#[derive(Debug)]
pub struct AllocatorState {
    /// First byte after the header; nothing below it is ever handed out.
    pub data_start: u64,
    /// Everything in `[data_start, bump)` has been carved into blocks.
    pub bump: u64,
    /// One past the last usable byte (the segment capacity).
    pub end: u64,
    /// Bytes in blocks currently handed out.
    pub live_bytes: u64,
    /// Number of blocks currently handed out.
    pub live_blocks: u64,
    /// Head of the free list for each size class (payload offsets, 0 = empty).
    pub free_heads: [u64; NUM_SIZE_CLASSES],
}

/// Where one index keeps its bucket table.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct IndexRoot {
    /// Handle of the bucket array block.
    pub table: u64,
    /// Number of buckets (power of two).
    pub buckets: u64,
    /// Number of occupied buckets.
    pub len: u64,
    /// Size in bytes of one bucket.
    pub bucket_size: u32,
    /// Size in bytes of the key stored in a bucket.
    pub key_size: u32,
}

/// The header located at the very beginning of the segment.
///
/// It is the entry point for any process: versioning, schema identity, the
/// process-shared lock, allocator bookkeeping and the index roots.
#[repr(C, align(128))]
pub struct SegmentHeader {
    /// Identifies the region as an entity cache segment.
    pub magic: u64,

    /// Layout version the creator wrote.
    pub version: u32,

    /// `STATE_INITIALIZING` until the creator publishes with `STATE_READY`.
    pub state: AtomicU32,

    /// Total size of the segment in bytes.
    pub capacity: u64,

    /// Size in bytes of one stored record (key + payload).
    pub record_size: u32,

    /// Number of live entries in `indexes`.
    pub index_count: u32,

    /// SHA-256 over the record, key and index types.
    pub schema: [u8; 32],

    /// Guards everything below and all blocks in the data area.
    /// Padded so lock traffic does not share a line with the bookkeeping.
    pub lock: CachePadded<SharedRwLock>,

    pub alloc: AllocatorState,

    /// Number of live records.
    pub record_count: u64,

    /// Slot 0 is the primary key index.
    pub indexes: [IndexRoot; MAX_INDEXES],
}

pub const HEADER_SIZE: usize = std::mem::size_of::<SegmentHeader>();
