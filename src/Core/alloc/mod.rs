use super::layout::{
    AllocatorState, BlockHeader, BLOCK_FREE, BLOCK_HEADER_SIZE, BLOCK_LIVE, MIN_BLOCK_SHIFT,
    NUM_SIZE_CLASSES,
};
use super::segment::Segment;
use crate::error::{CacheError, CacheResult};
use crate::Structs::Handle;
mod debug;
mod getters;

/// Size class whose blocks fit `size` payload bytes plus the block header.
///
/// Blocks are powers of two from 32 bytes up; `None` if nothing is that big.
pub fn size_class(size: usize) -> Option<usize> {
    let total = size.checked_add(BLOCK_HEADER_SIZE)?.max(1 << MIN_BLOCK_SHIFT);
    let shift = total.checked_next_power_of_two()?.trailing_zeros();
    let class = (shift - MIN_BLOCK_SHIFT) as usize;
    (class < NUM_SIZE_CLASSES).then_some(class)
}

/// Total bytes (header included) of a block in `class`.
#[inline]
pub const fn class_block_size(class: usize) -> usize {
    1usize << (class as u32 + MIN_BLOCK_SHIFT)
}

/// Allocator view over a segment's data area.
///
/// Blocks come from one free list per power-of-two size class, or are
/// carved off the unreserved tail when the list is empty; both are O(1).
/// Freed blocks go back on their class list and are never coalesced.
///
/// All bookkeeping lives in the segment header, so the view holds nothing
/// but the segment reference. Mutating calls require the caller to hold the
/// segment's write lock.
pub struct SegmentAllocator<'s> {
    segment: &'s Segment,
}

impl<'s> SegmentAllocator<'s> {
    pub(crate) fn new(segment: &'s Segment) -> Self {
        Self { segment }
    }

    #[inline]
    fn state(&self) -> *mut AllocatorState {
        unsafe { &mut (*self.segment.header_ptr()).alloc as *mut AllocatorState }
    }

    #[inline]
    fn block_header(&self, handle: Handle) -> CacheResult<*mut BlockHeader> {
        if handle.offset() < BLOCK_HEADER_SIZE as u64 {
            return Err(CacheError::corruption(format!(
                "handle {:#x} has no room for a block header",
                handle.offset()
            )));
        }
        let header = Handle::from_offset(handle.offset() - BLOCK_HEADER_SIZE as u64);
        Ok(self.segment.resolve(header, BLOCK_HEADER_SIZE)? as *mut BlockHeader)
    }

    /// Allocate a zeroed block with room for `size` bytes.
    pub fn allocate(&self, size: usize) -> CacheResult<Handle> {
        let state = self.state();
        let class = size_class(size).ok_or_else(|| CacheError::OutOfMemory {
            requested: size,
            available: self.available_bytes(),
        })?;
        let block_size = class_block_size(class);

        let payload = unsafe {
            let head = (*state).free_heads[class];
            if head != 0 {
                let handle = Handle::from_offset(head);
                let header = self.block_header(handle)?;
                if (*header).magic != BLOCK_FREE || (*header).class as usize != class {
                    return Err(CacheError::corruption(format!(
                        "free list {} points at block {:#x} that is not a free block of that class",
                        class, head
                    )));
                }
                (*state).free_heads[class] = (*header).next_free;
                (*header).magic = BLOCK_LIVE;
                (*header).next_free = 0;
                handle
            } else {
                let start = (*state).bump;
                let end = start + block_size as u64;
                if end > (*state).end {
                    return Err(CacheError::OutOfMemory {
                        requested: block_size,
                        available: ((*state).end - start) as usize,
                    });
                }
                (*state).bump = end;
                let header = self.segment.base_ptr().add(start as usize) as *mut BlockHeader;
                std::ptr::write(
                    header,
                    BlockHeader {
                        magic: BLOCK_LIVE,
                        class: class as u32,
                        next_free: 0,
                    },
                );
                Handle::from_offset(start + BLOCK_HEADER_SIZE as u64)
            }
        };

        let ptr = self.segment.resolve(payload, block_size - BLOCK_HEADER_SIZE)?;
        unsafe {
            std::ptr::write_bytes(ptr, 0, block_size - BLOCK_HEADER_SIZE);
            (*state).live_bytes += block_size as u64;
            (*state).live_blocks += 1;
        }
        Ok(payload)
    }

    /// Return a block to its size-class free list.
    pub fn deallocate(&self, handle: Handle) -> CacheResult<()> {
        let state = self.state();
        let header = self.block_header(handle)?;
        unsafe {
            if (*header).magic != BLOCK_LIVE {
                return Err(CacheError::corruption(format!(
                    "deallocating block {:#x} that is not live",
                    handle.offset()
                )));
            }
            let class = (*header).class as usize;
            if class >= NUM_SIZE_CLASSES {
                return Err(CacheError::corruption(format!(
                    "block {:#x} has invalid size class {}",
                    handle.offset(),
                    class
                )));
            }
            (*header).magic = BLOCK_FREE;
            (*header).next_free = (*state).free_heads[class];
            (*state).free_heads[class] = handle.offset();
            (*state).live_bytes -= class_block_size(class) as u64;
            (*state).live_blocks -= 1;
        }
        Ok(())
    }

    /// Payload bytes available in the live block at `handle`.
    pub fn usable_size(&self, handle: Handle) -> CacheResult<usize> {
        let header = self.block_header(handle)?;
        unsafe {
            if (*header).magic != BLOCK_LIVE {
                return Err(CacheError::corruption(format!(
                    "block {:#x} is not live",
                    handle.offset()
                )));
            }
            let class = (*header).class as usize;
            if class >= NUM_SIZE_CLASSES {
                return Err(CacheError::corruption(format!(
                    "block {:#x} has invalid size class {}",
                    handle.offset(),
                    class
                )));
            }
            Ok(class_block_size(class) - BLOCK_HEADER_SIZE)
        }
    }

    /// Address of `len` payload bytes of the live block at `handle`.
    ///
    /// Fails with `Corruption` if the block is free, malformed, or smaller
    /// than `len`.
    pub fn payload(&self, handle: Handle, len: usize) -> CacheResult<*mut u8> {
        let usable = self.usable_size(handle)?;
        if len > usable {
            return Err(CacheError::corruption(format!(
                "block {:#x} holds {} bytes, {} requested",
                handle.offset(),
                usable,
                len
            )));
        }
        self.segment.resolve(handle, len)
    }
}
