use super::*;

/// Read-only statistics of the allocator.
///
/// Values are plain loads of header fields; take the segment lock first if
/// they have to be consistent with each other.
impl SegmentAllocator<'_> {
    /// Bytes carved into blocks so far (live or on a free list).
    pub fn reserved_bytes(&self) -> usize {
        unsafe { ((*self.state()).bump - (*self.state()).data_start) as usize }
    }

    /// Bytes in blocks currently handed out, block headers included.
    pub fn live_bytes(&self) -> usize {
        unsafe { (*self.state()).live_bytes as usize }
    }

    /// Number of blocks currently handed out.
    pub fn live_blocks(&self) -> u64 {
        unsafe { (*self.state()).live_blocks }
    }

    /// Bytes not yet carved into blocks. Free-listed blocks are not counted.
    pub fn available_bytes(&self) -> usize {
        unsafe { ((*self.state()).end - (*self.state()).bump) as usize }
    }

    /// Number of blocks waiting on the free list of `class`.
    pub fn free_blocks(&self, class: usize) -> usize {
        if class >= NUM_SIZE_CLASSES {
            return 0;
        }
        let mut count = 0;
        let mut next = unsafe { (*self.state()).free_heads[class] };
        while next != 0 {
            count += 1;
            next = match self.block_header(Handle::from_offset(next)) {
                Ok(header) => unsafe { (*header).next_free },
                Err(_) => break,
            };
        }
        count
    }
}
