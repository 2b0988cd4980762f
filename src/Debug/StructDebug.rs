use std::fmt;
use crate::Core::alloc::SegmentAllocator;
use crate::Core::Segment;

/// Debug function for Segment
///
/// Shows name, mapping base, capacity and whether this process created it.
/// Header fields other than the lock are not read, since the caller might
/// not hold the lock.
pub fn debug_segment(segment: &Segment, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Segment")
        .field("name", &segment.name())
        .field("base", &format_args!("{:p}", segment.base_ptr()))
        .field("capacity", &segment.capacity())
        .field("shared", &segment.is_shared())
        .field("creator", &segment.is_creator())
        .field("lock", segment.lock())
        .finish()
}

/// Debug function for SegmentAllocator
pub fn debug_segment_allocator(allocator: &SegmentAllocator<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SegmentAllocator")
        .field("reserved_bytes", &allocator.reserved_bytes())
        .field("live_bytes", &allocator.live_bytes())
        .field("live_blocks", &allocator.live_blocks())
        .field("available_bytes", &allocator.available_bytes())
        .finish()
}
