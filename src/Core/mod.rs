pub mod SharedMemory;
pub mod segment;
pub mod alloc;
pub mod futex;
pub mod layout;
pub mod rwlock;

pub use SharedMemory::{
    attach_shared_memory, create_shared_memory, unlink_shared_memory, HeapMemory, RawHandle,
    SharedMemoryBackend,
};
pub use segment::{SchemaLayout, Segment};
pub use alloc::SegmentAllocator;
pub use rwlock::{ReadGuard, SharedRwLock, WriteGuard};
