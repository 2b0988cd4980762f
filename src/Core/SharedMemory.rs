// Memory backends a segment can live in.
// Linux: a file under /dev/shm mapped MAP_SHARED, so every process mapping
// the same name sees the same bytes (at whatever base address it got).
// Anywhere: a private heap region, for single-process use and tests.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt::Debug;
use std::io;
use std::ptr::NonNull;

#[cfg(target_os = "linux")]
use std::fs::OpenOptions;
#[cfg(target_os = "linux")]
use std::os::fd::{AsRawFd, IntoRawFd};
#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

/// Alignment every backend guarantees for the start of its region.
pub const REGION_ALIGN: usize = 128;

/// Directory named segments are created in.
pub const SHM_DIR: &str = "/dev/shm";

/// Memory region a segment is laid out in.
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Get a pointer to the mapped memory region
    fn as_ptr(&self) -> *mut u8;

    /// Get the size of the mapped region in bytes
    fn size(&self) -> usize;

    /// Get the underlying OS handle
    fn raw_handle(&self) -> RawHandle;

    /// Whether other processes can map the same bytes
    fn is_shared(&self) -> bool;
}

/// Platform-specific handle type
#[derive(Debug, Clone, Copy)]
pub enum RawHandle {
    /// Unix file descriptor (Linux)
    Fd(i32),
    /// Process-private heap region, no OS handle
    Heap,
}

/// Path of the backing file for a segment name.
pub fn shm_path(name: &str) -> String {
    format!("{}/{}", SHM_DIR, name)
}

/// Create a new named shared memory region of `size` bytes.
///
/// Fails with `AlreadyExists` if the name is taken; callers that want to
/// replace a stale segment unlink it first.
#[cfg(target_os = "linux")]
pub fn create_shared_memory(name: &str, size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::create(name, size)?))
}

/// Map an existing named shared memory region at its current size.
///
/// Returns `WouldBlock` while the creator has not sized the file yet.
#[cfg(target_os = "linux")]
pub fn attach_shared_memory(name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::attach(name)?))
}

/// Remove a named region. Processes that still map it keep their mapping.
///
/// Returns `Ok(false)` if nothing existed under the name.
#[cfg(target_os = "linux")]
pub fn unlink_shared_memory(name: &str) -> io::Result<bool> {
    match std::fs::remove_file(shm_path(name)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn create_shared_memory(_name: &str, _size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn attach_shared_memory(_name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn unlink_shared_memory(_name: &str) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct LinuxSharedMemory {
    ptr: NonNull<u8>,
    size: usize,
    fd: i32,
}

#[cfg(target_os = "linux")]
unsafe impl Send for LinuxSharedMemory {}
#[cfg(target_os = "linux")]
unsafe impl Sync for LinuxSharedMemory {}

#[cfg(target_os = "linux")]
impl LinuxSharedMemory {
    /// Create `/dev/shm/<name>` exclusively and map it.
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Shared memory size must be non-zero",
            ));
        }

        let path = shm_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;

        // New pages read as zero, which is what the segment header expects
        // before the creator fills it in.
        if let Err(e) = file.set_len(size as u64) {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }

        let fd = file.into_raw_fd();
        match unsafe { Self::map(fd, size) } {
            Ok(ptr) => Ok(Self { ptr, size, fd }),
            Err(e) => {
                unsafe { libc::close(fd) };
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Map an existing `/dev/shm/<name>` at its current size.
    pub fn attach(name: &str) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(shm_path(name))?;

        let size = file.metadata()?.len() as usize;
        if size == 0 {
            // creator has not sized the file yet
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "Shared memory not sized yet",
            ));
        }

        let ptr = unsafe { Self::map(file.as_raw_fd(), size)? };
        Ok(Self {
            ptr,
            size,
            fd: file.into_raw_fd(),
        })
    }

    unsafe fn map(fd: i32, size: usize) -> io::Result<NonNull<u8>> {
        let ptr = libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // mmap hands out page-aligned addresses
        debug_assert_eq!(ptr as usize % REGION_ALIGN, 0);
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
    }
}

#[cfg(target_os = "linux")]
impl Drop for LinuxSharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
            libc::close(self.fd);
        }
    }
}

#[cfg(target_os = "linux")]
impl SharedMemoryBackend for LinuxSharedMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Fd(self.fd)
    }

    fn is_shared(&self) -> bool {
        true
    }
}

/// Zeroed, 128-byte aligned heap region private to this process.
#[derive(Debug)]
pub struct HeapMemory {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for HeapMemory {}
unsafe impl Sync for HeapMemory {}

impl HeapMemory {
    pub fn new(size: usize) -> io::Result<Self> {
        let layout = Layout::from_size_align(size.max(1), REGION_ALIGN)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("Failed to allocate {} bytes", size),
            )
        })?;

        Ok(Self { ptr, layout })
    }
}

impl Drop for HeapMemory {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl SharedMemoryBackend for HeapMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.layout.size()
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Heap
    }

    fn is_shared(&self) -> bool {
        false
    }
}
