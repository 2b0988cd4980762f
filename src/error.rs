//! Error types for the shared entity cache.
//!
//! Expected outcomes of cache operations (duplicate key, missing key) are not
//! errors: they come back as `Ok(false)` or an empty collection. Everything in
//! here is a hard failure the caller has to decide about.

use std::io;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Failure to create or open a named segment.
///
/// Surfaced at construction; a cache that failed to attach is never handed out.
#[derive(Debug, Error)]
pub enum SegmentAttachError {
    /// Segment names map to a single file under `/dev/shm`.
    #[error("invalid segment name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// `Open` was requested but nothing exists under the name.
    #[error("segment {name} does not exist")]
    NotFound {
        /// Segment name.
        name: String,
    },

    /// Exclusive create raced with another creator.
    #[error("segment {name} already exists")]
    AlreadyExists {
        /// Segment name.
        name: String,
    },

    /// The caller may not read or write the segment.
    #[error("permission denied on segment {name}")]
    PermissionDenied {
        /// Segment name.
        name: String,
    },

    /// Any other OS failure while creating, sizing or mapping the segment.
    #[error("I/O error on segment {name}: {source}")]
    Io {
        /// Segment name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Requested capacity cannot hold the header and initial index tables.
    #[error("capacity {requested} is too small, at least {needed} bytes required")]
    CapacityTooSmall {
        /// Requested capacity in bytes.
        requested: usize,
        /// Minimum usable capacity in bytes.
        needed: usize,
    },

    /// Requested capacity is larger than any mapping can be.
    #[error("capacity {requested} is too large, at most {max} bytes supported")]
    CapacityTooLarge {
        /// Requested capacity in bytes.
        requested: usize,
        /// Largest supported capacity in bytes.
        max: usize,
    },

    /// An existing segment was created with a different capacity.
    #[error("segment {name} has capacity {actual}, expected {expected}")]
    CapacityMismatch {
        /// Segment name.
        name: String,
        /// Capacity this process asked for (aligned).
        expected: usize,
        /// Capacity recorded in the segment.
        actual: usize,
    },

    /// An existing segment holds a different record/key/index layout.
    #[error("segment {name} was created for a different schema")]
    SchemaMismatch {
        /// Segment name.
        name: String,
    },

    /// An existing segment was written by an incompatible layout version.
    #[error("segment {name} has layout version {found}, expected {expected}")]
    VersionMismatch {
        /// Segment name.
        name: String,
        /// Version found in the header.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// The mapped bytes do not start with the segment magic.
    #[error("segment {name} is not an entity cache segment")]
    BadMagic {
        /// Segment name.
        name: String,
    },

    /// The creator did not publish the header in time.
    #[error("segment {name} was not initialized within {waited_ms} ms")]
    NotInitialized {
        /// Segment name.
        name: String,
        /// How long this process waited.
        waited_ms: u128,
    },

    /// Payload or key types the segment layout cannot hold.
    #[error("unsupported layout: {reason}")]
    UnsupportedLayout {
        /// What is wrong with the types.
        reason: String,
    },

    /// Named shared memory is not available on this platform.
    #[error("shared memory segments are only supported on Linux")]
    Unsupported,
}

/// Errors raised by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The segment could not be attached.
    #[error(transparent)]
    Attach(#[from] SegmentAttachError),

    /// Index and record store disagree, or a handle does not resolve to a
    /// live block. Never repaired silently.
    #[error("segment corruption: {message}")]
    Corruption {
        /// Description of the inconsistency.
        message: String,
    },

    /// The segment has no room left for the allocation. The operation that
    /// hit this made no change.
    #[error("segment out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested, including block overhead.
        requested: usize,
        /// Bytes still unreserved in the segment.
        available: usize,
    },

    /// Configuration could not be read.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl CacheError {
    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "segment corruption detected");
        CacheError::Corruption { message }
    }

    /// True for [`CacheError::Corruption`].
    pub fn is_corruption(&self) -> bool {
        matches!(self, CacheError::Corruption { .. })
    }
}

impl SegmentAttachError {
    /// Map an OS error on `name` onto the attach taxonomy.
    pub(crate) fn from_io(name: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => SegmentAttachError::NotFound { name: name.to_string() },
            io::ErrorKind::AlreadyExists => {
                SegmentAttachError::AlreadyExists { name: name.to_string() }
            }
            io::ErrorKind::PermissionDenied => {
                SegmentAttachError::PermissionDenied { name: name.to_string() }
            }
            io::ErrorKind::Unsupported => SegmentAttachError::Unsupported,
            _ => SegmentAttachError::Io { name: name.to_string(), source },
        }
    }
}
