//! Cache configuration.

use crate::error::{CacheError, CacheResult};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable holding the segment name.
pub const ENV_IPC_NAME: &str = "RTB_CACHE_IPC_NAME";
/// Environment variable holding the segment capacity in bytes.
pub const ENV_CAPACITY: &str = "RTB_CACHE_CAPACITY";
/// Environment variable holding the attach mode.
pub const ENV_ATTACH_MODE: &str = "RTB_CACHE_ATTACH_MODE";

/// How a process attaches to a named segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachMode {
    /// Start from an empty segment, replacing any stale one under the name.
    Create,
    /// Map an existing segment; fail if there is none.
    Open,
    /// Create the segment if nobody has yet, otherwise open it.
    #[default]
    OpenOrCreate,
}

impl FromStr for AttachMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(AttachMode::Create),
            "open" => Ok(AttachMode::Open),
            "open_or_create" | "open-or-create" => Ok(AttachMode::OpenOrCreate),
            other => Err(CacheError::Config {
                message: format!("unknown attach mode {other:?}"),
            }),
        }
    }
}

/// Configuration a cache needs at construction.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Name of the shared segment (a file under `/dev/shm`).
    pub ipc_name: String,

    /// Segment capacity in bytes. Every process sharing the name must agree.
    pub capacity: usize,

    /// Create/open behaviour.
    pub attach_mode: AttachMode,

    /// How long an opener waits for the creator to publish the header.
    pub init_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ipc_name: "rtb_datacache".to_string(),
            capacity: 64 * 1024 * 1024, // 64 MB
            attach_mode: AttachMode::OpenOrCreate,
            init_timeout: Duration::from_millis(500),
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment name.
    #[must_use]
    pub fn ipc_name(mut self, name: impl Into<String>) -> Self {
        self.ipc_name = name.into();
        self
    }

    /// Sets the segment capacity in bytes.
    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the attach mode.
    #[must_use]
    pub const fn attach_mode(mut self, mode: AttachMode) -> Self {
        self.attach_mode = mode;
        self
    }

    /// Sets the header publication timeout.
    #[must_use]
    pub const fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Reads overrides from `RTB_CACHE_*` variables on top of the defaults.
    pub fn from_env() -> CacheResult<Self> {
        let mut config = Self::default();
        if let Ok(name) = env::var(ENV_IPC_NAME) {
            config.ipc_name = name;
        }
        if let Ok(raw) = env::var(ENV_CAPACITY) {
            config.capacity = raw.trim().parse().map_err(|e| CacheError::Config {
                message: format!("{ENV_CAPACITY}={raw:?}: {e}"),
            })?;
        }
        if let Ok(raw) = env::var(ENV_ATTACH_MODE) {
            config.attach_mode = raw.parse()?;
        }
        Ok(config)
    }
}
