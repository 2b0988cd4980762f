use super::entity_cache::EntityCache;
use super::Index::IndexSet;
use super::Key::TaggedKey;
use crate::config::{AttachMode, CacheConfig};
use crate::error::CacheResult;
use crate::Structs::Flat;
use std::time::Duration;

/// Builds caches from a [`CacheConfig`], one setting at a time.
///
/// ```no_run
/// use rtb_datacache::{AttachMode, CacheBuilder, CampaignBudget, CampaignKey};
///
/// let cache = CacheBuilder::new()
///     .with_name("campaign_budgets")
///     .with_capacity(16 * 1024 * 1024)
///     .with_mode(AttachMode::Open)
///     .build::<CampaignBudget, CampaignKey, ()>()?;
/// # Ok::<(), rtb_datacache::CacheError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct CacheBuilder {
    config: CacheConfig,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: CacheConfig) -> Self {
        Self { config }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.ipc_name = name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn with_mode(mut self, mode: AttachMode) -> Self {
        self.config.attach_mode = mode;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.config.init_timeout = timeout;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Attach the named shared segment.
    pub fn build<T: Flat, K: TaggedKey, X: IndexSet<K>>(self) -> CacheResult<EntityCache<T, K, X>> {
        EntityCache::open(&self.config)
    }

    /// Private cache of the configured capacity; name and mode are ignored.
    pub fn build_in_process<T: Flat, K: TaggedKey, X: IndexSet<K>>(
        self,
    ) -> CacheResult<EntityCache<T, K, X>> {
        EntityCache::in_process(self.config.capacity)
    }
}
