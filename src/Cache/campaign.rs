// Campaign budgets, keyed by campaign id.

use super::entity_cache::EntityCache;
use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::Metrics::{ObservabilitySink, PerfTimer};
use crate::Structs::Flat;
use crate::{define_tag, tagged_key};
use std::fmt;
use std::sync::Arc;

define_tag! {
    /// Campaign identifier.
    pub CampaignIdTag: u32;
}

tagged_key! {
    pub struct CampaignKey {
        campaign_id: CampaignIdTag,
    }
}

/// Daily limits and spend of one campaign. Money is in micro-currency units.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CampaignBudget {
    pub campaign_id: u32,
    pub day_budget_limit: u64,
    pub day_budget_spent: u64,
    pub day_show_limit: u32,
    pub day_click_limit: u32,
}

unsafe impl Flat for CampaignBudget {}

impl fmt::Display for CampaignBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.campaign_id,
            self.day_budget_limit,
            self.day_budget_spent,
            self.day_show_limit,
            self.day_click_limit
        )
    }
}

/// Budget cache shared by the campaign manager (writer) and the bidders
/// (readers).
///
/// Same semantics as [`EntityCache`], with the key given as a bare campaign
/// id. Every call is timed and reported to the sink, if one is set.
pub struct CampaignCache {
    cache: EntityCache<CampaignBudget, CampaignKey>,
    sink: Option<Arc<dyn ObservabilitySink>>,
}

impl CampaignCache {
    pub fn new(config: &CacheConfig) -> CacheResult<Self> {
        Ok(Self::from_cache(EntityCache::open(config)?))
    }

    pub fn in_process(capacity: usize) -> CacheResult<Self> {
        Ok(Self::from_cache(EntityCache::in_process(capacity)?))
    }

    pub fn from_cache(cache: EntityCache<CampaignBudget, CampaignKey>) -> Self {
        Self { cache, sink: None }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn cache(&self) -> &EntityCache<CampaignBudget, CampaignKey> {
        &self.cache
    }

    fn sink(&self) -> Option<&dyn ObservabilitySink> {
        self.sink.as_deref()
    }

    /// Budget of `campaign_id`: one element, or none if unknown.
    pub fn retrieve(&self, campaign_id: u32) -> CacheResult<Vec<CampaignBudget>> {
        let _timer = PerfTimer::with_context(self.sink(), "campaign_id", || campaign_id.to_string());
        self.cache.retrieve(&CampaignKey { campaign_id })
    }

    /// Every budget.
    pub fn retrieve_all(&self) -> CacheResult<Vec<CampaignBudget>> {
        let _timer = PerfTimer::new(self.sink(), "all_campaign_ids");
        self.cache.retrieve_all()
    }

    pub fn insert(&self, budget: &CampaignBudget, campaign_id: u32) -> CacheResult<bool> {
        let _timer = PerfTimer::with_context(self.sink(), "insert", || campaign_id.to_string());
        self.cache.insert(CampaignKey { campaign_id }, *budget)
    }

    pub fn update(&self, budget: &CampaignBudget, campaign_id: u32) -> CacheResult<bool> {
        let _timer = PerfTimer::with_context(self.sink(), "update", || campaign_id.to_string());
        self.cache.update(&CampaignKey { campaign_id }, *budget)
    }

    /// Store `budget` under `new_campaign_id`, moving it from `old_campaign_id`.
    pub fn update_id(
        &self,
        budget: &CampaignBudget,
        old_campaign_id: u32,
        new_campaign_id: u32,
    ) -> CacheResult<bool> {
        let _timer = PerfTimer::with_context(self.sink(), "update_id", || {
            format!("{old_campaign_id}->{new_campaign_id}")
        });
        self.cache.update_key(
            &CampaignKey {
                campaign_id: old_campaign_id,
            },
            *budget,
            CampaignKey {
                campaign_id: new_campaign_id,
            },
        )
    }

    pub fn remove(&self, campaign_id: u32) -> CacheResult<bool> {
        let _timer = PerfTimer::with_context(self.sink(), "remove", || campaign_id.to_string());
        self.cache.remove(&CampaignKey { campaign_id })
    }

    pub fn len(&self) -> CacheResult<usize> {
        self.cache.len()
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        self.cache.is_empty()
    }
}

impl fmt::Debug for CampaignCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CampaignCache")
            .field("cache", &self.cache)
            .field("instrumented", &self.sink.is_some())
            .finish()
    }
}
