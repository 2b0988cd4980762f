//! Multi-process entity cache in shared memory.
//!
//! One writer process (the campaign manager) and many reader processes (the
//! bidders) attach the same named segment. Records and their indexes live
//! inside the segment and are addressed by offsets, so every process can map
//! it at a different address. A reader/writer lock in the segment header
//! serializes writers against everybody else.

// Module naming follows project convention (Core = memory and locking, Cache = data model)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Cache;
#[allow(non_snake_case)]
pub mod Structs;
#[allow(non_snake_case)]
pub mod Debug;
#[allow(non_snake_case)]
pub mod Metrics;

pub mod config;
pub mod error;

pub use config::{AttachMode, CacheConfig};
pub use error::{CacheError, CacheResult, SegmentAttachError};
pub use Cache::{CacheBuilder, CampaignBudget, CampaignCache, CampaignKey, EntityCache};
pub use Metrics::{ObservabilitySink, PerfTimer};
pub use Structs::{Flat, Handle};
