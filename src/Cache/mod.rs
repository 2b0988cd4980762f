mod builder;
pub mod campaign;
pub mod entity_cache;

pub use builder::CacheBuilder;
pub use campaign::{CampaignBudget, CampaignCache, CampaignIdTag, CampaignKey};
pub use entity_cache::EntityCache;

pub mod Key {
    pub mod tagged;
    pub use tagged::{HasTag, ProjectFrom, Tag, TaggedKey}; // re-export for stable path
}

pub mod Index {
    pub mod index_set;
    pub mod table;
    pub mod table_impl;
    pub use index_set::{describe_key, initial_table_bytes, IndexSet, PRIMARY_SLOT};
    pub use table::{Bucket, Index, HASH_SEED, INITIAL_BUCKETS};
    pub use table_impl::hash_key;
}

pub mod Store {
    pub mod record_store;
    pub use record_store::{RecordStore, StoredRecord};
}
