use rtb_datacache::Cache::Index::{Index, IndexSet, PRIMARY_SLOT};
use rtb_datacache::Cache::Store::RecordStore;
use rtb_datacache::{define_tag, tagged_key};
use rtb_datacache::{CacheError, EntityCache, Flat, SegmentAttachError};
use std::collections::HashMap;

define_tag! {
    pub CampaignTag: u32;
    pub CreativeTag: u32;
    pub ExchangeTag: u16;
}

tagged_key! {
    pub struct AdKey {
        campaign_id: CampaignTag,
        creative_id: CreativeTag,
        exchange: ExchangeTag,
    }
}

tagged_key! {
    pub struct CreativeKey {
        creative_id: CreativeTag,
    }
}

tagged_key! {
    pub struct CampaignKey {
        campaign_id: CampaignTag,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ad {
    pub bid_floor: u64,
    pub width: u16,
    pub height: u16,
    pub flags: u32,
}

unsafe impl Flat for Ad {}

type Ads = EntityCache<Ad, AdKey>;
type IndexedAds = EntityCache<Ad, AdKey, (CreativeKey,)>;

const CAPACITY: usize = 1024 * 1024;

fn ad(bid_floor: u64) -> Ad {
    Ad {
        bid_floor,
        width: 300,
        height: 250,
        flags: 0,
    }
}

fn key(campaign_id: u32, creative_id: u32) -> AdKey {
    AdKey {
        campaign_id,
        creative_id,
        exchange: 1,
    }
}

/// Rewrite the record indexed under `at` behind the cache's back.
fn rewrite_record<X: IndexSet<AdKey>>(
    cache: &EntityCache<Ad, AdKey, X>,
    at: &AdKey,
    stored_key: AdKey,
    value: Ad,
) {
    let segment = cache.segment();
    let _guard = segment.write_lock();
    let primary = unsafe { Index::<AdKey>::attach(segment, PRIMARY_SLOT) }.unwrap();
    let handle = primary.find(at).unwrap().expect("record is indexed");
    let store = unsafe { RecordStore::<AdKey, Ad>::attach(segment) };
    store.overwrite(handle, stored_key, value).unwrap();
}

fn stored_under<X: IndexSet<AdKey>>(cache: &EntityCache<Ad, AdKey, X>, at: &AdKey) -> (AdKey, Ad) {
    let segment = cache.segment();
    let _guard = segment.read_lock();
    let primary = unsafe { Index::<AdKey>::attach(segment, PRIMARY_SLOT) }.unwrap();
    let handle = primary.find(at).unwrap().expect("record is indexed");
    let record = unsafe { RecordStore::<AdKey, Ad>::attach(segment) }.get(handle).unwrap();
    (record.key, record.value)
}

#[test]
fn test_insert_then_retrieve() {
    let cache = Ads::in_process(CAPACITY).unwrap();
    assert!(cache.is_empty().unwrap());
    assert!(cache.insert(key(1, 10), ad(100)).unwrap());
    assert_eq!(cache.retrieve(&key(1, 10)).unwrap(), vec![ad(100)]);
    assert!(cache.retrieve(&key(1, 11)).unwrap().is_empty());
    assert_eq!(cache.len().unwrap(), 1);
    cache.verify().unwrap();
}

#[test]
fn test_duplicate_insert_keeps_original() {
    let cache = Ads::in_process(CAPACITY).unwrap();
    assert!(cache.insert(key(1, 10), ad(100)).unwrap());
    assert!(!cache.insert(key(1, 10), ad(200)).unwrap());
    assert_eq!(cache.retrieve(&key(1, 10)).unwrap(), vec![ad(100)]);
    assert_eq!(cache.len().unwrap(), 1);
}

#[test]
fn test_update_in_place() {
    let cache = Ads::in_process(CAPACITY).unwrap();
    cache.insert(key(1, 10), ad(100)).unwrap();
    cache.insert(key(2, 20), ad(200)).unwrap();

    assert!(cache.update(&key(1, 10), ad(150)).unwrap());
    assert_eq!(cache.retrieve(&key(1, 10)).unwrap(), vec![ad(150)]);
    assert_eq!(cache.len().unwrap(), 2);

    assert!(!cache.update(&key(3, 30), ad(300)).unwrap());
    assert!(cache.retrieve(&key(3, 30)).unwrap().is_empty());
    assert_eq!(cache.len().unwrap(), 2);
    cache.verify().unwrap();
}

#[test]
fn test_update_key_moves_record() {
    let cache = Ads::in_process(CAPACITY).unwrap();
    cache.insert(key(1, 10), ad(100)).unwrap();

    assert!(cache.update_key(&key(1, 10), ad(110), key(9, 90)).unwrap());
    assert!(cache.retrieve(&key(1, 10)).unwrap().is_empty());
    assert_eq!(cache.retrieve(&key(9, 90)).unwrap(), vec![ad(110)]);
    assert_eq!(cache.len().unwrap(), 1);
    assert_eq!(cache.retrieve_entries().unwrap(), vec![(key(9, 90), ad(110))]);

    // same key: behaves like update
    assert!(cache.update_key(&key(9, 90), ad(120), key(9, 90)).unwrap());
    assert_eq!(cache.retrieve(&key(9, 90)).unwrap(), vec![ad(120)]);

    // absent source
    assert!(!cache.update_key(&key(1, 10), ad(1), key(2, 20)).unwrap());
    assert!(cache.retrieve(&key(2, 20)).unwrap().is_empty());
    cache.verify().unwrap();
}

#[test]
fn test_update_key_into_occupied_key_is_rejected() {
    let cache = Ads::in_process(CAPACITY).unwrap();
    cache.insert(key(1, 10), ad(100)).unwrap();
    cache.insert(key(2, 20), ad(200)).unwrap();

    assert!(!cache.update_key(&key(1, 10), ad(999), key(2, 20)).unwrap());
    assert_eq!(cache.retrieve(&key(1, 10)).unwrap(), vec![ad(100)]);
    assert_eq!(cache.retrieve(&key(2, 20)).unwrap(), vec![ad(200)]);
    cache.verify().unwrap();
}

#[test]
fn test_remove() {
    let cache = Ads::in_process(CAPACITY).unwrap();
    cache.insert(key(1, 10), ad(100)).unwrap();

    assert!(cache.remove(&key(1, 10)).unwrap());
    assert!(cache.retrieve(&key(1, 10)).unwrap().is_empty());
    assert!(!cache.remove(&key(1, 10)).unwrap());
    assert!(cache.retrieve_all().unwrap().is_empty());

    // the record block is recycled: index table + nothing else
    assert_eq!(cache.segment().allocator().live_blocks(), 1);
    cache.verify().unwrap();
}

#[test]
fn test_retrieve_all_tracks_model() {
    let cache = Ads::in_process(4 * CAPACITY).unwrap();
    let mut model: HashMap<AdKey, Ad> = HashMap::new();
    let mut rng = fastrand::Rng::with_seed(42);

    for step in 0..5000u64 {
        let k = key(rng.u32(..50), rng.u32(..10));
        match rng.u8(..5) {
            0 | 1 => {
                let inserted = cache.insert(k, ad(step)).unwrap();
                assert_eq!(inserted, !model.contains_key(&k));
                model.entry(k).or_insert(ad(step));
            }
            2 => {
                let updated = cache.update(&k, ad(step)).unwrap();
                assert_eq!(updated, model.contains_key(&k));
                if let Some(v) = model.get_mut(&k) {
                    *v = ad(step);
                }
            }
            3 => {
                let to = key(rng.u32(..50), rng.u32(..10));
                let expected = model.contains_key(&k) && (k == to || !model.contains_key(&to));
                assert_eq!(cache.update_key(&k, ad(step), to).unwrap(), expected);
                if expected {
                    model.remove(&k);
                    model.insert(to, ad(step));
                }
            }
            _ => {
                assert_eq!(cache.remove(&k).unwrap(), model.remove(&k).is_some());
            }
        }
    }

    assert_eq!(cache.retrieve_all().unwrap().len(), model.len());
    let mut entries = cache.retrieve_entries().unwrap();
    entries.sort_by_key(|(k, _)| *k);
    let mut expected: Vec<_> = model.into_iter().collect();
    expected.sort_by_key(|(k, _)| *k);
    assert_eq!(entries, expected);
    cache.verify().unwrap();
}

#[test]
fn test_retrieve_by_unindexed_projection_scans() {
    let cache = Ads::in_process(CAPACITY).unwrap();
    cache.insert(key(1, 10), ad(100)).unwrap();
    cache.insert(key(1, 11), ad(101)).unwrap();
    cache.insert(key(2, 20), ad(200)).unwrap();

    let mut found = cache.retrieve(&CampaignKey { campaign_id: 1 }).unwrap();
    found.sort_by_key(|a| a.bid_floor);
    assert_eq!(found, vec![ad(100), ad(101)]);
    assert!(cache.retrieve(&CampaignKey { campaign_id: 3 }).unwrap().is_empty());
}

#[test]
fn test_secondary_index_lookup_and_uniqueness() {
    let cache = IndexedAds::in_process(CAPACITY).unwrap();
    assert!(cache.insert(key(1, 10), ad(100)).unwrap());

    assert_eq!(
        cache.retrieve(&CreativeKey { creative_id: 10 }).unwrap(),
        vec![ad(100)]
    );

    // creative 10 is taken, even under another campaign
    assert!(!cache.insert(key(2, 10), ad(200)).unwrap());
    assert_eq!(cache.len().unwrap(), 1);

    assert!(cache.insert(key(2, 20), ad(200)).unwrap());
    // moving onto a taken creative is rejected and leaves both alone
    assert!(!cache.update_key(&key(2, 20), ad(0), key(3, 10)).unwrap());
    assert_eq!(cache.retrieve(&key(2, 20)).unwrap(), vec![ad(200)]);

    // keeping the creative while changing the campaign is fine
    assert!(cache.update_key(&key(2, 20), ad(250), key(4, 20)).unwrap());
    assert_eq!(
        cache.retrieve(&CreativeKey { creative_id: 20 }).unwrap(),
        vec![ad(250)]
    );

    assert!(cache.remove(&key(1, 10)).unwrap());
    assert!(cache.retrieve(&CreativeKey { creative_id: 10 }).unwrap().is_empty());
    assert!(cache.insert(key(5, 10), ad(500)).unwrap());
    cache.verify().unwrap();
}

#[test]
fn test_secondary_index_tracks_model() {
    let cache = IndexedAds::in_process(4 * CAPACITY).unwrap();
    let mut model: HashMap<AdKey, Ad> = HashMap::new();
    let mut rng = fastrand::Rng::with_seed(7);

    // whether some record other than `except` holds `creative_id`
    fn creative_taken(model: &HashMap<AdKey, Ad>, creative_id: u32, except: Option<&AdKey>) -> bool {
        model
            .keys()
            .any(|k| k.creative_id == creative_id && Some(k) != except)
    }

    for step in 0..4000u64 {
        let k = key(rng.u32(..20), rng.u32(..30));
        match rng.u8(..5) {
            0 | 1 => {
                let expected = !model.contains_key(&k) && !creative_taken(&model, k.creative_id, None);
                assert_eq!(cache.insert(k, ad(step)).unwrap(), expected, "insert {k:?}");
                if expected {
                    model.insert(k, ad(step));
                }
            }
            2 => {
                let updated = cache.update(&k, ad(step)).unwrap();
                assert_eq!(updated, model.contains_key(&k));
                if let Some(v) = model.get_mut(&k) {
                    *v = ad(step);
                }
            }
            3 => {
                let to = key(rng.u32(..20), rng.u32(..30));
                let expected = model.contains_key(&k)
                    && (k == to
                        || (!model.contains_key(&to)
                            && !creative_taken(&model, to.creative_id, Some(&k))));
                assert_eq!(
                    cache.update_key(&k, ad(step), to).unwrap(),
                    expected,
                    "update_key {k:?} -> {to:?}"
                );
                if expected {
                    model.remove(&k);
                    model.insert(to, ad(step));
                }
            }
            _ => {
                assert_eq!(cache.remove(&k).unwrap(), model.remove(&k).is_some());
            }
        }
    }

    cache.verify().unwrap();
    assert_eq!(cache.len().unwrap(), model.len());
    for creative_id in 0..30 {
        let expected: Vec<Ad> = model
            .iter()
            .filter(|(k, _)| k.creative_id == creative_id)
            .map(|(_, v)| *v)
            .collect();
        assert!(expected.len() <= 1);
        assert_eq!(
            cache.retrieve(&CreativeKey { creative_id }).unwrap(),
            expected,
            "creative {creative_id}"
        );
    }
    println!("{} records after the run", model.len());
}

#[test]
fn test_mismatched_record_is_reported_not_repaired() {
    let cache = Ads::in_process(CAPACITY).unwrap();
    cache.insert(key(1, 10), ad(100)).unwrap();
    cache.insert(key(2, 20), ad(200)).unwrap();

    // the entry for (1, 10) now leads to a record claiming to be (7, 70)
    rewrite_record(&cache, &key(1, 10), key(7, 70), ad(999));

    let expect_corruption = |result: Result<_, CacheError>, what: &str| match result {
        Err(e) => assert!(e.is_corruption(), "{what}: unexpected error {e}"),
        Ok(_) => panic!("{what}: mismatch went unnoticed"),
    };
    expect_corruption(cache.retrieve(&key(1, 10)).map(drop), "retrieve");
    expect_corruption(cache.update(&key(1, 10), ad(1)).map(drop), "update");
    expect_corruption(cache.update_key(&key(1, 10), ad(1), key(3, 30)).map(drop), "update_key");
    expect_corruption(cache.remove(&key(1, 10)).map(drop), "remove");
    expect_corruption(cache.retrieve_all().map(drop), "retrieve_all");
    expect_corruption(cache.verify(), "verify");

    // none of the failed calls touched the segment
    assert_eq!(stored_under(&cache, &key(1, 10)), (key(7, 70), ad(999)));
    assert!(cache.retrieve(&key(7, 70)).unwrap().is_empty());
    assert!(cache.retrieve(&key(3, 30)).unwrap().is_empty());
    assert_eq!(cache.len().unwrap(), 2);
    assert_eq!(cache.segment().allocator().live_blocks(), 3);
    assert!(cache.verify().unwrap_err().is_corruption());

    // the untouched record keeps working
    assert_eq!(cache.retrieve(&key(2, 20)).unwrap(), vec![ad(200)]);
    assert!(cache.update(&key(2, 20), ad(250)).unwrap());
    assert_eq!(cache.retrieve(&key(2, 20)).unwrap(), vec![ad(250)]);
}

#[test]
fn test_missing_secondary_entry_fails_verify() {
    let cache = IndexedAds::in_process(CAPACITY).unwrap();
    cache.insert(key(1, 10), ad(100)).unwrap();
    cache.insert(key(2, 20), ad(200)).unwrap();
    cache.verify().unwrap();

    {
        let segment = cache.segment();
        let _guard = segment.write_lock();
        let creatives = unsafe { Index::<CreativeKey>::attach(segment, 1) }.unwrap();
        assert!(creatives.remove(&CreativeKey { creative_id: 10 }).unwrap());
    }

    let err = cache.verify().unwrap_err();
    println!("verify: {err}");
    assert!(err.is_corruption(), "unexpected error: {err}");

    // the primary index still finds the record; verify keeps failing
    assert_eq!(cache.retrieve(&key(1, 10)).unwrap(), vec![ad(100)]);
    assert!(cache.retrieve(&CreativeKey { creative_id: 10 }).unwrap().is_empty());
    assert!(cache.verify().unwrap_err().is_corruption());
}

#[test]
fn test_out_of_memory_leaves_cache_unchanged() {
    let layout = Ads::layout().unwrap();
    let cache = Ads::in_process(32 * 1024 + layout.min_data_bytes).unwrap();

    let mut n = 0u32;
    let err = loop {
        match cache.insert(key(n, n), ad(n as u64)) {
            Ok(true) => n += 1,
            Ok(false) => unreachable!("keys are distinct"),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, CacheError::OutOfMemory { .. }), "unexpected error: {err}");
    assert!(n > 0);
    assert_eq!(cache.len().unwrap(), n as usize);
    assert!(cache.retrieve(&key(n, n)).unwrap().is_empty());
    cache.verify().unwrap();

    assert!(cache.remove(&key(0, 0)).unwrap());
    assert!(cache.insert(key(n, n), ad(1)).unwrap());
    cache.verify().unwrap();
}

#[test]
fn test_overaligned_payload_rejected() {
    #[repr(C, align(32))]
    #[derive(Clone, Copy)]
    struct Wide {
        lanes: [u64; 4],
    }
    unsafe impl Flat for Wide {}

    let err = EntityCache::<Wide, AdKey>::in_process(CAPACITY).unwrap_err();
    assert!(
        matches!(err, CacheError::Attach(SegmentAttachError::UnsupportedLayout { .. })),
        "unexpected error: {err}"
    );
}

#[test]
fn test_layout_fingerprint_tracks_types() {
    let plain = Ads::layout().unwrap();
    let indexed = IndexedAds::layout().unwrap();
    assert_eq!(plain, Ads::layout().unwrap());
    assert_ne!(plain.fingerprint, indexed.fingerprint);
    assert_eq!(plain.index_count, 1);
    assert_eq!(indexed.index_count, 2);
    assert_eq!(
        EntityCache::<Ad, AdKey, (CreativeKey, CampaignKey)>::layout()
            .unwrap()
            .index_count,
        3
    );
}

#[cfg(target_os = "linux")]
#[test]
fn test_schema_mismatch_on_open() {
    use rtb_datacache::{AttachMode, CacheConfig};

    let name = format!("rtb_test_entity_schema_{}", std::process::id());
    let config = CacheConfig::new()
        .ipc_name(&name)
        .capacity(CAPACITY)
        .attach_mode(AttachMode::Create);
    let _writer = Ads::open(&config).unwrap();

    let err = IndexedAds::open(&config.clone().attach_mode(AttachMode::Open)).unwrap_err();
    assert!(
        matches!(err, CacheError::Attach(SegmentAttachError::SchemaMismatch { .. })),
        "unexpected error: {err}"
    );
    rtb_datacache::Core::Segment::destroy(&name).unwrap();
}

#[cfg(target_os = "linux")]
#[test]
fn test_failed_setup_unlinks_segment() {
    use rtb_datacache::Cache::Key::TaggedKey;
    use rtb_datacache::Core::Segment;
    use rtb_datacache::{AttachMode, CacheConfig, CacheResult, Handle};
    use sha2::{Digest, Sha256};
    use std::time::Duration;

    // secondary index set whose tables can never be laid out
    struct BrokenIndexes;

    impl IndexSet<AdKey> for BrokenIndexes {
        const COUNT: usize = 0;

        fn describe(hasher: &mut Sha256) {
            hasher.update(b"broken");
        }

        fn max_align() -> usize {
            1
        }

        fn initial_bytes() -> usize {
            0
        }

        fn slot_of<P: TaggedKey>() -> Option<usize> {
            None
        }

        unsafe fn create_all(_segment: &Segment) -> CacheResult<()> {
            Err(CacheError::Config {
                message: "index tables refused".to_string(),
            })
        }

        unsafe fn conflicts(_: &Segment, _: &AdKey, _: Option<Handle>) -> CacheResult<bool> {
            Ok(false)
        }

        unsafe fn reserve_all(_: &Segment, _: usize) -> CacheResult<()> {
            Ok(())
        }

        unsafe fn insert_all(_: &Segment, _: &AdKey, _: Handle) -> CacheResult<()> {
            Ok(())
        }

        unsafe fn remove_all(_: &Segment, _: &AdKey) -> CacheResult<()> {
            Ok(())
        }

        unsafe fn rekey_all(_: &Segment, _: &AdKey, _: &AdKey) -> CacheResult<()> {
            Ok(())
        }

        unsafe fn verify_all(_: &Segment, _: &HashMap<Handle, AdKey>) -> CacheResult<()> {
            Ok(())
        }
    }

    let name = format!("rtb_test_entity_abandon_{}", std::process::id());
    let _ = Segment::destroy(&name);
    let config = CacheConfig::new()
        .ipc_name(&name)
        .capacity(CAPACITY)
        .attach_mode(AttachMode::Create)
        .init_timeout(Duration::from_millis(50));

    let err = EntityCache::<Ad, AdKey, BrokenIndexes>::open(&config).unwrap_err();
    assert!(matches!(err, CacheError::Config { .. }), "unexpected error: {err}");

    // openers find nothing rather than an unpublished segment
    let err = Ads::open(&config.clone().attach_mode(AttachMode::Open)).unwrap_err();
    assert!(
        matches!(err, CacheError::Attach(SegmentAttachError::NotFound { .. })),
        "unexpected error: {err}"
    );

    let cache = Ads::open(&config.clone().attach_mode(AttachMode::OpenOrCreate)).unwrap();
    assert!(cache.segment().is_creator());
    assert!(cache.insert(key(1, 10), ad(100)).unwrap());
    Segment::destroy(&name).unwrap();
}
