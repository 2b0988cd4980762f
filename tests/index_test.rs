use rtb_datacache::Cache::Index::{Index, INITIAL_BUCKETS};
use rtb_datacache::Core::{SchemaLayout, Segment};
use rtb_datacache::{define_tag, tagged_key, Handle};
use std::collections::HashMap;

define_tag! {
    pub UserTag: u64;
    pub SlotTag: u16;
}

tagged_key! {
    pub struct UserSlot {
        user: UserTag,
        slot: SlotTag,
    }
}

tagged_key! {
    pub struct UserOnly {
        user: UserTag,
    }
}

fn segment(capacity: usize) -> Segment {
    let schema = SchemaLayout {
        fingerprint: [1; 32],
        record_size: 16,
        index_count: 1,
        min_data_bytes: 0,
    };
    Segment::in_process(capacity, &schema).unwrap()
}

fn key(user: u64) -> UserSlot {
    UserSlot {
        user,
        slot: (user % 7) as u16,
    }
}

// Index entries only need non-null handles; these never get resolved.
fn handle(n: u64) -> Handle {
    Handle::from_offset(4096 + n * 16)
}

#[test]
fn test_insert_find_remove() {
    let segment = segment(256 * 1024);
    let _guard = segment.write_lock();
    let index = unsafe { Index::<UserSlot>::create(&segment, 0).unwrap() };

    assert!(index.is_empty());
    assert!(index.insert(key(1), handle(1)).unwrap());
    assert!(!index.insert(key(1), handle(2)).unwrap(), "duplicate key must be rejected");
    assert_eq!(index.find(&key(1)).unwrap(), Some(handle(1)));
    assert_eq!(index.find(&key(2)).unwrap(), None);
    assert_eq!(index.len(), 1);

    assert!(index.remove(&key(1)).unwrap());
    assert!(!index.remove(&key(1)).unwrap());
    assert!(index.is_empty());
}

#[test]
fn test_growth_keeps_every_entry() {
    let segment = segment(1024 * 1024);
    let _guard = segment.write_lock();
    let index = unsafe { Index::<UserSlot>::create(&segment, 0).unwrap() };
    assert_eq!(index.bucket_count(), INITIAL_BUCKETS);

    for n in 0..1000 {
        assert!(index.insert(key(n), handle(n)).unwrap());
    }
    assert_eq!(index.len(), 1000);
    assert!(index.bucket_count() * 3 >= 1000 * 4);
    for n in 0..1000 {
        assert_eq!(index.find(&key(n)).unwrap(), Some(handle(n)));
    }

    // only the current table stays allocated
    assert_eq!(segment.allocator().live_blocks(), 1);
}

#[test]
fn test_rekey_rules() {
    let segment = segment(256 * 1024);
    let _guard = segment.write_lock();
    let index = unsafe { Index::<UserSlot>::create(&segment, 0).unwrap() };
    index.insert(key(1), handle(1)).unwrap();
    index.insert(key(2), handle(2)).unwrap();

    // target occupied: nothing moves
    assert!(!index.rekey(&key(1), key(2)).unwrap());
    assert_eq!(index.find(&key(1)).unwrap(), Some(handle(1)));
    assert_eq!(index.find(&key(2)).unwrap(), Some(handle(2)));

    // source absent
    assert!(!index.rekey(&key(3), key(4)).unwrap());

    // same key
    assert!(index.rekey(&key(1), key(1)).unwrap());

    assert!(index.rekey(&key(1), key(5)).unwrap());
    assert_eq!(index.find(&key(1)).unwrap(), None);
    assert_eq!(index.find(&key(5)).unwrap(), Some(handle(1)));
    assert_eq!(index.len(), 2);
}

#[test]
fn test_attach_sees_same_table() {
    let segment = segment(256 * 1024);
    let _guard = segment.write_lock();
    let created = unsafe { Index::<UserSlot>::create(&segment, 0).unwrap() };
    created.insert(key(9), handle(9)).unwrap();

    let attached = unsafe { Index::<UserSlot>::attach(&segment, 0).unwrap() };
    assert_eq!(attached.find(&key(9)).unwrap(), Some(handle(9)));

    // a different key layout must not reinterpret the table
    assert!(unsafe { Index::<UserOnly>::attach(&segment, 0) }.is_err());
}

#[test]
fn test_matches_hashmap_model() {
    let segment = segment(4 * 1024 * 1024);
    let _guard = segment.write_lock();
    let index = unsafe { Index::<UserSlot>::create(&segment, 0).unwrap() };
    let mut model: HashMap<UserSlot, Handle> = HashMap::new();
    let mut rng = fastrand::Rng::with_seed(0x5eed);

    for step in 0..20_000u64 {
        let k = key(rng.u64(..400));
        match rng.u8(..4) {
            0 | 1 => {
                let h = handle(step);
                let expected = !model.contains_key(&k);
                assert_eq!(index.insert(k, h).unwrap(), expected);
                model.entry(k).or_insert(h);
            }
            2 => {
                assert_eq!(index.take(&k).unwrap(), model.remove(&k));
            }
            _ => {
                let to = key(rng.u64(..400));
                let expected = model.contains_key(&k) && (k == to || !model.contains_key(&to));
                assert_eq!(index.rekey(&k, to).unwrap(), expected, "rekey {k:?} -> {to:?}");
                if expected && k != to {
                    let h = model.remove(&k).unwrap();
                    model.insert(to, h);
                }
            }
        }
        assert_eq!(index.len(), model.len());
    }

    let mut all = index.find_all().unwrap();
    all.sort();
    let mut expected: Vec<_> = model.into_iter().collect();
    expected.sort();
    assert_eq!(all, expected);
}
