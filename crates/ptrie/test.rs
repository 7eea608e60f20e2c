use super::*;

use std::collections::BTreeSet;

use proptest::collection::{btree_set, vec};
use proptest::prelude::*;

use crate::test_utils::{outward_order, seeded_keys};

type NibbleTrie = PTrie<(), true, 4, { PTR_BYTES as u16 + 1 }, 6, 65536>;
type TinyBuckets = PTrie<(), true, 8, 17, 6, 65536>;

#[test]
fn insert_all_one_byte_keys() {
    let mut set = Set::new();
    for b in 0u16..=255 {
        let (inserted, _) = set.insert(&[b as u8]).unwrap();
        assert!(inserted, "fresh insert of {b:#x} must succeed");
    }
    assert_eq!(set.len(), 256);
    for b in 0u16..=255 {
        let (found, id) = set.exists(&[b as u8]).unwrap();
        assert!(found, "{b:#x} must be present");
        assert_eq!(id, NO_ENTRY);
    }
    set.check_consistency();
}

#[test]
fn erase_descending_one_byte() {
    let mut set = StableSet::new();
    for b in 0u16..=255 {
        assert!(set.insert(&[b as u8]).unwrap().0);
    }
    for i in (0u16..=255).rev() {
        assert!(set.erase(&[i as u8]).unwrap(), "erase of {i:#x} must succeed");
        assert!(!set.exists(&[i as u8]).unwrap().0);
        for j in 0u16..=255 {
            let found = set.exists(&[j as u8]).unwrap().0;
            assert_eq!(found, j < i, "after erasing {i:#x}, {j:#x} wrong");
        }
    }
    assert!(set.is_empty());
    set.check_consistency();
}

#[test]
fn erase_outward_from_midpoint_one_byte() {
    let mut set = Set::new();
    for b in (0u16..=255).rev() {
        assert!(set.insert(&[b as u8]).unwrap().0);
    }
    let mut erased = [false; 256];
    for (k, &victim) in outward_order(256).iter().enumerate() {
        assert!(set.erase(&[victim as u8]).unwrap());
        erased[victim] = true;
        assert_eq!(set.len(), 256 - (k + 1));
        for j in 0..256 {
            let found = set.exists(&[j as u8]).unwrap().0;
            assert_eq!(found, !erased[j], "round {k}: key {j:#x} wrong");
        }
    }
    set.check_consistency();
}

#[test]
fn unpack_random_keys() {
    let keys = seeded_keys(314, 10_240, 20);
    let mut set = StableSet::new();
    let mut ids = Vec::with_capacity(keys.len());
    for key in &keys {
        let (inserted, id) = set.insert(key).unwrap();
        assert!(inserted);
        ids.push(id);
    }
    assert_eq!(set.len(), keys.len());
    set.check_consistency();
    let mut buf = Vec::new();
    for (key, &id) in keys.iter().zip(&ids) {
        assert_eq!(&set.unpack(id).unwrap(), key);
        assert_eq!(set.unpack_into(id, &mut buf).unwrap(), key.len());
        assert_eq!(&buf, key);
    }
}

#[test]
fn neighbors_survive_outward_erase() {
    let keys = seeded_keys(1729, 8_000, 16);
    let mut set = Set::new();
    for key in &keys {
        assert!(set.insert(key).unwrap().0);
    }
    let mut erased = vec![false; keys.len()];
    for (round, &victim) in outward_order(keys.len()).iter().enumerate() {
        assert!(set.erase(&keys[victim]).unwrap(), "round {round}");
        erased[victim] = true;
        let lo = victim.saturating_sub(100);
        let hi = (victim + 100).min(keys.len() - 1);
        for i in lo..=hi {
            let found = set.exists(&keys[i]).unwrap().0;
            assert_eq!(found, !erased[i], "round {round}: neighbor {i} wrong");
        }
    }
    assert!(set.is_empty());
    set.check_consistency();
}

#[test]
fn map_clone_diverges_from_original() {
    let mut map: Map<u64> = Map::new();
    for i in 0..100_000u64 {
        let (inserted, id) = map.insert(&i.to_le_bytes()).unwrap();
        assert!(inserted);
        *map.get_data_mut(id).unwrap() = i;
    }
    let mut copy = map.clone();
    for i in 0..50_000u64 {
        assert!(copy.erase(&i.to_le_bytes()).unwrap());
    }
    assert_eq!(map.len(), 100_000);
    assert_eq!(copy.len(), 50_000);
    for i in 0..100_000u64 {
        let key = i.to_le_bytes();
        let (found, id) = map.exists(&key).unwrap();
        assert!(found, "original lost {i}");
        assert_eq!(*map.get_data(id).unwrap(), i);
        let (in_copy, copy_id) = copy.exists(&key).unwrap();
        assert_eq!(in_copy, i >= 50_000, "copy wrong for {i}");
        if in_copy {
            assert_eq!(*copy.get_data(copy_id).unwrap(), i);
        }
    }
}

#[test]
fn nibble_config_iterates_both_ways() {
    let keys = seeded_keys(2_718, 10_240, 20);
    let mut set = NibbleTrie::new();
    for key in &keys {
        assert!(set.insert(key).unwrap().0);
    }
    set.check_consistency();

    let forward: Vec<Vec<u8>> = set.iter().collect();
    assert_eq!(forward.len(), set.len());
    let distinct: BTreeSet<&Vec<u8>> = forward.iter().collect();
    assert_eq!(distinct.len(), set.len());

    let mut backward = Vec::with_capacity(set.len());
    let mut cursor = set.end();
    while cursor.retreat() {
        backward.push(cursor.key().unwrap());
    }
    assert_eq!(backward.len(), set.len());
    assert_eq!(forward.last(), backward.first());
    assert_eq!(forward.first(), backward.last());
    let mut reversed = backward.clone();
    reversed.reverse();
    assert_eq!(forward, reversed);
}

#[test]
fn duplicate_insert_returns_existing_id() {
    let mut set = StableSet::new();
    let (inserted, id) = set.insert(b"stable").unwrap();
    assert!(inserted);
    for _ in 0..3 {
        let (again, same) = set.insert(b"stable").unwrap();
        assert!(!again);
        assert_eq!(same, id);
    }
    assert_eq!(set.len(), 1);
    // the id survives unrelated churn
    for i in 0..1_000u32 {
        set.insert(&i.to_be_bytes()).unwrap();
    }
    for i in 0..500u32 {
        set.erase(&i.to_be_bytes()).unwrap();
    }
    assert_eq!(set.exists(b"stable").unwrap(), (true, id));
    assert_eq!(set.unpack(id).unwrap(), b"stable");
}

#[test]
fn map_entry_api_inserts_defaults() {
    let mut map: Map<u32> = Map::new();
    *map.entry(b"counter").unwrap() += 1;
    *map.entry(b"counter").unwrap() += 1;
    assert_eq!(map.len(), 1);
    let (found, id) = map.exists(b"counter").unwrap();
    assert!(found);
    assert_eq!(*map.get_data(id).unwrap(), 2);
    assert!(map.erase(b"counter").unwrap());
    assert!(matches!(map.get_data(id), Err(TrieError::StaleEntry(_))));
    assert!(matches!(map.get_data(999), Err(TrieError::StaleEntry(999))));
}

#[test]
fn erase_missing_is_soft() {
    let mut set = Set::new();
    assert!(!set.erase(b"nothing").unwrap());
    set.insert(b"something").unwrap();
    assert!(!set.erase(b"nothing").unwrap());
    assert_eq!(set.len(), 1);
}

#[test]
fn oversized_keys_are_rejected() {
    let mut set = StableSet::new();
    let long = vec![0u8; 65_536];
    assert!(matches!(set.insert(&long), Err(TrieError::KeyTooLong(65_536))));
    assert!(matches!(set.exists(&long), Err(TrieError::KeyTooLong(_))));
    assert!(matches!(set.erase(&long), Err(TrieError::KeyTooLong(_))));
    assert_eq!(set.len(), 0);

    // the maximum length is still fine, heap-escaped body included
    let max = vec![0xA5u8; 65_535];
    let (inserted, id) = set.insert(&max).unwrap();
    assert!(inserted);
    assert!(set.exists(&max).unwrap().0);
    assert_eq!(set.unpack(id).unwrap(), max);
}

#[test]
fn empty_key_round_trip() {
    let mut set = StableSet::new();
    let (inserted, id) = set.insert(b"").unwrap();
    assert!(inserted);
    assert!(set.exists(b"").unwrap().0);
    assert_eq!(set.unpack(id).unwrap(), Vec::<u8>::new());
    assert_eq!(set.iter().count(), 1);
    assert!(set.erase(b"").unwrap());
    assert!(set.is_empty());
}

#[test]
fn nested_prefixes_coexist() {
    let pattern: Vec<u8> = (0..300u32).map(|i| (i * 7) as u8).collect();
    let mut set = Set::new();
    for len in 0..=pattern.len() {
        assert!(set.insert(&pattern[..len]).unwrap().0);
    }
    assert_eq!(set.len(), pattern.len() + 1);
    set.check_consistency();
    for len in (0..=pattern.len()).step_by(2) {
        assert!(set.erase(&pattern[..len]).unwrap());
    }
    for len in 0..=pattern.len() {
        assert_eq!(set.exists(&pattern[..len]).unwrap().0, len % 2 == 1);
    }
    set.check_consistency();
}

#[test]
fn backpointers_survive_colocated_erase() {
    let mut set = StableSet::new();
    let keys: Vec<[u8; 2]> = (0..10u8).map(|i| [i, 0xEE]).collect();
    let ids: Vec<usize> = keys.iter().map(|k| set.insert(k).unwrap().1).collect();
    // all ten share a bucket near the root; removing one must not disturb
    // the survivors' entries
    assert!(set.erase(&keys[4]).unwrap());
    assert!(matches!(set.unpack(ids[4]), Err(TrieError::StaleEntry(_))));
    for (i, key) in keys.iter().enumerate() {
        if i == 4 {
            continue;
        }
        assert_eq!(set.unpack(ids[i]).unwrap(), key);
        assert_eq!(set.exists(key).unwrap(), (true, ids[i]));
    }
    set.check_consistency();
}

#[test]
fn clone_is_read_equivalent() {
    let keys = seeded_keys(99, 3_000, 12);
    let mut set = StableSet::new();
    let ids: Vec<usize> = keys.iter().map(|k| set.insert(k).unwrap().1).collect();
    for key in keys.iter().step_by(3) {
        set.erase(key).unwrap();
    }
    let copy = set.clone();
    assert_eq!(copy.len(), set.len());
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(set.exists(key).unwrap(), copy.exists(key).unwrap());
        match set.unpack(ids[i]) {
            Ok(orig) => assert_eq!(copy.unpack(ids[i]).unwrap(), orig),
            Err(_) => assert!(copy.unpack(ids[i]).is_err()),
        }
    }
    let forward: Vec<Vec<u8>> = set.iter().collect();
    let copied: Vec<Vec<u8>> = copy.iter().collect();
    assert_eq!(forward, copied);
    copy.check_consistency();

    // mutating the original must not leak into the copy
    let mut set = set;
    for key in &keys {
        set.erase(key).unwrap();
    }
    assert!(set.is_empty());
    assert_eq!(copy.iter().count(), copied.len());
    copy.check_consistency();
}

#[test]
fn heap_bodies_migrate_across_splits_and_merges() {
    // a long shared prefix forces forward splits to shave bodies below
    // HEAPBOUND, and merges to grow them back over it
    let mut set = TinyBuckets::new();
    let mut keys = Vec::new();
    for i in 0..40u8 {
        let mut key = vec![0xCD; 24];
        key[22] = i;
        key[23] = i.wrapping_mul(3);
        keys.push(key);
    }
    let ids: Vec<usize> = keys.iter().map(|k| set.insert(k).unwrap().1).collect();
    set.check_consistency();
    for (key, &id) in keys.iter().zip(&ids) {
        assert_eq!(&set.unpack(id).unwrap(), key);
    }
    for key in keys.iter().skip(1) {
        assert!(set.erase(key).unwrap());
    }
    set.check_consistency();
    assert_eq!(set.len(), 1);
    assert_eq!(&set.unpack(ids[0]).unwrap(), &keys[0]);
    assert!(set.exists(&keys[0]).unwrap().0);
}

#[test]
fn mixed_length_random_round_trip() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(42);
    let mut set = StableSet::new();
    let mut live: Vec<(Vec<u8>, usize)> = Vec::new();
    for _ in 0..4_000 {
        let len = rng.gen_range(0..320);
        let key: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
        let (inserted, id) = set.insert(&key).unwrap();
        if inserted {
            live.push((key, id));
        }
    }
    set.check_consistency();
    for (key, id) in &live {
        assert_eq!(&set.unpack(*id).unwrap(), key);
        assert_eq!(set.exists(key).unwrap(), (true, *id));
    }
}

#[test]
fn clear_resets_to_fresh_state() {
    let mut set = StableSet::new();
    let (_, id) = set.insert(b"gone after clear").unwrap();
    for i in 0..1_000u32 {
        set.insert(&i.to_le_bytes()).unwrap();
    }
    set.clear();
    assert!(set.is_empty());
    assert!(set.iter().next().is_none());
    assert!(!set.exists(b"gone after clear").unwrap().0);
    assert!(set.unpack(id).is_err());
    let (inserted, fresh) = set.insert(b"gone after clear").unwrap();
    assert!(inserted);
    assert_eq!(fresh, 0);
    set.check_consistency();
}

#[test]
fn iteration_is_deterministic_and_complete() {
    let mut set = Set::new();
    for i in 0..1_000u16 {
        set.insert(&i.to_be_bytes()).unwrap();
    }
    let first: Vec<Vec<u8>> = set.iter().collect();
    let second: Vec<Vec<u8>> = set.iter().collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 1_000);
    let distinct: BTreeSet<&Vec<u8>> = first.iter().collect();
    assert_eq!(distinct.len(), 1_000);

    let empty = Set::new();
    assert!(empty.begin().is_end());
    assert!(empty.begin().key().is_none());
    assert!(!empty.end().retreat());
}

#[test]
fn cursor_advance_retreat_are_inverse() {
    let keys = seeded_keys(7, 500, 6);
    let mut set = StableSet::new();
    for key in &keys {
        set.insert(key).unwrap();
    }
    let mut cursor = set.begin();
    let mut walked = 1;
    while cursor.advance() {
        walked += 1;
    }
    assert_eq!(walked, set.len());
    assert!(cursor.is_end());
    let mut back = 0;
    while cursor.retreat() {
        back += 1;
    }
    assert_eq!(back, set.len());
    assert_eq!(cursor.key(), set.begin().key());
}

proptest! {
    #[test]
    fn proptest_insert_exists_erase(data in btree_set(vec(any::<u8>(), 0..40), 1..100)) {
        let mut set = Set::new();
        for key in &data {
            prop_assert!(set.insert(key).unwrap().0);
        }
        prop_assert_eq!(set.len(), data.len());
        for key in &data {
            prop_assert!(set.exists(key).unwrap().0);
        }
        // remove all keys with an odd first byte
        let remove = |key: &Vec<u8>| key.first().is_some_and(|b| b % 2 != 0);
        for key in &data {
            if remove(key) {
                prop_assert!(set.erase(key).unwrap());
            }
        }
        for key in &data {
            prop_assert_eq!(set.exists(key).unwrap().0, !remove(key));
        }
        set.check_consistency();
    }

    #[test]
    fn proptest_unpack_round_trip_small_config(data in btree_set(vec(any::<u8>(), 0..32), 1..80)) {
        let mut set = NibbleTrie::new();
        let mut live = Vec::new();
        for key in &data {
            let (inserted, id) = set.insert(key).unwrap();
            prop_assert!(inserted);
            live.push((key.clone(), id));
        }
        // erase every other key, splits and merges included
        let mut kept = Vec::new();
        for (i, (key, id)) in live.into_iter().enumerate() {
            if i % 2 == 0 {
                prop_assert!(set.erase(&key).unwrap());
                prop_assert!(set.unpack(id).is_err());
            } else {
                kept.push((key, id));
            }
        }
        for (key, id) in kept {
            prop_assert_eq!(set.exists(&key).unwrap(), (true, id));
            prop_assert_eq!(set.unpack(id).unwrap(), key);
        }
        set.check_consistency();
    }

    #[test]
    fn proptest_interleaved_against_model(ops in vec((vec(any::<u8>(), 0..12), any::<bool>()), 1..300)) {
        let mut set = TinyBuckets::new();
        let mut model = BTreeSet::new();
        for (key, insert) in &ops {
            if *insert {
                let (fresh, _) = set.insert(key).unwrap();
                prop_assert_eq!(fresh, model.insert(key.clone()));
            } else {
                let removed = set.erase(key).unwrap();
                prop_assert_eq!(removed, model.remove(key));
            }
            prop_assert_eq!(set.len(), model.len());
        }
        for key in &model {
            prop_assert!(set.exists(key).unwrap().0);
        }
        let mut seen: Vec<Vec<u8>> = set.iter().collect();
        seen.sort();
        let expected: Vec<Vec<u8>> = model.iter().cloned().collect();
        prop_assert_eq!(seen, expected);
        set.check_consistency();
    }
}
