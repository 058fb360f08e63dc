//! Iterator semantics: seek bounds, version walks, reverse comparators,
//! and the uint64 adapter.

mod support;

use std::sync::Arc;
use support::*;
use ziptable::{Comparator, EntryType, TableOptions};
use ziptable_core::parse_internal_key;

fn opts() -> Arc<TableOptions> {
    Arc::new(TableOptions::default())
}

const MAX_SEQ: u64 = (1 << 56) - 1;

#[test]
fn seek_lands_on_lower_bound() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.zt");
    build_table(
        &path,
        Comparator::bytewise(),
        opts(),
        &[
            (b"bar", 5, EntryType::Value, b"1"),
            (b"baz", 5, EntryType::Value, b"2"),
            (b"foo", 5, EntryType::Value, b"3"),
        ],
    );
    let reader = open_table(&path, &opts(), &Comparator::bytewise());
    let mut it = reader.new_iterator();

    it.seek(&ikey(b"bas", MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"baz");

    it.seek(&ikey(b"foo", MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"foo");

    it.seek(&ikey(b"fop", MAX_SEQ, EntryType::Value));
    assert!(!it.valid());

    it.seek(&ikey(b"", MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"bar");
}

#[test]
fn seek_respects_sequence_visibility() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.zt");
    build_table(
        &path,
        Comparator::bytewise(),
        opts(),
        &[
            (b"k", 9, EntryType::Deletion, b""),
            (b"k", 7, EntryType::Value, b"b"),
            (b"k", 3, EntryType::Value, b"a"),
            (b"z", 1, EntryType::Value, b"zz"),
        ],
    );
    let reader = open_table(&path, &opts(), &Comparator::bytewise());
    let mut it = reader.new_iterator();

    // seeking at seq 8 skips the newer tombstone
    it.seek(&ikey(b"k", 8, EntryType::Value));
    assert!(it.valid());
    let pik = parse_internal_key(it.key()).unwrap();
    assert_eq!(pik.user_key, b"k");
    assert_eq!(pik.sequence, 7);

    // at seq 10 the newest version is visible
    it.seek(&ikey(b"k", 10, EntryType::Value));
    let pik = parse_internal_key(it.key()).unwrap();
    assert_eq!(pik.sequence, 9);
    assert_eq!(pik.entry_type, EntryType::Deletion);

    // no version of k is visible at seq 2: the iterator moves on to z
    it.seek(&ikey(b"k", 2, EntryType::Value));
    assert!(it.valid());
    let pik = parse_internal_key(it.key()).unwrap();
    assert_eq!(pik.user_key, b"z");
}

#[test]
fn seek_against_the_common_prefix_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.zt");
    build_table(
        &path,
        Comparator::bytewise(),
        opts(),
        &[
            (b"prefix_a", 5, EntryType::Value, b"1"),
            (b"prefix_m", 5, EntryType::Value, b"2"),
            (b"prefix_z", 5, EntryType::Value, b"3"),
        ],
    );
    let reader = open_table(&path, &opts(), &Comparator::bytewise());
    let mut it = reader.new_iterator();

    // target is a proper prefix of the common prefix: before every key
    it.seek(&ikey(b"pre", MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"prefix_a");

    // diverges below the common prefix: still before every key
    it.seek(&ikey(b"prefiw", MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"prefix_a");

    // diverges above the common prefix: after every key
    it.seek(&ikey(b"prefiy", MAX_SEQ, EntryType::Value));
    assert!(!it.valid());

    // inside the prefix space: ordinary lower bound
    it.seek(&ikey(b"prefix_b", MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"prefix_m");
}

#[test]
fn next_and_prev_walk_versions_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.zt");
    build_table(
        &path,
        Comparator::bytewise(),
        opts(),
        &[
            (b"a", 6, EntryType::Value, b"a6"),
            (b"a", 2, EntryType::Value, b"a2"),
            (b"b", 4, EntryType::Value, b"b4"),
        ],
    );
    let reader = open_table(&path, &opts(), &Comparator::bytewise());

    let forward = scan_forward(&reader);
    let expected = vec![
        (ikey(b"a", 6, EntryType::Value), b"a6".to_vec()),
        (ikey(b"a", 2, EntryType::Value), b"a2".to_vec()),
        (ikey(b"b", 4, EntryType::Value), b"b4".to_vec()),
    ];
    assert_eq!(forward, expected);

    // a full backward walk is the exact reversal
    let mut backward = scan_backward(&reader);
    backward.reverse();
    assert_eq!(backward, expected);

    // mixed stepping across a record boundary
    let mut it = reader.new_iterator();
    it.seek(&ikey(b"b", MAX_SEQ, EntryType::Value));
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"b");
    it.prev();
    let pik = parse_internal_key(it.key()).unwrap();
    assert_eq!((pik.user_key, pik.sequence), (b"a".as_ref(), 2));
    it.next();
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"b");
}

#[test]
fn reverse_comparator_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.zt");
    let rev = Comparator::reverse_bytewise("rev:leveldb.BytewiseComparator");
    // comparator-ascending order is byte-lex descending
    build_table(
        &path,
        rev.clone(),
        opts(),
        &[
            (b"b", 1, EntryType::Value, b"2"),
            (b"a", 1, EntryType::Value, b"1"),
        ],
    );
    let reader = open_table(&path, &opts(), &rev);

    let forward = scan_forward(&reader);
    let keys: Vec<&[u8]> = forward
        .iter()
        .map(|(k, _)| parse_internal_key(k).unwrap().user_key)
        .collect();
    assert_eq!(keys, vec![b"b".as_ref(), b"a".as_ref()]);

    let mut backward = scan_backward(&reader);
    backward.reverse();
    assert_eq!(backward, forward);

    // lower bound in comparator order: "aa" sorts between "b" and "a"
    let mut it = reader.new_iterator();
    it.seek(&ikey(b"aa", MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"a");

    // largest entry at or before "aa" in comparator order is "b"
    it.seek_for_prev(&ikey(b"aa", MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"b");

    // before everything in comparator order
    it.seek(&ikey(b"zz", MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"b");

    // after everything in comparator order
    it.seek(&ikey(b"", MAX_SEQ, EntryType::Value));
    assert!(!it.valid());
}

#[test]
fn reverse_comparator_multi_version_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.zt");
    let rev = Comparator::reverse_bytewise("rev:leveldb.BytewiseComparator");
    build_table(
        &path,
        rev.clone(),
        opts(),
        &[
            (b"y", 8, EntryType::Value, b"y8"),
            (b"y", 4, EntryType::Value, b"y4"),
            (b"x", 6, EntryType::Value, b"x6"),
        ],
    );
    let reader = open_table(&path, &opts(), &rev);
    let forward = scan_forward(&reader);
    let expected = vec![
        (ikey(b"y", 8, EntryType::Value), b"y8".to_vec()),
        (ikey(b"y", 4, EntryType::Value), b"y4".to_vec()),
        (ikey(b"x", 6, EntryType::Value), b"x6".to_vec()),
    ];
    assert_eq!(forward, expected);

    let mut backward = scan_backward(&reader);
    backward.reverse();
    assert_eq!(backward, expected);
}

#[test]
fn uint64_iterator_orders_numerically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.zt");
    let cmp = Comparator::uint64();
    let keys: Vec<[u8; 8]> = [1u64, 256, 257]
        .iter()
        .map(|v| v.to_ne_bytes())
        .collect();
    build_table(
        &path,
        cmp.clone(),
        opts(),
        &[
            (&keys[0], 5, EntryType::Value, b"one"),
            (&keys[1], 5, EntryType::Value, b"two-five-six"),
            (&keys[2], 5, EntryType::Value, b"two-five-seven"),
        ],
    );
    let reader = open_table(&path, &opts(), &cmp);

    let forward = scan_forward(&reader);
    let scanned: Vec<u64> = forward
        .iter()
        .map(|(k, _)| {
            let pik = parse_internal_key(k).unwrap();
            u64::from_ne_bytes(pik.user_key.try_into().unwrap())
        })
        .collect();
    assert_eq!(scanned, vec![1, 256, 257]);

    // point lookups go through the same swap adapter
    let versions = get_versions(&reader, &255u64.to_ne_bytes(), 10);
    assert!(versions.is_empty());
    let versions = get_versions(&reader, &256u64.to_ne_bytes(), 10);
    assert_eq!(versions[0].value, b"two-five-six");

    // numeric lower bound: 255 positions at 256
    let mut it = reader.new_iterator();
    it.seek(&ikey(&255u64.to_ne_bytes(), MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    let pik = parse_internal_key(it.key()).unwrap();
    assert_eq!(u64::from_ne_bytes(pik.user_key.try_into().unwrap()), 256);

    // past the largest key
    it.seek(&ikey(&300u64.to_ne_bytes(), MAX_SEQ, EntryType::Value));
    assert!(!it.valid());
}

#[test]
fn seek_for_prev_on_bytewise_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.zt");
    build_table(
        &path,
        Comparator::bytewise(),
        opts(),
        &[
            (b"b", 5, EntryType::Value, b"1"),
            (b"d", 5, EntryType::Value, b"2"),
        ],
    );
    let reader = open_table(&path, &opts(), &Comparator::bytewise());
    let mut it = reader.new_iterator();

    it.seek_for_prev(&ikey(b"c", MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"b");

    it.seek_for_prev(&ikey(b"z", MAX_SEQ, EntryType::Value));
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"d");

    it.seek_for_prev(&ikey(b"a", MAX_SEQ, EntryType::Value));
    assert!(!it.valid());
}
