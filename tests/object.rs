// Object unit test suite.
//
// Each test documents what behavior is being verified and which
// invariants are assumed or asserted. The core invariants exercised:
// - Uniqueness: each key appears at most once; the first value wins for
//   insert, emplace and bulk insertion.
// - Order: iteration follows first-insertion order, forwards and back;
//   overwriting keeps the position, swap_remove fills the hole with the
//   last entry.
// - Capacity: growth preserves contents and order; reserve below the
//   current capacity is a no-op.
// - Storage: every block comes from the bound storage and is returned.
use json_object::{BoundedResource, InsertError, Object, Storage, MAX_SIZE};
use std::sync::Arc;

fn keys<V>(m: &Object<V>) -> Vec<&str> {
    m.keys().collect()
}

// Test: bulk insertion with duplicates.
// Assumes: duplicates later in the input are dropped.
// Verifies: first value wins, order of first occurrence is kept.
#[test]
fn bulk_insert_first_wins() {
    let m = Object::from_range_in(
        [("a", 1), ("b", 2), ("a", 3), ("c", 4), ("b", 5)],
        0,
        Storage::default(),
    )
    .unwrap();
    assert_eq!(keys(&m), ["a", "b", "c"]);
    assert_eq!(m["a"], 1);
    assert_eq!(m["b"], 2);

    let mut m2: Object<i32> = Object::new();
    m2.insert(("b", 0)).unwrap();
    m2.insert_range([("a", 1), ("b", 9)]).unwrap();
    assert_eq!(keys(&m2), ["b", "a"]);
    assert_eq!(m2["b"], 0, "existing key keeps its value");
}

// Test: insert_or_assign on an existing key.
// Verifies: value overwritten, position unchanged, size unchanged.
#[test]
fn insert_or_assign_keeps_position() {
    let mut m: Object<&str> = [("x", "1"), ("y", "2"), ("z", "3")].into_iter().collect();
    let (e, inserted) = m.insert_or_assign("y", "two").unwrap();
    assert!(!inserted);
    assert_eq!(e.key(), "y");
    assert_eq!(keys(&m), ["x", "y", "z"]);
    assert_eq!(m.get("y"), Some(&"two"));

    let (_, inserted) = m.insert_or_assign(String::from("w"), "4").unwrap();
    assert!(inserted);
    assert_eq!(keys(&m), ["x", "y", "z", "w"]);
}

// Test: many single inserts across several growths.
// Verifies: order, lookup and bucket count survive every relocation.
#[test]
fn growth_preserves_order_and_lookup() {
    let mut m: Object<usize> = Object::new();
    let mut buckets = 0;
    for i in 0..2000 {
        m.insert((format!("key{}", i), i)).unwrap();
        assert!(m.bucket_count() >= buckets, "bucket count never shrinks");
        buckets = m.bucket_count();
        assert!(m.bucket_count() >= m.capacity());
    }
    assert_eq!(m.len(), 2000);
    for (n, (k, v)) in m.iter().enumerate() {
        assert_eq!(k, format!("key{}", n));
        assert_eq!(*v, n);
    }
    assert_eq!(m.get("key1234"), Some(&1234));
    assert_eq!(m.get_index_of("key77"), Some(77));
    assert!(m.get("key2000").is_none());
}

#[test]
fn reverse_iteration() {
    let m: Object<i32> = [("a", 1), ("b", 2), ("c", 3)].into_iter().collect();
    let back: Vec<&str> = m.iter().rev().map(|(k, _)| k).collect();
    assert_eq!(back, ["c", "b", "a"]);
    let mut it = m.iter();
    assert_eq!(it.len(), 3);
    assert_eq!(it.next().map(|(k, _)| k), Some("a"));
    assert_eq!(it.next_back().map(|(k, _)| k), Some("c"));
    assert_eq!(it.len(), 1);
}

#[test]
fn iter_mut_and_values_mut() {
    let mut m: Object<i32> = [("a", 1), ("b", 2)].into_iter().collect();
    for (_, v) in m.iter_mut() {
        *v *= 10;
    }
    for v in m.values_mut() {
        *v += 1;
    }
    for (_, v) in &mut m {
        *v += 1;
    }
    assert_eq!(m.values().copied().collect::<Vec<_>>(), [12, 22]);
}

// Test: equality ignores order.
// Verifies: same pairs in different order compare equal; size or value
// difference compares unequal.
#[test]
fn equality_is_order_independent() {
    let a: Object<i32> = [("x", 1), ("y", 2)].into_iter().collect();
    let b: Object<i32> = [("y", 2), ("x", 1)].into_iter().collect();
    assert_eq!(a, b);
    let c: Object<i32> = [("y", 2), ("x", 3)].into_iter().collect();
    assert_ne!(a, c);
    let d: Object<i32> = [("x", 1)].into_iter().collect();
    assert_ne!(a, d);
}

// Test: swap exchanges contents and storage.
#[test]
fn swap_exchanges_everything() {
    let s = Storage::new(BoundedResource::unbounded());
    let mut a: Object<i32> = Object::new_in(s.clone());
    a.insert(("a", 1)).unwrap();
    let mut b: Object<i32> = Object::new();
    b.insert_range([("x", 1), ("y", 2)]).unwrap();

    a.swap(&mut b);
    assert_eq!(keys(&a), ["x", "y"]);
    assert_eq!(keys(&b), ["a"]);
    assert!(a.storage().is_default());
    assert_eq!(*b.storage(), s);
}

// Test: clone is deep and shares the storage.
#[test]
fn clone_copies_in_order() {
    let resource = Arc::new(BoundedResource::unbounded());
    let mut a: Object<String> = Object::new_in(Storage::from_arc(resource.clone()));
    a.insert(("one", "1".to_string())).unwrap();
    a.insert(("two", "2".to_string())).unwrap();
    let mut b = a.clone();
    assert_eq!(a, b);
    assert_eq!(keys(&b), ["one", "two"]);
    assert_eq!(b.storage(), a.storage());
    assert_eq!(resource.live_blocks(), 2);

    b.get_mut("one").unwrap().push('!');
    assert_eq!(a["one"], "1");

    let c = a.try_clone_in(Storage::default()).unwrap();
    assert!(c.storage().is_default());
    assert_eq!(c, a);
}

// Test: reserve policy.
// Verifies: no-op below capacity; max_size is the documented limit.
#[test]
fn reserve_rules() {
    let mut m: Object<u8> = Object::with_capacity(8).unwrap();
    assert_eq!(m.capacity(), 8);
    m.reserve(3).unwrap();
    assert_eq!(m.capacity(), 8);
    assert_eq!(Object::<u8>::max_size(), MAX_SIZE);
    assert!(matches!(
        m.reserve(MAX_SIZE + 1),
        Err(InsertError::TooLarge { .. })
    ));
    assert_eq!(m.capacity(), 8);
}

#[test]
fn get_or_insert_default_and_count() {
    let mut m: Object<Vec<i32>> = Object::new();
    m.get_or_insert_default("list").unwrap().push(1);
    m.get_or_insert_default("list").unwrap().push(2);
    assert_eq!(m["list"], [1, 2]);
    assert_eq!(m.count("list"), 1);
    assert_eq!(m.count("other"), 0);
}

// Test: swap_remove and clear.
// Verifies: the last entry fills the hole; clear keeps capacity.
#[test]
fn swap_remove_and_clear() {
    let mut m: Object<i32> = [("a", 1), ("b", 2), ("c", 3)].into_iter().collect();
    assert_eq!(m.swap_remove_entry("a"), Some(("a".into(), 1)));
    assert_eq!(keys(&m), ["c", "b"]);
    assert_eq!(m.get_key_value("c"), Some(("c", &3)));
    assert_eq!(m.swap_remove("missing"), None);

    let cap = m.capacity();
    m.clear();
    assert!(m.is_empty());
    assert_eq!(m.capacity(), cap);
    assert!(!m.contains_key("b"));
    m.insert(("b", 7)).unwrap();
    assert_eq!(keys(&m), ["b"]);
}

#[test]
#[should_panic]
fn index_missing_key_panics() {
    let m: Object<i32> = Object::new();
    let _ = m["nope"];
}

#[test]
fn extend_keeps_first() {
    let mut m: Object<i32> = Object::new();
    m.extend([("a", 1), ("a", 2)]);
    m.extend(vec![(String::from("b"), 3), (String::from("a"), 4)]);
    assert_eq!(keys(&m), ["a", "b"]);
    assert_eq!(m["a"], 1);
}

#[test]
fn debug_lists_entries_in_order() {
    let m: Object<i32> = [("b", 2), ("a", 1)].into_iter().collect();
    assert_eq!(format!("{:?}", m), r#"{"b": 2, "a": 1}"#);
}

// Test: no storage leaks.
// Assumes: BoundedResource counts live blocks.
// Verifies: every block allocated through the storage is freed once the
// objects using it are gone, across growth, clone and swap_remove.
#[test]
fn storage_balanced_after_drop() {
    let resource = Arc::new(BoundedResource::unbounded());
    {
        let storage = Storage::from_arc(resource.clone());
        let mut m: Object<String> = Object::new_in(storage.clone());
        for i in 0..100 {
            m.insert((format!("{}", i), i.to_string())).unwrap();
        }
        let n = m.clone();
        for i in 0..50 {
            m.swap_remove(&i.to_string());
        }
        let built =
            Object::from_range_in(n.iter().map(|(k, v)| (k, v.clone())), 200, storage).unwrap();
        assert_eq!(built.capacity(), 200);
        assert_eq!(resource.live_blocks(), 3);
    }
    assert_eq!(resource.in_use(), 0);
    assert_eq!(resource.live_blocks(), 0);
}

#[test]
fn object_is_send_and_sync() {
    fn check<T: Send + Sync>() {}
    check::<Object<String>>();
    check::<Storage>();
}

// Test: swapping members returned from two different objects.
// Assumes: insertion calls hand out a key/value view, not the stored pair.
// Verifies: swapping the views, or the values behind them, leaves both
// indexes intact; every key is still found in its own object.
#[test]
fn swapping_members_across_objects_keeps_indexes() {
    let mut big: Object<i32> = Object::new();
    for i in 0..200 {
        big.insert((format!("k{}", i), i)).unwrap();
    }
    let mut small: Object<i32> = Object::new();
    small.insert(("x", -1)).unwrap();

    {
        let (mut a, _) = big.insert(("k199", 0)).unwrap();
        let (mut b, _) = small.insert(("x", 0)).unwrap();
        assert_eq!((a.index(), a.key()), (199, "k199"));
        std::mem::swap(&mut a, &mut b);
        std::mem::swap(a.value_mut(), b.value_mut());
        assert_eq!(a.key(), "x");
    }

    assert_eq!(keys(&small), ["x"]);
    assert_eq!(small.get("x"), Some(&199));
    assert_eq!(small.get("k199"), None);
    assert_eq!(big.get("k199"), Some(&-1));
    assert_eq!(big.get_index_of("k199"), Some(199));
    for i in 0..200 {
        assert!(big.contains_key(&format!("k{}", i)));
    }
}
