#![cfg(test)]

// Property tests for Object kept inside the crate so the chain structure
// can be checked after every operation.

use crate::object::Object;
use proptest::prelude::*;

// Operations name keys by position in a small random pool, so the same keys
// recur often enough to hit the duplicate and overwrite paths.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertOrAssign(usize, i32),
    Emplace(usize, i32),
    GetOrDefault(usize),
    SwapRemove(usize),
    Get(String),
    Reserve(usize),
    InsertRange(Vec<(usize, i32)>),
    Clear,
    Iterate,
}

// Ordered reference model: a vector of pairs in insertion order.
#[derive(Default)]
struct Model(Vec<(String, i32)>);

impl Model {
    fn position(&self, k: &str) -> Option<usize> {
        self.0.iter().position(|(mk, _)| mk == k)
    }

    fn insert_if_absent(&mut self, k: &str, v: i32) -> bool {
        if self.position(k).is_some() {
            return false;
        }
        self.0.push((k.to_string(), v));
        true
    }

    fn swap_remove(&mut self, k: &str) -> Option<i32> {
        let i = self.position(k)?;
        Some(self.0.swap_remove(i).1)
    }
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,4}", 1..=12).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let get_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertOrAssign(i, v)),
            (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Emplace(i, v)),
            idx.clone().prop_map(OpI::GetOrDefault),
            idx.clone().prop_map(OpI::SwapRemove),
            prop_oneof![get_pool.prop_map(|s: String| s), "[a-z]{0,4}".prop_map(|s| s)]
                .prop_map(OpI::Get),
            (0usize..40).prop_map(OpI::Reserve),
            proptest::collection::vec((idx.clone(), any::<i32>()), 0..10)
                .prop_map(OpI::InsertRange),
            Just(OpI::Clear),
            Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Property: state-machine equivalence against an ordered vector of pairs.
// Invariants exercised across random operation sequences:
// - Iteration order equals first-insertion order, with `swap_remove`
//   moving the last entry into the hole.
// - Duplicate `insert`/`emplace` and duplicates within a batch keep the
//   first value; `insert_or_assign` overwrites in place.
// - Every live entry is reachable from exactly one chain, in its bucket.
// - `len`, `get`, `get_index_of` parity with the model after each op.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let mut sut: Object<i32> = Object::new();
        let mut model = Model::default();

        for op in ops {
            match op {
                OpI::Insert(i, v) => {
                    let k = pool[i].as_str();
                    let expected = model.insert_if_absent(k, v);
                    let (e, inserted) = sut.insert((k, v)).unwrap();
                    prop_assert_eq!(inserted, expected);
                    prop_assert_eq!(e.key(), k);
                }
                OpI::InsertOrAssign(i, v) => {
                    let k = pool[i].as_str();
                    let expected = match model.position(k) {
                        Some(p) => { model.0[p].1 = v; false }
                        None => { model.0.push((k.to_string(), v)); true }
                    };
                    let (e, inserted) = sut.insert_or_assign(k, v).unwrap();
                    prop_assert_eq!(inserted, expected);
                    prop_assert_eq!(*e.value(), v);
                }
                OpI::Emplace(i, v) => {
                    let k = pool[i].as_str();
                    let expected = model.insert_if_absent(k, v);
                    let mut ran = false;
                    let (_, inserted) = sut.emplace(k, || { ran = true; v }).unwrap();
                    prop_assert_eq!(inserted, expected);
                    prop_assert_eq!(ran, expected, "constructor runs only for new keys");
                }
                OpI::GetOrDefault(i) => {
                    let k = pool[i].as_str();
                    model.insert_if_absent(k, 0);
                    let got = *sut.get_or_insert_default(k).unwrap();
                    let p = model.position(k).unwrap();
                    prop_assert_eq!(got, model.0[p].1);
                }
                OpI::SwapRemove(i) => {
                    let k = pool[i].as_str();
                    prop_assert_eq!(sut.swap_remove(k), model.swap_remove(k));
                }
                OpI::Get(s) => {
                    let want = model.position(&s).map(|p| &model.0[p].1);
                    prop_assert_eq!(sut.get(&s), want);
                    prop_assert_eq!(sut.get_index_of(&s), model.position(&s));
                    prop_assert_eq!(sut.count(&s), usize::from(want.is_some()));
                }
                OpI::Reserve(n) => {
                    let before = sut.capacity();
                    sut.reserve(n).unwrap();
                    prop_assert!(sut.capacity() >= n);
                    prop_assert!(sut.capacity() >= before);
                }
                OpI::InsertRange(items) => {
                    let batch: Vec<(&str, i32)> =
                        items.iter().map(|&(i, v)| (pool[i].as_str(), v)).collect();
                    for &(k, v) in &batch {
                        model.insert_if_absent(k, v);
                    }
                    sut.insert_exact(batch).unwrap();
                }
                OpI::Clear => {
                    let cap = sut.capacity();
                    sut.clear();
                    model.0.clear();
                    prop_assert_eq!(sut.capacity(), cap);
                }
                OpI::Iterate => {
                    let fwd: Vec<(&str, i32)> = sut.iter().map(|(k, v)| (k, *v)).collect();
                    let want: Vec<(&str, i32)> =
                        model.0.iter().map(|(k, v)| (k.as_str(), *v)).collect();
                    prop_assert_eq!(&fwd, &want);
                    let mut back: Vec<(&str, i32)> = sut.iter().rev().map(|(k, v)| (k, *v)).collect();
                    back.reverse();
                    prop_assert_eq!(back, want);
                }
            }

            // Post-conditions after each op
            sut.table.assert_consistent();
            prop_assert_eq!(sut.len(), model.0.len());
            prop_assert_eq!(sut.is_empty(), model.0.is_empty());
            let keys: Vec<&str> = sut.keys().collect();
            let want: Vec<&str> = model.0.iter().map(|(k, _)| k.as_str()).collect();
            prop_assert_eq!(keys, want);
        }
    }
}

// Property: a failing batch is invisible. Whatever prefix of the batch was
// built, the object afterwards matches its state before the call.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_failed_batch_rolls_back(
        (pool, seed) in proptest::collection::vec("[a-z]{1,3}", 1..=10)
            .prop_flat_map(|pool| {
                let n = pool.len();
                (Just(pool), proptest::collection::vec(0..n, 0..8))
            }),
        batch in proptest::collection::vec((0usize..10, any::<i32>()), 0..12),
        fail_at in 0usize..12,
    ) {
        let mut sut: Object<i32> = Object::new();
        for &i in &seed {
            sut.insert((pool[i].as_str(), i as i32)).unwrap();
        }
        let before: Vec<(String, i32)> = sut.iter().map(|(k, v)| (k.to_string(), *v)).collect();

        let items = batch.iter().enumerate().map(|(n, &(i, v))| {
            if n == fail_at {
                Err("boom")
            } else {
                Ok((pool[i % pool.len()].as_str(), v))
            }
        });
        let res = sut.try_insert_range(items);

        if fail_at < batch.len() {
            prop_assert_eq!(res, Err(crate::InsertError::Payload("boom")));
            let after: Vec<(String, i32)> = sut.iter().map(|(k, v)| (k.to_string(), *v)).collect();
            prop_assert_eq!(after, before);
        } else {
            prop_assert!(res.is_ok());
        }
        sut.table.assert_consistent();
    }
}
