use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::{HeapOptions, RobinStore, SpillHeap, StoreOptions};

/// Operations applied to both the store and a reference model.
#[derive(Debug, Clone)]
enum Action {
    Set(Vec<u8>, Vec<u8>),
    Del(Vec<u8>),
    Get(Vec<u8>),
}

/// Keys drawn mostly from a tiny alphabet so collisions, updates and
/// deletes of present keys actually happen.
fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        3 => proptest::collection::vec(prop_oneof![Just(b'a'), Just(b'b'), Just(b'c')], 1..4),
        1 => proptest::collection::vec(any::<u8>(), 1..16),
    ]
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (key_strategy(), proptest::collection::vec(any::<u8>(), 0..24))
            .prop_map(|(key, value)| Action::Set(key, value)),
        1 => key_strategy().prop_map(Action::Del),
        1 => key_strategy().prop_map(Action::Get),
    ]
}

fn byte_items(max_len: usize, count: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..max_len), 1..count)
}

proptest! {
    /// The store agrees with a `BTreeMap` model after every operation, and
    /// the Robin-Hood structural invariants hold throughout.
    #[test]
    fn prop_store_matches_model(actions in proptest::collection::vec(action_strategy(), 1..200)) {
        let mut store = RobinStore::create(StoreOptions::default().with_capacity(2));
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for action in actions {
            match action {
                Action::Set(key, value) => {
                    let was_new = store.set(&key, &value).unwrap();
                    prop_assert_eq!(was_new, !model.contains_key(&key));
                    model.insert(key, value);
                }
                Action::Del(key) => {
                    let previous = store.del(&key).unwrap().map(|v| v.to_vec());
                    prop_assert_eq!(previous, model.remove(&key));
                }
                Action::Get(key) => {
                    prop_assert_eq!(store.get(&key), model.get(&key).map(|v| v.as_slice()));
                }
            }
            prop_assert_eq!(store.count(), model.len());
            store.check_invariants();
        }

        let mut seen = BTreeMap::new();
        store
            .visit(|key, value| {
                seen.insert(key.to_vec(), value.to_vec());
                true
            })
            .unwrap();
        prop_assert_eq!(seen, model);
    }

    /// Replaying the same operations after a reset lands every key in the
    /// same slot as a store created fresh at the post-reset capacity.
    #[test]
    fn prop_reset_equals_fresh(actions in proptest::collection::vec(action_strategy(), 1..60)) {
        let mut replayed = RobinStore::create(StoreOptions::default().with_capacity(8));
        for action in &actions {
            apply(&mut replayed, action);
        }
        replayed.reset().unwrap();
        let capacity = replayed.capacity();
        for action in &actions {
            apply(&mut replayed, action);
        }

        let mut fresh = RobinStore::create(StoreOptions::default().with_capacity(capacity));
        for action in &actions {
            apply(&mut fresh, action);
        }

        prop_assert_eq!(replayed.capacity(), fresh.capacity());
        for index in 0..fresh.capacity() {
            prop_assert_eq!(replayed.slot_key(index), fresh.slot_key(index));
        }
    }

    /// Popping everything yields the multiset of pushed items in
    /// comparator order.
    #[test]
    fn prop_heap_pops_sorted(items in byte_items(32, 100)) {
        let mut heap = SpillHeap::create(|a: &[u8], b: &[u8]| a < b, "", HeapOptions::default());
        for item in &items {
            heap.push(item).unwrap();
        }

        let mut sorted = items.clone();
        sorted.sort();

        let mut popped = Vec::new();
        while heap.len() > 0 {
            popped.push(heap.pop().unwrap().unwrap().to_vec());
        }
        prop_assert_eq!(popped, sorted);
    }

    /// `sort(0)` leaves the slots in non-decreasing order without moving a
    /// single data byte.
    #[test]
    fn prop_heap_sort_ascending(items in byte_items(16, 100)) {
        let mut heap = SpillHeap::create(|a: &[u8], b: &[u8]| a < b, "", HeapOptions::default());
        for item in &items {
            heap.push(item).unwrap();
        }
        let data_len = heap.data_len();

        heap.sort(0).unwrap();
        prop_assert_eq!(heap.data_len(), data_len);

        let mut sorted = items.clone();
        sorted.sort();
        for (index, expected) in sorted.iter().enumerate() {
            prop_assert_eq!(heap.get(index).unwrap(), expected.as_slice());
        }
    }
}

fn apply(store: &mut RobinStore, action: &Action) {
    match action {
        Action::Set(key, value) => {
            store.set(key, value).unwrap();
        }
        Action::Del(key) => {
            store.del(key).unwrap();
        }
        Action::Get(key) => {
            store.get(key);
        }
    }
}
