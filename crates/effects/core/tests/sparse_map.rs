use std::collections::HashMap;

use effects_core::{SparseSlotMap, Tier};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Set(u32, u64),
    Get(u32),
    Remove(u32),
}

fn op(max_key: u32) -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..max_key, any::<u64>()).prop_map(|(k, v)| Op::Set(k, v)),
        2 => (0..max_key).prop_map(Op::Get),
        1 => (0..max_key).prop_map(Op::Remove),
    ]
}

fn check_against_model(ops: &[Op]) -> Result<(), TestCaseError> {
    let mut map = SparseSlotMap::new();
    let mut model = HashMap::new();
    for op in ops {
        match *op {
            Op::Set(key, value) => {
                prop_assert!(map.insert(key, value).is_ok());
                model.insert(key, value);
            }
            Op::Get(key) => prop_assert_eq!(map.get(key), model.get(&key)),
            Op::Remove(key) => prop_assert_eq!(map.remove(key), model.remove(&key)),
        }
        prop_assert_eq!(map.len(), model.len());
    }
    for (key, value) in &model {
        prop_assert_eq!(map.get(*key), Some(value));
    }
    Ok(())
}

proptest! {
    #[test]
    fn small_key_space_matches_model(ops in prop::collection::vec(op(24), 0..200)) {
        check_against_model(&ops)?;
    }

    #[test]
    fn wide_key_space_matches_model(ops in prop::collection::vec(op(400), 0..600)) {
        check_against_model(&ops)?;
    }

    #[test]
    fn sort_preserves_contents(keys in prop::collection::hash_set(0u32..1_000, 0..200)) {
        let mut map = SparseSlotMap::new();
        for key in &keys {
            map.insert(*key, *key * 2).expect("insert");
        }
        map.sort();
        let sorted: Vec<u32> = map.iter().map(|(k, _)| k).collect();
        let mut expected: Vec<u32> = keys.iter().copied().collect();
        expected.sort_unstable();
        prop_assert_eq!(sorted, expected);
        for key in &keys {
            prop_assert_eq!(map.get(*key), Some(&(*key * 2)));
        }
    }
}

#[test]
fn sequential_growth_reaches_hash_tier() {
    let mut map = SparseSlotMap::new();
    let mut seen = Vec::new();
    for key in 0..200_u32 {
        map.insert(key, key).expect("insert");
        if seen.last() != Some(&map.tier()) {
            seen.push(map.tier());
        }
    }
    assert_eq!(
        seen,
        vec![Tier::Single, Tier::Small, Tier::Array, Tier::Sorted, Tier::Hash]
    );
    for key in 0..200_u32 {
        assert_eq!(map.get(key), Some(&key));
    }
}
