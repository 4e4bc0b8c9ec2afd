//! Proptest strategies for core types.

use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use replidb_core::{DBChanges, Timestamp, Value};

/// Strategy for scalar (leaf) values.
pub fn scalar_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        // Finite doubles only; NaN payloads do not survive the JSON wire.
        (-1e9f64..1e9).prop_map(Value::Number),
        (0i64..4_000_000_000_000).prop_map(Value::Date),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

/// Strategy for arbitrary documents up to a small depth.
pub fn document() -> impl Strategy<Value = Value> {
    let leaf = scalar_value();
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..4).prop_map(Value::Array),
            vec(inner.clone(), 0..4).prop_map(Value::set),
            btree_map("[a-z]{1,6}", inner, 1..4).prop_map(Value::Object),
        ]
    })
}

/// Strategy for partial documents suitable as `sets` entries: always a
/// non-empty object at the top.
pub fn partial_document() -> impl Strategy<Value = Value> {
    btree_map("[a-z]{1,6}", document(), 1..4).prop_map(Value::Object)
}

/// Strategy for change batches over a small id space, so merges actually
/// collide.
pub fn change_batch() -> impl Strategy<Value = DBChanges> {
    let set = ("[ab]", "[1-4]", partial_document())
        .prop_map(|(c, id, doc)| (c, id, Some(doc)));
    let delete = ("[ab]", "[1-4]").prop_map(|(c, id)| (c, id, None));
    vec(prop_oneof![4 => set, 1 => delete], 1..6).prop_map(|ops| {
        let mut changes = DBChanges::new();
        for (collection, id, op) in ops {
            match op {
                Some(doc) => changes.set(collection, id, doc),
                None => changes.delete(collection, id),
            }
        }
        changes
    })
}

/// Strategy for timestamps of either encoding.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    prop_oneof![
        (0u64..1000, "[a-d]").prop_map(|(seq, client)| Timestamp::counter(seq, client)),
        (0u64..1000, 0u32..10, "[a-d]")
            .prop_map(|(ms, logical, client)| Timestamp::hybrid(ms, logical, client)),
    ]
}
