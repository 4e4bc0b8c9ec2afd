//! Semantic query hashing.
//!
//! Subscriptions are keyed by a hash over the query's *semantic* fields
//! only. Incidental fields (request ids, client bookkeeping) are excluded,
//! so two structurally equal queries from different connections share one
//! subscription key on both sides of the wire.

use replidb_core::Query;
use sha2::{Digest, Sha256};

/// Fields of a query JSON object that carry meaning for subscription
/// identity, in canonical order.
const SEMANTIC_FIELDS: [&str; 8] = [
    "collectionName",
    "where",
    "order",
    "limit",
    "after",
    "select",
    "include",
    "vars",
];

/// Hashes a query's semantic fields.
pub fn query_hash(query: &Query) -> String {
    // Query serializes to exactly its semantic fields, absent ones skipped.
    let json = serde_json::to_value(query).unwrap_or(serde_json::Value::Null);
    query_hash_json(&json)
}

/// Hashes an arbitrary query-shaped JSON object, ignoring non-semantic
/// fields.
pub fn query_hash_json(query: &serde_json::Value) -> String {
    let mut canonical = serde_json::Map::new();
    if let serde_json::Value::Object(map) = query {
        for field in SEMANTIC_FIELDS {
            if let Some(value) = map.get(field) {
                if !value.is_null() {
                    canonical.insert(field.to_string(), value.clone());
                }
            }
        }
    }
    // serde_json maps serialize with sorted keys, so nested objects are
    // already canonical.
    let serialized = serde_json::Value::Object(canonical).to_string();
    let digest = Sha256::digest(serialized.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use replidb_core::{Direction, FilterOp, Value};

    #[test]
    fn non_semantic_fields_are_ignored() {
        let a = serde_json::json!({
            "collectionName": "t",
            "where": [["x", "=", 1]],
            "extra": "ignored"
        });
        let b = serde_json::json!({
            "collectionName": "t",
            "where": [["x", "=", 1]],
            "extra": "different"
        });
        assert_eq!(query_hash_json(&a), query_hash_json(&b));
    }

    #[test]
    fn semantic_fields_change_the_hash() {
        let a = serde_json::json!({ "collectionName": "t", "limit": 1 });
        let b = serde_json::json!({ "collectionName": "t", "limit": 2 });
        assert_ne!(query_hash_json(&a), query_hash_json(&b));
    }

    #[test]
    fn typed_query_matches_its_json_shape() {
        let query = Query::collection("users")
            .filter("age", FilterOp::Gt, Value::Number(24.0))
            .order_by("age", Direction::Asc)
            .limit(2);
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(query_hash(&query), query_hash_json(&json));
    }

    #[test]
    fn structurally_equal_queries_share_a_hash() {
        let a = Query::collection("users").limit(5);
        let b = Query::collection("users").limit(5);
        assert_eq!(query_hash(&a), query_hash(&b));
    }
}
