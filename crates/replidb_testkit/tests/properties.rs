//! Cross-crate properties: merge convergence, cursor completeness, clock
//! monotonicity over persisted state.

use proptest::prelude::*;
use replidb_core::{Cursor, Direction, FilterOp, Query, Timestamp, Value};
use replidb_testkit::{change_batch, memory_db, obj, seeded_db, timestamp};

/// Dumps every entity of every collection, in a canonical shape.
fn dump(db: &replidb_core::Database) -> Vec<(String, Vec<(String, Value)>)> {
    ["a", "b", "nums", "users"]
        .iter()
        .map(|collection| {
            let rows = db
                .fetch(&Query::collection(*collection))
                .expect("dump fetch");
            ((*collection).to_string(), rows)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Applying the same timestamped batches in any two orders leaves two
    /// independent replicas identical.
    #[test]
    fn merge_is_order_independent(
        batches in proptest::collection::vec((change_batch(), timestamp()), 1..5),
        seed in any::<u64>(),
    ) {
        // Two batches sharing one timestamp would be a genuine write
        // conflict, not a merge; keep the first per timestamp.
        let mut seen = std::collections::BTreeSet::new();
        let batches: Vec<_> = batches
            .into_iter()
            .filter(|(_, ts)| seen.insert(ts.clone()))
            .collect();

        let forward = memory_db("x");
        for (changes, ts) in &batches {
            forward.apply_remote_changes(changes, ts).unwrap();
        }

        // A deterministic shuffle derived from the seed.
        let mut shuffled = batches.clone();
        let mut state = seed;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state >> 33) as usize % (i + 1);
            shuffled.swap(i, j);
        }

        let backward = memory_db("y");
        for (changes, ts) in &shuffled {
            backward.apply_remote_changes(changes, ts).unwrap();
        }

        prop_assert_eq!(dump(&forward), dump(&backward));
    }
}

#[test]
fn cursor_pagination_is_complete_for_every_page_size() {
    let db = seeded_db("t");
    let base = Query::collection("users").order_by("age", Direction::Desc);
    let full = db.fetch(&base).unwrap();
    assert_eq!(full.len(), 5);

    for k in 1..=full.len() {
        let mut collected = Vec::new();
        let mut query = base.clone().limit(k);
        loop {
            let page = db.fetch(&query).unwrap();
            if page.is_empty() {
                break;
            }
            let (last_id, last_doc) = page.last().cloned().expect("non-empty page");
            collected.extend(page);
            let age = last_doc
                .get_path(&replidb_core::AttributePath::parse("age"))
                .cloned()
                .unwrap_or(Value::Null);
            query.after = Some((Cursor::new(vec![age], last_id), false));
        }
        assert_eq!(collected, full, "page size {k}");
    }
}

#[test]
fn reference_cursor_example() {
    let db = seeded_db("t");

    let first_page = db
        .fetch(
            &Query::collection("nums")
                .order_by("a", Direction::Asc)
                .limit(2),
        )
        .unwrap();
    let ids: Vec<&str> = first_page.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["2", "1"]);

    let second_page = db
        .fetch(
            &Query::collection("nums")
                .order_by("a", Direction::Asc)
                .after(Cursor::new(vec![Value::Number(5.0)], "2"), false)
                .limit(2),
        )
        .unwrap();
    let ids: Vec<&str> = second_page.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3"]);
}

#[test]
fn trailing_boolean_literal_filters() {
    let db = seeded_db("t");

    let raw = serde_json::json!({
        "collectionName": "users",
        "where": [["age", ">", 24.0], true]
    });
    let query: Query = serde_json::from_value(raw).unwrap();
    assert_eq!(db.fetch(&query).unwrap().len(), 2);

    let raw = serde_json::json!({
        "collectionName": "users",
        "where": [["age", ">", 24.0], false]
    });
    let query: Query = serde_json::from_value(raw).unwrap();
    assert!(db.fetch(&query).unwrap().is_empty());
}

#[test]
fn clock_is_monotonic_across_restart_with_persisted_state() {
    let (dir, db) = replidb_testkit::temp_file_db("c1");
    let mut last = None;
    for i in 0..5 {
        let outcome = db
            .apply_changes(&{
                let mut changes = replidb_core::DBChanges::new();
                changes.set("users", "1", obj(&[("n", Value::Number(f64::from(i)))]));
                changes
            })
            .unwrap();
        if let Some(prev) = last.replace(outcome.timestamp.clone()) {
            assert!(outcome.timestamp > prev);
        }
    }
    let highest = last.expect("writes were issued");
    db.close().unwrap();
    drop(db);

    let reopened = replidb_core::Database::open(replidb_core::DatabaseConfig::file(
        "c1",
        dir.path().join("db.log"),
    ))
    .unwrap();
    assert!(reopened.clock().next() > highest);
}

#[test]
fn tombstone_blocks_older_remote_write() {
    let db = seeded_db("t");

    let mut delete = replidb_core::DBChanges::new();
    delete.delete("users", "1");
    let deleted_at = db.apply_changes(&delete).unwrap().timestamp;

    let mut resurrect = replidb_core::DBChanges::new();
    resurrect.set("users", "1", obj(&[("age", Value::Number(99.0))]));
    let stale = Timestamp::counter(0, "a");
    assert!(stale < deleted_at);
    db.apply_remote_changes(&resurrect, &stale).unwrap();

    assert!(db.get_entity("users", "1").unwrap().is_none());
    let found = db
        .fetch(&Query::collection("users").filter("id", FilterOp::Eq, Value::String("1".into())))
        .unwrap();
    assert!(found.is_empty());
}
