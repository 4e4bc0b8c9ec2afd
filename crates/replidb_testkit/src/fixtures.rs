//! Seeded fixtures shared across crates' tests.

use replidb_core::{DBChanges, Database, DatabaseConfig, Value};
use replidb_storage::KvStore;

/// Opens a fresh in-memory replica under the given client id.
pub fn memory_db(client_id: &str) -> Database {
    Database::open(DatabaseConfig::memory(client_id))
        .expect("in-memory database always opens")
}

/// Opens a bare in-memory key-value store.
pub fn memory_store() -> KvStore {
    KvStore::memory()
}

/// Opens a file-backed replica in a temp directory.
///
/// The directory is dropped (and deleted) with the returned guard, so keep
/// it alive for the duration of the test.
pub fn temp_file_db(client_id: &str) -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = Database::open(DatabaseConfig::file(client_id, dir.path().join("db.log")))
        .expect("file database opens in a fresh dir");
    (dir, db)
}

/// Builds an object value from `(key, value)` pairs.
pub fn obj(pairs: &[(&str, Value)]) -> Value {
    Value::object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())))
}

/// Five users aged 22 through 26, ids `"1"` through `"5"`.
pub fn seeded_users() -> DBChanges {
    let mut changes = DBChanges::new();
    for (i, age) in (22..=26).enumerate() {
        let id = (i + 1).to_string();
        changes.set(
            "users",
            id.clone(),
            obj(&[
                ("name", Value::String(format!("user-{id}"))),
                ("age", Value::Number(f64::from(age))),
            ]),
        );
    }
    changes
}

/// The `nums` dataset: `{id:'1',a:10}`, `{id:'2',a:5}`, `{id:'3',a:20}`.
pub fn seeded_nums() -> DBChanges {
    let mut changes = DBChanges::new();
    for (id, a) in [("1", 10.0), ("2", 5.0), ("3", 20.0)] {
        changes.set("nums", id, obj(&[("a", Value::Number(a))]));
    }
    changes
}

/// Opens an in-memory replica pre-loaded with [`seeded_users`] and
/// [`seeded_nums`].
pub fn seeded_db(client_id: &str) -> Database {
    let db = memory_db(client_id);
    db.apply_changes(&seeded_users())
        .expect("seeding users cannot conflict");
    db.apply_changes(&seeded_nums())
        .expect("seeding nums cannot conflict");
    db
}
