//! Keyspace layout inside the key-value store.
//!
//! - `("ent", collection, id)` - current document value
//! - `("meta", collection, id, path)` - last-write timestamp per leaf
//!   attribute path, with `_root` covering the whole entity

use crate::value::AttributePath;
use replidb_storage::{KeyRange, TupleKey};

/// Prefix for document values.
pub const ENTITY_SPACE: &str = "ent";
/// Prefix for per-attribute timestamps.
pub const META_SPACE: &str = "meta";

/// Key of an entity's document.
pub fn entity_key(collection: &str, id: &str) -> TupleKey {
    TupleKey::new()
        .with(ENTITY_SPACE)
        .with(collection)
        .with(id)
}

/// Range covering a collection's documents.
pub fn collection_range(collection: &str) -> KeyRange {
    KeyRange::prefix(TupleKey::new().with(ENTITY_SPACE).with(collection))
}

/// Range covering every document.
pub fn all_entities_range() -> KeyRange {
    KeyRange::prefix(TupleKey::new().with(ENTITY_SPACE))
}

/// Key of one attribute's last-write timestamp.
pub fn meta_key(collection: &str, id: &str, path: &AttributePath) -> TupleKey {
    TupleKey::new()
        .with(META_SPACE)
        .with(collection)
        .with(id)
        .with(path.storage_segment())
}

/// Range covering one entity's timestamp records.
pub fn entity_meta_range(collection: &str, id: &str) -> KeyRange {
    KeyRange::prefix(
        TupleKey::new()
            .with(META_SPACE)
            .with(collection)
            .with(id),
    )
}

/// Range covering every timestamp record.
pub fn all_meta_range() -> KeyRange {
    KeyRange::prefix(TupleKey::new().with(META_SPACE))
}

/// Extracts the attribute path from a meta key, if it is one.
pub fn parse_meta_path(key: &TupleKey) -> Option<AttributePath> {
    let parts = key.parts();
    if parts.len() != 4 {
        return None;
    }
    match (&parts[0], &parts[3]) {
        (replidb_storage::KeyPart::Str(space), replidb_storage::KeyPart::Str(path))
            if space == META_SPACE =>
        {
            Some(AttributePath::parse(path))
        }
        _ => None,
    }
}

/// Extracts `(collection, id)` from an entity key, if it is one.
pub fn parse_entity_key(key: &TupleKey) -> Option<(String, String)> {
    let parts = key.parts();
    if parts.len() != 3 {
        return None;
    }
    match (&parts[0], &parts[1], &parts[2]) {
        (
            replidb_storage::KeyPart::Str(space),
            replidb_storage::KeyPart::Str(collection),
            replidb_storage::KeyPart::Str(id),
        ) if space == ENTITY_SPACE => Some((collection.clone(), id.clone())),
        _ => None,
    }
}
