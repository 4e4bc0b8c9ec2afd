//! The fetch pipeline.

use super::cursor::{cursor_for, passes_boundary};
use super::filter::{matches_all, resolve_value};
use super::order::sort_rows;
use super::{Cardinality, Cursor, Filter, FilterOp, Query};
use crate::changes::EntityId;
use crate::entity::EntityStore;
use crate::error::CoreResult;
use crate::schema::Schema;
use crate::value::Value;
use std::collections::BTreeMap;

/// An ordered query result: `(id, document)` pairs in query order.
pub type QueryRows = Vec<(EntityId, Value)>;

/// Evaluates queries over the entity store.
///
/// `fetch` runs the stages in a fixed order: candidate scan, predicate,
/// sort, cursor boundary, limit, includes. The scan is lazy; a query with an
/// id equality filter degenerates to a point read.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryEngine {
    entities: EntityStore,
}

impl QueryEngine {
    /// Creates a query engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches a query's result from committed state.
    ///
    /// With a schema present the query is validated first and an undeclared
    /// attribute fails fast; without one all checks are relaxed.
    pub fn fetch(
        &self,
        store: &replidb_storage::KvStore,
        query: &Query,
        schema: Option<&Schema>,
    ) -> CoreResult<QueryRows> {
        if let Some(schema) = schema {
            schema.validate_query(query)?;
        }
        self.fetch_inner(store, query, schema, None)
    }

    fn fetch_inner(
        &self,
        store: &replidb_storage::KvStore,
        query: &Query,
        schema: Option<&Schema>,
        parent: Option<&Value>,
    ) -> CoreResult<QueryRows> {
        let mut rows = self.candidates(store, query, parent)?;

        sort_rows(&query.order, &mut rows);

        if let Some((cursor, inclusive)) = &query.after {
            rows.retain(|(id, entity)| {
                passes_boundary(&query.order, cursor, *inclusive, id, entity)
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        if query.select.is_some() || !query.include.is_empty() {
            for (_, entity) in &mut rows {
                if let Some(select) = &query.select {
                    project(entity, select);
                }
            }
            for (name, include) in &query.include {
                for (_, entity) in &mut rows {
                    let parent_view = entity.clone();
                    let children =
                        self.fetch_inner(store, &include.query, schema, Some(&parent_view))?;
                    let attached = match include.cardinality {
                        Cardinality::One => children
                            .into_iter()
                            .next()
                            .map_or(Value::Null, |(_, child)| child),
                        Cardinality::Many => {
                            Value::Array(children.into_iter().map(|(_, child)| child).collect())
                        }
                    };
                    if let Value::Object(map) = entity {
                        map.insert(name.clone(), attached);
                    }
                }
            }
        }

        Ok(rows)
    }

    /// Candidate rows before sort and boundary: a point read when the query
    /// pins the entity id, otherwise a lazy collection scan filtered by the
    /// predicate as it goes.
    fn candidates(
        &self,
        store: &replidb_storage::KvStore,
        query: &Query,
        parent: Option<&Value>,
    ) -> CoreResult<QueryRows> {
        if let Some(id) = pinned_id(query, parent) {
            let Some(document) = self
                .entities
                .get_entity(store, &query.collection_name, &id)?
            else {
                return Ok(Vec::new());
            };
            let entity = with_id(document, &id);
            if matches_all(&query.r#where, &entity, &query.vars, parent) {
                return Ok(vec![(id, entity)]);
            }
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        for row in self
            .entities
            .entities_in_collection(store, &query.collection_name)
        {
            let (id, document) = row?;
            let entity = with_id(document, &id);
            if matches_all(&query.r#where, &entity, &query.vars, parent) {
                rows.push((id, entity));
            }
        }
        Ok(rows)
    }

    /// Builds the cursor resuming after the last row of a page, or `None`
    /// for an empty page.
    pub fn next_cursor(&self, query: &Query, rows: &QueryRows) -> Option<Cursor> {
        rows.last()
            .map(|(id, entity)| cursor_for(&query.order, id, entity))
    }
}

/// Extracts the entity id a query pins through a top-level `id` equality
/// filter, if any.
fn pinned_id(query: &Query, parent: Option<&Value>) -> Option<EntityId> {
    for filter in &query.r#where {
        if let Filter::Triple(attribute, FilterOp::Eq, operand) = filter {
            if attribute == "id" {
                let resolved = resolve_value(operand, &query.vars, parent);
                if let Value::String(id) = resolved {
                    return Some(id.clone());
                }
            }
        }
    }
    None
}

/// Document view with the entity id injected as an `id` attribute, so
/// filters, order keys, and includes can reference it uniformly.
fn with_id(document: Value, id: &str) -> Value {
    let mut entity = if document.is_object() {
        document
    } else {
        Value::Object(BTreeMap::new())
    };
    if let Value::Object(map) = &mut entity {
        map.entry("id".to_string())
            .or_insert_with(|| Value::String(id.to_string()));
    }
    entity
}

/// Keeps only the selected top-level attributes (id always survives).
fn project(entity: &mut Value, select: &[String]) {
    if let Value::Object(map) = entity {
        map.retain(|key, _| key == "id" || select.iter().any(|s| s == key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::DBChanges;
    use crate::query::{Combine, Direction};
    use replidb_storage::KvStore;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())))
    }

    fn seed(store: &KvStore, collection: &str, docs: &[(&str, Value)]) {
        let entities = EntityStore::new();
        let mut changes = DBChanges::new();
        for (id, doc) in docs {
            changes.set(collection, *id, doc.clone());
        }
        let mut tx = store.transact();
        entities.apply_changes(&mut tx, &changes).unwrap();
        tx.commit().unwrap();
    }

    fn nums_store() -> KvStore {
        let store = KvStore::memory();
        seed(
            &store,
            "nums",
            &[
                ("1", obj(&[("a", Value::Number(10.0))])),
                ("2", obj(&[("a", Value::Number(5.0))])),
                ("3", obj(&[("a", Value::Number(20.0))])),
            ],
        );
        store
    }

    fn ids(rows: &QueryRows) -> Vec<&str> {
        rows.iter().map(|(id, _)| id.as_str()).collect()
    }

    #[test]
    fn order_and_limit() {
        let store = nums_store();
        let engine = QueryEngine::new();
        let query = Query::collection("nums")
            .order_by("a", Direction::Asc)
            .limit(2);
        let rows = engine.fetch(&store, &query, None).unwrap();
        assert_eq!(ids(&rows), vec!["2", "1"]);
    }

    #[test]
    fn cursor_resumes_the_slice() {
        let store = nums_store();
        let engine = QueryEngine::new();
        let query = Query::collection("nums")
            .order_by("a", Direction::Asc)
            .after(Cursor::new(vec![Value::Number(5.0)], "2"), false)
            .limit(2);
        let rows = engine.fetch(&store, &query, None).unwrap();
        assert_eq!(ids(&rows), vec!["1", "3"]);
    }

    #[test]
    fn cursor_pagination_reproduces_full_fetch() {
        let store = nums_store();
        let engine = QueryEngine::new();
        let full_query = Query::collection("nums").order_by("a", Direction::Desc);
        let full = engine.fetch(&store, &full_query, None).unwrap();

        for k in 1..=full.len() {
            let mut collected = Vec::new();
            let mut query = full_query.clone().limit(k);
            loop {
                let page = engine.fetch(&store, &query, None).unwrap();
                if page.is_empty() {
                    break;
                }
                let cursor = engine.next_cursor(&query, &page).unwrap();
                collected.extend(page);
                query.after = Some((cursor, false));
            }
            assert_eq!(collected, full, "page size {k}");
        }
    }

    #[test]
    fn boolean_literal_filters() {
        let store = KvStore::memory();
        seed(
            &store,
            "users",
            &[
                ("1", obj(&[("age", Value::Number(22.0))])),
                ("2", obj(&[("age", Value::Number(23.0))])),
                ("3", obj(&[("age", Value::Number(24.0))])),
                ("4", obj(&[("age", Value::Number(25.0))])),
                ("5", obj(&[("age", Value::Number(26.0))])),
            ],
        );
        let engine = QueryEngine::new();

        let with_true = Query {
            r#where: vec![
                Filter::Triple("age".into(), FilterOp::Gt, Value::Number(24.0)),
                Filter::Literal(true),
            ],
            ..Query::collection("users")
        };
        assert_eq!(engine.fetch(&store, &with_true, None).unwrap().len(), 2);

        let with_false = Query {
            r#where: vec![
                Filter::Triple("age".into(), FilterOp::Gt, Value::Number(24.0)),
                Filter::Literal(false),
            ],
            ..Query::collection("users")
        };
        assert!(engine.fetch(&store, &with_false, None).unwrap().is_empty());
    }

    #[test]
    fn id_equality_is_a_point_read() {
        let store = nums_store();
        let engine = QueryEngine::new();
        let query =
            Query::collection("nums").filter("id", FilterOp::Eq, Value::String("2".into()));
        let rows = engine.fetch(&store, &query, None).unwrap();
        assert_eq!(ids(&rows), vec!["2"]);

        let missing =
            Query::collection("nums").filter("id", FilterOp::Eq, Value::String("9".into()));
        assert!(engine.fetch(&store, &missing, None).unwrap().is_empty());
    }

    #[test]
    fn select_projects_attributes() {
        let store = KvStore::memory();
        seed(
            &store,
            "users",
            &[(
                "1",
                obj(&[
                    ("name", Value::String("ada".into())),
                    ("age", Value::Number(36.0)),
                ]),
            )],
        );
        let engine = QueryEngine::new();
        let mut query = Query::collection("users");
        query.select = Some(vec!["name".to_string()]);
        let rows = engine.fetch(&store, &query, None).unwrap();
        let doc = rows[0].1.as_object().unwrap();
        assert!(doc.contains_key("name"));
        assert!(doc.contains_key("id"));
        assert!(!doc.contains_key("age"));
    }

    #[test]
    fn include_attaches_children() {
        let store = KvStore::memory();
        seed(
            &store,
            "users",
            &[("u1", obj(&[("name", Value::String("ada".into()))]))],
        );
        seed(
            &store,
            "posts",
            &[
                ("p1", obj(&[("author", Value::String("u1".into())), ("n", Value::Number(1.0))])),
                ("p2", obj(&[("author", Value::String("u1".into())), ("n", Value::Number(2.0))])),
                ("p3", obj(&[("author", Value::String("zz".into()))])),
            ],
        );

        let engine = QueryEngine::new();
        let mut query = Query::collection("users");
        query.include.insert(
            "posts".to_string(),
            super::super::Include {
                cardinality: Cardinality::Many,
                query: Query::collection("posts")
                    .filter("author", FilterOp::Eq, Value::String("$1.id".into()))
                    .order_by("n", Direction::Asc),
            },
        );

        let rows = engine.fetch(&store, &query, None).unwrap();
        let posts = rows[0].1.get_path(&crate::value::AttributePath::parse("posts"));
        match posts {
            Some(Value::Array(items)) => assert_eq!(items.len(), 2),
            other => panic!("expected posts array, got {other:?}"),
        }
    }

    #[test]
    fn include_one_yields_entity_or_null() {
        let store = KvStore::memory();
        seed(
            &store,
            "posts",
            &[("p1", obj(&[("author", Value::String("u1".into()))]))],
        );
        seed(
            &store,
            "users",
            &[("u1", obj(&[("name", Value::String("ada".into()))]))],
        );

        let engine = QueryEngine::new();
        let mut query = Query::collection("posts");
        query.include.insert(
            "author_user".to_string(),
            super::super::Include {
                cardinality: Cardinality::One,
                query: Query::collection("users").filter(
                    "id",
                    FilterOp::Eq,
                    Value::String("$1.author".into()),
                ),
            },
        );

        let rows = engine.fetch(&store, &query, None).unwrap();
        let author = rows[0]
            .1
            .get_path(&crate::value::AttributePath::parse("author_user.name"));
        assert_eq!(author, Some(&Value::String("ada".into())));
    }

    #[test]
    fn or_group_inside_where() {
        let store = nums_store();
        let engine = QueryEngine::new();
        let query = Query {
            r#where: vec![Filter::Group {
                combine: Combine::Or,
                filters: vec![
                    Filter::Triple("a".into(), FilterOp::Eq, Value::Number(5.0)),
                    Filter::Triple("a".into(), FilterOp::Eq, Value::Number(20.0)),
                ],
            }],
            ..Query::collection("nums")
        };
        let rows = engine.fetch(&store, &query, None).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
