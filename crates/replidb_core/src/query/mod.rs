//! Declarative queries and their evaluation pipeline.
//!
//! A [`Query`] is a plain JSON value: it round-trips through serialization
//! unchanged, travels over the wire as-is, and its semantic fields feed the
//! subscription hash. Evaluation is scan, predicate, sort, cursor, limit,
//! includes, in that order (see [`engine`]).

mod cursor;
mod engine;
mod filter;
mod order;

pub use engine::{QueryEngine, QueryRows};
pub use filter::resolve_value;

use crate::changes::EntityId;
use crate::value::Value;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A declarative query over one collection.
///
/// Only absent fields are skipped during serialization, so two queries with
/// the same semantics serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Collection to fetch from.
    pub collection_name: String,
    /// Conjunction of filters; empty means match-all.
    #[serde(rename = "where", default, skip_serializing_if = "Vec::is_empty")]
    pub r#where: Vec<Filter>,
    /// Sort keys applied in order; entity id is always the final tie-break.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<OrderSpec>,
    /// Maximum number of entities returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Resumption boundary: `(cursor, inclusive)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<(Cursor, bool)>,
    /// Top-level attributes to project; `None` keeps the whole document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,
    /// Relational includes keyed by the attribute they attach to.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub include: BTreeMap<String, Include>,
    /// Named values referenced from filters as `"$name"`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, Value>,
}

impl Query {
    /// Starts a match-all query over `collection`.
    pub fn collection(collection: impl Into<String>) -> Self {
        Query {
            collection_name: collection.into(),
            ..Default::default()
        }
    }

    /// Adds a filter triple.
    #[must_use]
    pub fn filter(mut self, attribute: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.r#where
            .push(Filter::Triple(attribute.into(), op, value));
        self
    }

    /// Adds a sort key.
    #[must_use]
    pub fn order_by(mut self, attribute: impl Into<String>, direction: Direction) -> Self {
        self.order.push(OrderSpec {
            attribute: attribute.into(),
            direction,
        });
        self
    }

    /// Caps the result size.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resumes after (or at, if `inclusive`) a cursor boundary.
    #[must_use]
    pub fn after(mut self, cursor: Cursor, inclusive: bool) -> Self {
        self.after = Some((cursor, inclusive));
        self
    }
}

/// One entry of a query's `where` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    /// Bare boolean: `true` passes everything, `false` rejects everything.
    /// Used as a composability no-op when building filters conditionally.
    Literal(bool),
    /// `[attribute, operator, value]`.
    Triple(String, FilterOp, Value),
    /// Nested boolean group.
    Group {
        /// How the nested filters combine.
        #[serde(rename = "mod")]
        combine: Combine,
        /// Nested filters.
        filters: Vec<Filter>,
    },
}

/// Boolean combinator of a filter group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combine {
    /// Every nested filter must pass.
    And,
    /// At least one nested filter must pass.
    Or,
}

/// Filter operator of a triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// Equality under the value total order.
    #[serde(rename = "=")]
    Eq,
    /// Inequality.
    #[serde(rename = "!=")]
    Ne,
    /// Strictly less.
    #[serde(rename = "<")]
    Lt,
    /// Less or equal.
    #[serde(rename = "<=")]
    Le,
    /// Strictly greater.
    #[serde(rename = ">")]
    Gt,
    /// Greater or equal.
    #[serde(rename = ">=")]
    Ge,
    /// SQL-style pattern match (`%` any run, `_` one character).
    #[serde(rename = "like")]
    Like,
    /// Negated pattern match.
    #[serde(rename = "nlike")]
    NotLike,
    /// Membership in a value list.
    #[serde(rename = "in")]
    In,
    /// Negated membership.
    #[serde(rename = "nin")]
    NotIn,
    /// Set/array contains the value.
    #[serde(rename = "has")]
    Has,
    /// Set/array does not contain the value.
    #[serde(rename = "!has")]
    NotHas,
    /// Attribute present and non-null iff the operand is `true`.
    #[serde(rename = "isDefined")]
    IsDefined,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Like => "like",
            FilterOp::NotLike => "nlike",
            FilterOp::In => "in",
            FilterOp::NotIn => "nin",
            FilterOp::Has => "has",
            FilterOp::NotHas => "!has",
            FilterOp::IsDefined => "isDefined",
        };
        write!(f, "{name}")
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Ascending.
    #[serde(rename = "ASC")]
    Asc,
    /// Descending.
    #[serde(rename = "DESC")]
    Desc,
}

/// One sort key: `(attribute, direction)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Attribute to sort by (dotted paths allowed).
    pub attribute: String,
    /// Sort direction.
    pub direction: Direction,
}

/// A relational include.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Include {
    /// `'one'` attaches a single entity or null; `'many'` attaches the
    /// subquery's full ordered result.
    pub cardinality: Cardinality,
    /// Subquery run once per parent entity. `"$1.attr"` references in its
    /// filters resolve against the parent.
    pub query: Query,
}

/// Cardinality of an include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// Single entity or null.
    One,
    /// Ordered list of entities.
    Many,
}

/// A pagination boundary: the order-key values of the boundary entity plus
/// its id.
///
/// On the wire a cursor is a flat array, order-key values first and the id
/// last, matching the query's `order` list.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Boundary entity's value for each order key, in `order` order.
    pub values: Vec<Value>,
    /// Boundary entity's id.
    pub id: EntityId,
}

impl Cursor {
    /// Creates a cursor from order-key values and an entity id.
    pub fn new(values: Vec<Value>, id: impl Into<EntityId>) -> Self {
        Self {
            values,
            id: id.into(),
        }
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut flat: Vec<Value> = self.values.clone();
        flat.push(Value::String(self.id.clone()));
        flat.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut flat = Vec::<Value>::deserialize(deserializer)?;
        let Some(Value::String(id)) = flat.pop() else {
            return Err(D::Error::custom("cursor must end with an entity id"));
        };
        Ok(Cursor { values: flat, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_json_roundtrip() {
        let query = Query::collection("users")
            .filter("age", FilterOp::Gt, Value::Number(24.0))
            .order_by("age", Direction::Asc)
            .limit(2)
            .after(Cursor::new(vec![Value::Number(5.0)], "2"), false);

        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["collectionName"], "users");
        assert_eq!(json["where"][0], serde_json::json!(["age", ">", 24.0]));
        assert_eq!(json["after"], serde_json::json!([[5.0, "2"], false]));

        let back: Query = serde_json::from_value(json).unwrap();
        assert_eq!(query, back);
    }

    #[test]
    fn filter_literal_and_group_parse() {
        let raw = serde_json::json!([
            true,
            ["name", "like", "a%"],
            { "mod": "or", "filters": [["age", "<", 10.0], false] }
        ]);
        let filters: Vec<Filter> = serde_json::from_value(raw).unwrap();
        assert_eq!(filters[0], Filter::Literal(true));
        assert!(matches!(filters[1], Filter::Triple(..)));
        assert!(matches!(
            filters[2],
            Filter::Group {
                combine: Combine::Or,
                ..
            }
        ));
    }

    #[test]
    fn absent_fields_are_skipped() {
        let query = Query::collection("nums");
        let json = serde_json::to_string(&query).unwrap();
        assert_eq!(json, r#"{"collectionName":"nums"}"#);
    }

    #[test]
    fn cursor_is_a_flat_array() {
        let cursor = Cursor::new(vec![Value::Number(5.0), Value::String("x".into())], "2");
        let json = serde_json::to_value(&cursor).unwrap();
        assert_eq!(json, serde_json::json!([5.0, "x", "2"]));
        let back: Cursor = serde_json::from_value(json).unwrap();
        assert_eq!(cursor, back);
    }
}
