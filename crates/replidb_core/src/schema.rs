//! Optional collection schemas.
//!
//! A schema declares the attribute types a collection carries. When one is
//! present, queries are validated against it before they run; without one
//! every check is relaxed and queries evaluate fail-closed instead.

use crate::error::{CoreError, CoreResult};
use crate::query::{Filter, FilterOp, Query};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// UTF-8 string.
    String,
    /// Double-precision number.
    Number,
    /// Boolean.
    Bool,
    /// Milliseconds since the Unix epoch.
    Date,
    /// Ordered list.
    Array,
    /// Deduplicated set.
    Set,
    /// Nested object.
    Object,
}

impl AttributeType {
    /// Whether values of this type admit `<`/`<=`/`>`/`>=` and ordering.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            AttributeType::String | AttributeType::Number | AttributeType::Date | AttributeType::Bool
        )
    }

    /// Whether a filter operator applies to this type.
    pub fn supports(self, op: FilterOp) -> bool {
        match op {
            FilterOp::Eq | FilterOp::Ne | FilterOp::IsDefined => true,
            FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => self.is_ordered(),
            FilterOp::Like | FilterOp::NotLike => self == AttributeType::String,
            FilterOp::In | FilterOp::NotIn => self != AttributeType::Object,
            FilterOp::Has | FilterOp::NotHas => {
                matches!(self, AttributeType::Set | AttributeType::Array)
            }
        }
    }
}

/// Declared attributes of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Attribute types keyed by top-level attribute name.
    pub attributes: BTreeMap<String, AttributeType>,
}

impl CollectionSchema {
    /// Creates a schema from `(name, type)` pairs.
    pub fn new(attributes: impl IntoIterator<Item = (String, AttributeType)>) -> Self {
        Self {
            attributes: attributes.into_iter().collect(),
        }
    }

    fn attribute_type(&self, attribute: &str) -> Option<AttributeType> {
        // Nested paths are checked against their top-level attribute.
        let head = attribute.split('.').next().unwrap_or(attribute);
        if head == "id" {
            return Some(AttributeType::String);
        }
        let declared = self.attributes.get(head)?;
        if attribute.contains('.') && *declared != AttributeType::Object {
            return None;
        }
        if attribute.contains('.') {
            // Leaves of a declared object are untyped; treat as orderable.
            return Some(AttributeType::String);
        }
        Some(*declared)
    }
}

/// Schemas for all declared collections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Per-collection schemas.
    pub collections: BTreeMap<String, CollectionSchema>,
}

impl Schema {
    /// Creates a schema from `(collection, schema)` pairs.
    pub fn new(collections: impl IntoIterator<Item = (String, CollectionSchema)>) -> Self {
        Self {
            collections: collections.into_iter().collect(),
        }
    }

    /// Checks a query's attributes and operators against the declarations.
    ///
    /// Fails fast with [`CoreError::UnpreparedQuery`] on an undeclared
    /// collection or attribute, or an operator the attribute's type does not
    /// support.
    pub fn validate_query(&self, query: &Query) -> CoreResult<()> {
        let Some(collection) = self.collections.get(&query.collection_name) else {
            return Err(CoreError::unprepared_query(format!(
                "collection '{}' is not declared",
                query.collection_name
            )));
        };

        for filter in &query.r#where {
            self.validate_filter(&query.collection_name, collection, filter)?;
        }

        for spec in &query.order {
            match collection.attribute_type(&spec.attribute) {
                Some(kind) if kind.is_ordered() => {}
                Some(_) => {
                    return Err(CoreError::unprepared_query(format!(
                        "attribute '{}.{}' has no order-compatible type",
                        query.collection_name, spec.attribute
                    )))
                }
                None => {
                    return Err(CoreError::unprepared_query(format!(
                        "attribute '{}.{}' is not declared",
                        query.collection_name, spec.attribute
                    )))
                }
            }
        }

        Ok(())
    }

    fn validate_filter(
        &self,
        name: &str,
        collection: &CollectionSchema,
        filter: &Filter,
    ) -> CoreResult<()> {
        match filter {
            Filter::Literal(_) => Ok(()),
            Filter::Triple(attribute, op, _) => {
                let Some(kind) = collection.attribute_type(attribute) else {
                    return Err(CoreError::unprepared_query(format!(
                        "attribute '{name}.{attribute}' is not declared"
                    )));
                };
                if !kind.supports(*op) {
                    return Err(CoreError::unprepared_query(format!(
                        "operator '{op}' does not apply to attribute '{name}.{attribute}'"
                    )));
                }
                Ok(())
            }
            Filter::Group { filters, .. } => {
                for inner in filters {
                    self.validate_filter(name, collection, inner)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Direction, OrderSpec};
    use crate::value::Value;

    fn users_schema() -> Schema {
        Schema::new([(
            "users".to_string(),
            CollectionSchema::new([
                ("name".to_string(), AttributeType::String),
                ("age".to_string(), AttributeType::Number),
                ("tags".to_string(), AttributeType::Set),
            ]),
        )])
    }

    #[test]
    fn accepts_declared_attributes() {
        let schema = users_schema();
        let query = Query::collection("users")
            .filter("age", FilterOp::Gt, Value::Number(24.0))
            .order_by("name", Direction::Asc);
        assert!(schema.validate_query(&query).is_ok());
    }

    #[test]
    fn rejects_undeclared_attribute() {
        let schema = users_schema();
        let query = Query::collection("users").filter("height", FilterOp::Eq, Value::Number(1.0));
        assert!(matches!(
            schema.validate_query(&query),
            Err(CoreError::UnpreparedQuery { .. })
        ));
    }

    #[test]
    fn rejects_ordering_by_set_attribute() {
        let schema = users_schema();
        let mut query = Query::collection("users");
        query.order.push(OrderSpec {
            attribute: "tags".to_string(),
            direction: Direction::Asc,
        });
        assert!(matches!(
            schema.validate_query(&query),
            Err(CoreError::UnpreparedQuery { .. })
        ));
    }

    #[test]
    fn rejects_like_on_number() {
        let schema = users_schema();
        let query =
            Query::collection("users").filter("age", FilterOp::Like, Value::String("2%".into()));
        assert!(matches!(
            schema.validate_query(&query),
            Err(CoreError::UnpreparedQuery { .. })
        ));
    }

    #[test]
    fn id_is_always_declared() {
        let schema = users_schema();
        let query = Query::collection("users").filter("id", FilterOp::Eq, Value::String("1".into()));
        assert!(schema.validate_query(&query).is_ok());
    }
}
