//! Multi-key ordering.

use super::{Direction, OrderSpec};
use crate::changes::EntityId;
use crate::value::{AttributePath, Value};
use std::cmp::Ordering;

/// Reads the order-key value of an entity; missing attributes sort as the
/// `Null` MIN sentinel.
pub(super) fn order_key<'a>(entity: &'a Value, spec: &OrderSpec) -> &'a Value {
    entity
        .get_path(&AttributePath::parse(&spec.attribute))
        .unwrap_or(&Value::Null)
}

/// Compares two `(id, entity)` rows under the query's order.
///
/// Primary keys come from `order` with per-key direction; when every order
/// key ties, entity id ascending breaks the tie. This makes the order total,
/// which cursor pagination depends on.
pub(super) fn compare_rows(
    order: &[OrderSpec],
    a: &(EntityId, Value),
    b: &(EntityId, Value),
) -> Ordering {
    for spec in order {
        let ord = order_key(&a.1, spec).total_cmp(order_key(&b.1, spec));
        let ord = match spec.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.0.cmp(&b.0)
}

/// Sorts rows in place under the query's order.
pub(super) fn sort_rows(order: &[OrderSpec], rows: &mut [(EntityId, Value)]) {
    rows.sort_by(|a, b| compare_rows(order, a, b));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, pairs: &[(&str, Value)]) -> (EntityId, Value) {
        (
            id.to_string(),
            Value::object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone()))),
        )
    }

    fn asc(attribute: &str) -> OrderSpec {
        OrderSpec {
            attribute: attribute.to_string(),
            direction: Direction::Asc,
        }
    }

    fn desc(attribute: &str) -> OrderSpec {
        OrderSpec {
            attribute: attribute.to_string(),
            direction: Direction::Desc,
        }
    }

    #[test]
    fn sorts_by_primary_then_id() {
        let mut rows = vec![
            row("3", &[("a", Value::Number(20.0))]),
            row("1", &[("a", Value::Number(10.0))]),
            row("2", &[("a", Value::Number(10.0))]),
        ];
        sort_rows(&[asc("a")], &mut rows);
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn descending_reverses_keys_but_not_id_tiebreak() {
        let mut rows = vec![
            row("2", &[("a", Value::Number(10.0))]),
            row("1", &[("a", Value::Number(10.0))]),
            row("3", &[("a", Value::Number(20.0))]),
        ];
        sort_rows(&[desc("a")], &mut rows);
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
    }

    #[test]
    fn missing_values_sort_first_ascending() {
        let mut rows = vec![
            row("1", &[("a", Value::Number(1.0))]),
            row("2", &[]),
        ];
        sort_rows(&[asc("a")], &mut rows);
        assert_eq!(rows[0].0, "2");
    }

    #[test]
    fn secondary_key_applies_within_ties() {
        let mut rows = vec![
            row("1", &[("a", Value::Number(1.0)), ("b", Value::Number(2.0))]),
            row("2", &[("a", Value::Number(1.0)), ("b", Value::Number(1.0))]),
        ];
        sort_rows(&[asc("a"), asc("b")], &mut rows);
        assert_eq!(rows[0].0, "2");
    }
}
