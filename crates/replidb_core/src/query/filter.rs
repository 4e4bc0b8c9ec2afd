//! Predicate evaluation.
//!
//! Every comparison is fail-closed: an absent attribute, an incomparable
//! operand, or an unresolvable reference makes the triple not match rather
//! than erroring mid-scan.

use super::{Combine, Filter, FilterOp};
use crate::value::{AttributePath, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Resolves a filter operand.
///
/// `"$name"` strings resolve from the query's `vars`; `"$1.attr"` strings
/// resolve against the parent entity of an include subquery. Anything else
/// is a literal. Unresolvable references yield `Null`, which no comparison
/// matches.
pub fn resolve_value<'a>(
    value: &'a Value,
    vars: &'a BTreeMap<String, Value>,
    parent: Option<&'a Value>,
) -> &'a Value {
    let Value::String(raw) = value else {
        return value;
    };
    if let Some(path) = raw.strip_prefix("$1.") {
        return parent
            .and_then(|p| p.get_path(&AttributePath::parse(path)))
            .unwrap_or(&Value::Null);
    }
    if let Some(name) = raw.strip_prefix('$') {
        return vars.get(name).unwrap_or(&Value::Null);
    }
    value
}

/// Evaluates a conjunction of filters against one entity document.
pub fn matches_all(
    filters: &[Filter],
    entity: &Value,
    vars: &BTreeMap<String, Value>,
    parent: Option<&Value>,
) -> bool {
    filters.iter().all(|f| matches(f, entity, vars, parent))
}

fn matches(
    filter: &Filter,
    entity: &Value,
    vars: &BTreeMap<String, Value>,
    parent: Option<&Value>,
) -> bool {
    match filter {
        Filter::Literal(pass) => *pass,
        Filter::Triple(attribute, op, operand) => {
            let attribute_value = entity
                .get_path(&AttributePath::parse(attribute))
                .unwrap_or(&Value::Null);
            let operand = resolve_value(operand, vars, parent);
            matches_triple(attribute_value, *op, operand)
        }
        Filter::Group { combine, filters } => match combine {
            Combine::And => filters.iter().all(|f| matches(f, entity, vars, parent)),
            Combine::Or => filters.iter().any(|f| matches(f, entity, vars, parent)),
        },
    }
}

fn matches_triple(attribute: &Value, op: FilterOp, operand: &Value) -> bool {
    match op {
        FilterOp::Eq => attribute.total_eq(operand),
        FilterOp::Ne => !attribute.total_eq(operand),
        FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
            // Comparisons only hold within one type; a missing attribute
            // (Null) never satisfies them.
            if matches!(attribute, Value::Null)
                || std::mem::discriminant(attribute) != std::mem::discriminant(operand)
            {
                return false;
            }
            let ord = attribute.total_cmp(operand);
            match op {
                FilterOp::Lt => ord == Ordering::Less,
                FilterOp::Le => ord != Ordering::Greater,
                FilterOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }
        }
        FilterOp::Like | FilterOp::NotLike => {
            let matched = match (attribute, operand) {
                (Value::String(s), Value::String(pattern)) => like_match(s, pattern),
                _ => false,
            };
            if op == FilterOp::Like {
                matched
            } else {
                // nlike still requires a string attribute to match against.
                matches!(attribute, Value::String(_)) && !matched
            }
        }
        FilterOp::In | FilterOp::NotIn => {
            let contained = match operand {
                Value::Array(items) | Value::Set(items) => {
                    items.iter().any(|item| attribute.total_eq(item))
                }
                _ => false,
            };
            if op == FilterOp::In {
                contained
            } else {
                !contained
            }
        }
        FilterOp::Has | FilterOp::NotHas => {
            let contained = match attribute {
                Value::Set(items) | Value::Array(items) => {
                    items.iter().any(|item| item.total_eq(operand))
                }
                _ => return false,
            };
            (op == FilterOp::Has) == contained
        }
        FilterOp::IsDefined => {
            let defined = !matches!(attribute, Value::Null);
            match operand {
                Value::Bool(expected) => defined == *expected,
                _ => false,
            }
        }
    }
}

/// SQL-style pattern match: `%` matches any run (including empty), `_`
/// matches exactly one character, everything else matches literally.
fn like_match(text: &str, pattern: &str) -> bool {
    fn inner(text: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some((&'%', rest)) => {
                (0..=text.len()).any(|skip| inner(&text[skip..], rest))
            }
            Some((&'_', rest)) => !text.is_empty() && inner(&text[1..], rest),
            Some((ch, rest)) => text.first() == Some(ch) && inner(&text[1..], rest),
        }
    }
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    inner(&text, &pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())))
    }

    fn no_vars() -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    #[test]
    fn literal_short_circuits() {
        let entity = obj(&[("a", Value::Number(25.0))]);
        let filters = vec![
            Filter::Triple("a".into(), FilterOp::Gt, Value::Number(24.0)),
            Filter::Literal(true),
        ];
        assert!(matches_all(&filters, &entity, &no_vars(), None));

        let filters = vec![
            Filter::Triple("a".into(), FilterOp::Gt, Value::Number(24.0)),
            Filter::Literal(false),
        ];
        assert!(!matches_all(&filters, &entity, &no_vars(), None));
    }

    #[test]
    fn missing_attribute_fails_comparisons() {
        let entity = obj(&[]);
        for op in [FilterOp::Lt, FilterOp::Le, FilterOp::Gt, FilterOp::Ge] {
            let filter = Filter::Triple("a".into(), op, Value::Number(0.0));
            assert!(!matches(&filter, &entity, &no_vars(), None), "{op}");
        }
    }

    #[test]
    fn cross_type_comparison_does_not_match() {
        let entity = obj(&[("a", Value::String("10".into()))]);
        let filter = Filter::Triple("a".into(), FilterOp::Gt, Value::Number(5.0));
        assert!(!matches(&filter, &entity, &no_vars(), None));
    }

    #[test]
    fn like_patterns() {
        assert!(like_match("hello", "h%"));
        assert!(like_match("hello", "%llo"));
        assert!(like_match("hello", "h_llo"));
        assert!(like_match("hello", "%"));
        assert!(!like_match("hello", "h_"));
        assert!(!like_match("hello", "world%"));
        assert!(like_match("", "%"));
        assert!(!like_match("", "_"));
    }

    #[test]
    fn in_and_has() {
        let entity = obj(&[
            ("a", Value::Number(2.0)),
            ("tags", Value::set([Value::String("x".into())])),
        ]);
        let list = Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert!(matches(
            &Filter::Triple("a".into(), FilterOp::In, list.clone()),
            &entity,
            &no_vars(),
            None
        ));
        assert!(!matches(
            &Filter::Triple("a".into(), FilterOp::NotIn, list),
            &entity,
            &no_vars(),
            None
        ));
        assert!(matches(
            &Filter::Triple("tags".into(), FilterOp::Has, Value::String("x".into())),
            &entity,
            &no_vars(),
            None
        ));
        assert!(matches(
            &Filter::Triple("tags".into(), FilterOp::NotHas, Value::String("y".into())),
            &entity,
            &no_vars(),
            None
        ));
        // has on a non-collection attribute fails closed.
        assert!(!matches(
            &Filter::Triple("a".into(), FilterOp::Has, Value::Number(2.0)),
            &entity,
            &no_vars(),
            None
        ));
    }

    #[test]
    fn vars_and_parent_references_resolve() {
        let entity = obj(&[("owner", Value::String("u1".into()))]);
        let mut vars = BTreeMap::new();
        vars.insert("me".to_string(), Value::String("u1".into()));

        let by_var = Filter::Triple("owner".into(), FilterOp::Eq, Value::String("$me".into()));
        assert!(matches(&by_var, &entity, &vars, None));

        let parent = obj(&[("id", Value::String("u1".into()))]);
        let by_parent =
            Filter::Triple("owner".into(), FilterOp::Eq, Value::String("$1.id".into()));
        assert!(matches(&by_parent, &entity, &no_vars(), Some(&parent)));

        // Unresolvable reference fails closed instead of matching Null.
        let dangling =
            Filter::Triple("owner".into(), FilterOp::Eq, Value::String("$nope".into()));
        assert!(!matches(&dangling, &entity, &no_vars(), None));
    }

    #[test]
    fn is_defined() {
        let entity = obj(&[("a", Value::Number(1.0))]);
        assert!(matches(
            &Filter::Triple("a".into(), FilterOp::IsDefined, Value::Bool(true)),
            &entity,
            &no_vars(),
            None
        ));
        assert!(matches(
            &Filter::Triple("b".into(), FilterOp::IsDefined, Value::Bool(false)),
            &entity,
            &no_vars(),
            None
        ));
    }

    #[test]
    fn or_group() {
        let entity = obj(&[("a", Value::Number(5.0))]);
        let group = Filter::Group {
            combine: Combine::Or,
            filters: vec![
                Filter::Triple("a".into(), FilterOp::Lt, Value::Number(0.0)),
                Filter::Triple("a".into(), FilterOp::Eq, Value::Number(5.0)),
            ],
        };
        assert!(matches(&group, &entity, &no_vars(), None));
    }
}
