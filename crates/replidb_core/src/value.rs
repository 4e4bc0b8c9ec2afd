//! The document value model.
//!
//! Entities are JSON-like documents with two extensions: dates and sets.
//! Both map onto plain JSON through sentinel objects (`{"$date": ms}` and
//! `{"$set": [...]}`) so every value round-trips through the wire format
//! unchanged.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A document value.
///
/// Comparison is a *total* order over all values, fixed across types so
/// sorts and cursors are deterministic everywhere: null < bool < number <
/// date < string < array < set < object. `Null` doubles as the MIN sentinel
/// for missing attributes in sorts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Double-precision number (compared with `total_cmp`).
    Number(f64),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    /// UTF-8 string.
    String(String),
    /// Ordered list; replaced wholesale on merge.
    Array(Vec<Value>),
    /// Set of values, kept sorted and deduplicated; replaced wholesale on
    /// merge.
    Set(Vec<Value>),
    /// Nested object; merged recursively.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a normalized set value (sorted, deduplicated).
    pub fn set(items: impl IntoIterator<Item = Value>) -> Value {
        let mut items: Vec<Value> = items.into_iter().collect();
        items.sort_by(Value::total_cmp);
        items.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
        Value::Set(items)
    }

    /// Builds an object value from pairs.
    pub fn object(pairs: impl IntoIterator<Item = (String, Value)>) -> Value {
        Value::Object(pairs.into_iter().collect())
    }

    /// Cross-type rank used by the total order.
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::Date(_) => 3,
            Value::String(_) => 4,
            Value::Array(_) => 5,
            Value::Set(_) => 6,
            Value::Object(_) => 7,
        }
    }

    /// Total order over all values.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) | (Value::Set(a), Value::Set(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Object(a), Value::Object(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Returns true under the total order's equality.
    pub fn total_eq(&self, other: &Value) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }

    /// Returns the value at a nested attribute path, if present.
    pub fn get_path(&self, path: &AttributePath) -> Option<&Value> {
        let mut current = self;
        for segment in path.segments() {
            match current {
                Value::Object(map) => current = map.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Sets a value at a nested path, creating intermediate objects.
    pub fn set_path(&mut self, path: &AttributePath, value: Value) {
        if path.is_root() {
            *self = value;
            return;
        }
        let mut current = self;
        let segments = path.segments();
        for segment in &segments[..segments.len() - 1] {
            if !matches!(current, Value::Object(_)) {
                *current = Value::Object(BTreeMap::new());
            }
            match current {
                Value::Object(map) => {
                    current = map
                        .entry(segment.clone())
                        .or_insert_with(|| Value::Object(BTreeMap::new()));
                }
                _ => return,
            }
        }
        if !matches!(current, Value::Object(_)) {
            *current = Value::Object(BTreeMap::new());
        }
        if let Value::Object(map) = current {
            map.insert(segments[segments.len() - 1].clone(), value);
        }
    }

    /// Removes the value at a nested path, if present.
    pub fn remove_path(&mut self, path: &AttributePath) {
        let segments = path.segments();
        if segments.is_empty() {
            *self = Value::Object(BTreeMap::new());
            return;
        }
        let mut current = self;
        for segment in &segments[..segments.len() - 1] {
            match current {
                Value::Object(map) => match map.get_mut(segment) {
                    Some(next) => current = next,
                    None => return,
                },
                _ => return,
            }
        }
        if let Value::Object(map) = current {
            map.remove(&segments[segments.len() - 1]);
        }
    }

    /// Returns true if the value is an object.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Returns the object's map, if this is an object.
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the string, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Enumerates every leaf attribute path of a partial document.
    ///
    /// A leaf is any non-object value, including `Null` (a subpath delete).
    /// An empty object is its own leaf.
    pub fn leaf_paths(&self) -> Vec<(AttributePath, &Value)> {
        let mut leaves = Vec::new();
        collect_leaves(self, AttributePath::root(), &mut leaves);
        leaves
    }
}

fn collect_leaves<'a>(
    value: &'a Value,
    prefix: AttributePath,
    out: &mut Vec<(AttributePath, &'a Value)>,
) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_leaves(child, prefix.child(key), out);
            }
        }
        _ => out.push((prefix, value)),
    }
}

/// Deep-merges `partial` into `target`.
///
/// Object fields merge recursively; arrays, sets, and primitive leaves
/// replace wholesale; a `Null` leaf deletes the key it sits at.
pub fn deep_merge(target: &mut Value, partial: &Value) {
    match (&mut *target, partial) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, incoming) in src {
                match incoming {
                    Value::Null => {
                        dst.remove(key);
                    }
                    Value::Object(_) => {
                        let slot = dst
                            .entry(key.clone())
                            .or_insert_with(|| Value::Object(BTreeMap::new()));
                        if slot.is_object() {
                            deep_merge(slot, incoming);
                        } else {
                            *slot = incoming.clone();
                        }
                    }
                    other => {
                        dst.insert(key.clone(), other.clone());
                    }
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}

const DATE_TAG: &str = "$date";
const SET_TAG: &str = "$set";

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Date(ms) => serde_json::json!({ DATE_TAG: ms }),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Set(items) => serde_json::json!({
                SET_TAG: items
                    .into_iter()
                    .map(serde_json::Value::from)
                    .collect::<Vec<_>>()
            }),
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(ms) = map.get(DATE_TAG).and_then(serde_json::Value::as_i64) {
                        return Value::Date(ms);
                    }
                    if let Some(items) = map.get(SET_TAG).and_then(serde_json::Value::as_array) {
                        return Value::set(items.iter().cloned().map(Into::into));
                    }
                }
                Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json: serde_json::Value = self.clone().into();
        write!(f, "{json}")
    }
}

/// A path to an attribute inside an entity.
///
/// The empty path is the entity root, spelled `_root` where the path is
/// persisted as a key segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AttributePath(Vec<String>);

/// Key-segment spelling of the root path.
pub const ROOT_SEGMENT: &str = "_root";

impl AttributePath {
    /// The entity root.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a path from segments.
    pub fn from_segments(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Parses a dotted path (`"address.city"`); `"_root"` is the root.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() || raw == ROOT_SEGMENT {
            return Self::root();
        }
        Self(raw.split('.').map(str::to_string).collect())
    }

    /// Returns this path extended by one segment.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    /// The path's segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns true for the entity root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Key-segment spelling: dotted segments, or `_root`.
    pub fn storage_segment(&self) -> String {
        if self.is_root() {
            ROOT_SEGMENT.to_string()
        } else {
            self.0.join(".")
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.storage_segment())
    }
}
