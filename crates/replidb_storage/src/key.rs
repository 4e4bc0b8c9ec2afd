//! Tuple keys and key ranges.
//!
//! Storage keys are ordered tuples of strings and numbers. Tuples compare
//! element-wise; numbers sort before strings; a tuple sorts before any of
//! its extensions, so a prefix scan returns a contiguous key range.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// One element of a tuple key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    /// Numeric element.
    Num(u64),
    /// String element.
    Str(String),
}

impl KeyPart {
    fn rank(&self) -> u8 {
        match self {
            KeyPart::Num(_) => 0,
            KeyPart::Str(_) => 1,
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Num(a), KeyPart::Num(b)) => a.cmp(b),
            (KeyPart::Str(a), KeyPart::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<u64> for KeyPart {
    fn from(n: u64) -> Self {
        KeyPart::Num(n)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Num(n) => write!(f, "{n}"),
            KeyPart::Str(s) => write!(f, "{s}"),
        }
    }
}

/// An ordered tuple key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TupleKey(Vec<KeyPart>);

impl TupleKey {
    /// Creates an empty key.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a key from parts.
    pub fn from_parts(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    /// Appends a part, returning the extended key.
    #[must_use]
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    /// Appends a part in place.
    pub fn push(&mut self, part: impl Into<KeyPart>) {
        self.0.push(part.into());
    }

    /// Returns the key's parts.
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Returns the number of parts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the key has no parts.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `self` starts with all of `prefix`'s parts.
    pub fn starts_with(&self, prefix: &TupleKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Returns the smallest key strictly greater than `self`.
    ///
    /// A tuple sorts before all of its extensions, so appending the minimal
    /// part yields the immediate successor.
    #[must_use]
    pub fn successor(&self) -> TupleKey {
        self.clone().with(KeyPart::Num(0))
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, ")")
    }
}

/// Convenience constructor for tuple keys.
///
/// ```
/// use replidb_storage::tuple_key;
/// let key = tuple_key!["ent", "users", "1"];
/// assert_eq!(key.len(), 3);
/// ```
#[macro_export]
macro_rules! tuple_key {
    ($($part:expr),* $(,)?) => {
        $crate::TupleKey::from_parts(vec![$($crate::KeyPart::from($part)),*])
    };
}

/// A contiguous range of tuple keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRange {
    /// All keys beginning with the given tuple.
    Prefix(TupleKey),
    /// Half-open span `[start, end)`; `end = None` means unbounded.
    Span {
        /// Inclusive lower bound.
        start: TupleKey,
        /// Exclusive upper bound, unbounded if absent.
        end: Option<TupleKey>,
    },
}

impl KeyRange {
    /// Range covering every key with the given prefix.
    pub fn prefix(key: TupleKey) -> Self {
        KeyRange::Prefix(key)
    }

    /// Half-open range `[start, end)`.
    pub fn span(start: TupleKey, end: Option<TupleKey>) -> Self {
        KeyRange::Span { start, end }
    }

    /// Range containing exactly one key.
    pub fn point(key: TupleKey) -> Self {
        let end = key.successor();
        KeyRange::Span {
            start: key,
            end: Some(end),
        }
    }

    /// Returns true if `key` lies within the range.
    pub fn contains(&self, key: &TupleKey) -> bool {
        match self {
            KeyRange::Prefix(prefix) => key.starts_with(prefix),
            KeyRange::Span { start, end } => {
                key >= start && end.as_ref().map_or(true, |e| key < e)
            }
        }
    }

    /// Returns true if any of `keys` lies within the range.
    pub fn contains_any<'a>(&self, mut keys: impl Iterator<Item = &'a TupleKey>) -> bool {
        keys.any(|k| self.contains(k))
    }
}
