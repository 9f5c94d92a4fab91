//! Value/blend model
//!
//! A contact's `content` is blended with every incoming update according to the
//! contact's [`BlendMode`]:
//!
//! - `accept-last`: the incoming value replaces the current one wholesale. This is
//!   not order-independent; each receiver keeps whatever it observed last.
//! - `merge`: the incoming value is joined with the current one through a
//!   [`Semilattice`]. Joins are associative, commutative and idempotent, so
//!   duplicate or reordered delivery converges to the same content and previously
//!   observed elements are never lost.
//!
//! Typed lattices ([`GrowSet`], [`Max`], [`Min`]) are provided for Rust callers.
//! Content travels as JSON, so the lattice applied on the wire is [`join_json`],
//! which picks the combine function from the JSON value type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Conflict-resolution policy of a contact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    /// Last write observed wins
    #[default]
    AcceptLast,
    /// Join through the content's semilattice
    Merge,
}

impl BlendMode {
    /// Blend `incoming` into `current`, returning the new content
    pub fn blend(self, current: &Value, incoming: &Value) -> Value {
        match self {
            BlendMode::AcceptLast => incoming.clone(),
            BlendMode::Merge => join_json(current, incoming),
        }
    }

    /// Normalize content stored under this mode
    ///
    /// Merge content is kept in canonical form so that joins are idempotent
    /// from the first write on.
    pub fn normalize(self, content: Value) -> Value {
        match self {
            BlendMode::AcceptLast => content,
            BlendMode::Merge => canonical_json(&content),
        }
    }
}

/// A join-semilattice: `join` must be associative, commutative and idempotent
pub trait Semilattice: Sized {
    /// Least upper bound of `self` and `other`
    fn join(&self, other: &Self) -> Self;

    /// Join `other` into `self` in place
    fn join_assign(&mut self, other: &Self) {
        *self = self.join(other);
    }
}

/// Grow-only set; joins by union
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrowSet<T: Ord>(pub BTreeSet<T>);

impl<T: Ord> GrowSet<T> {
    /// Empty set
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Add an element; elements are never removed
    pub fn insert(&mut self, value: T) -> bool {
        self.0.insert(value)
    }

    /// Whether the set holds `value`
    pub fn contains(&self, value: &T) -> bool {
        self.0.contains(value)
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in ascending order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }
}

impl<T: Ord> FromIterator<T> for GrowSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: Ord + Clone> Semilattice for GrowSet<T> {
    fn join(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).cloned().collect())
    }
}

/// Register that only grows; joins by maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Max<T>(pub T);

impl<T: Ord + Clone> Semilattice for Max<T> {
    fn join(&self, other: &Self) -> Self {
        if other.0 > self.0 {
            other.clone()
        } else {
            self.clone()
        }
    }
}

/// Register that only shrinks; joins by minimum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Min<T>(pub T);

impl<T: Ord + Clone> Semilattice for Min<T> {
    fn join(&self, other: &Self) -> Self {
        if other.0 < self.0 {
            other.clone()
        } else {
            self.clone()
        }
    }
}

impl Semilattice for bool {
    fn join(&self, other: &Self) -> Self {
        *self || *other
    }
}

impl Semilattice for Value {
    fn join(&self, other: &Self) -> Self {
        join_json(self, other)
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

// serde_json maps are BTreeMap-backed, so this encoding is canonical.
fn canonical_key(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
    x.partial_cmp(&y)
        .unwrap_or(Ordering::Equal)
        .then_with(|| canonical_key(a).cmp(&canonical_key(b)))
}

/// Canonical form of a merge value: arrays sorted and deduplicated, recursively
pub fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut seen = BTreeSet::new();
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let canonical = canonical_json(item);
                if seen.insert(canonical_key(&canonical)) {
                    out.push(canonical);
                }
            }
            out.sort_by(|a, b| {
                type_rank(a)
                    .cmp(&type_rank(b))
                    .then_with(|| canonical_key(a).cmp(&canonical_key(b)))
            });
            Value::Array(out)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonical_json(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Join two JSON values, choosing the combine function by value type
///
/// - arrays: set union
/// - numbers: maximum
/// - booleans: logical or
/// - strings: lexicographic maximum
/// - objects: key-wise recursive join
/// - `null`: identity
///
/// Values of different types resolve to the one with the higher type rank
/// (null < bool < number < string < array < object). The result is always in
/// canonical form.
pub fn join_json(current: &Value, incoming: &Value) -> Value {
    let (ra, rb) = (type_rank(current), type_rank(incoming));
    if ra != rb {
        return canonical_json(if ra > rb { current } else { incoming });
    }

    match (current, incoming) {
        (Value::Bool(a), Value::Bool(b)) => Value::Bool(*a || *b),
        (Value::Number(_), Value::Number(_)) => {
            if compare_numbers(incoming, current) == Ordering::Greater {
                incoming.clone()
            } else {
                current.clone()
            }
        }
        (Value::String(a), Value::String(b)) => Value::String(a.max(b).clone()),
        (Value::Array(a), Value::Array(b)) => {
            let mut union = a.clone();
            union.extend(b.iter().cloned());
            canonical_json(&Value::Array(union))
        }
        (Value::Object(a), Value::Object(b)) => {
            let mut joined = Map::new();
            for (key, value) in a {
                let merged = match b.get(key) {
                    Some(other) => join_json(value, other),
                    None => canonical_json(value),
                };
                joined.insert(key.clone(), merged);
            }
            for (key, value) in b {
                if !a.contains_key(key) {
                    joined.insert(key.clone(), canonical_json(value));
                }
            }
            Value::Object(joined)
        }
        _ => Value::Null,
    }
}
