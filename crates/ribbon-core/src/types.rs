//! Identity and value types shared by every layer of the graph API.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Node Identity ─────────────────────────────────────────────────

/// Store-assigned, process-wide unique node identifier.
///
/// Values come from the store's atomic counter, so they are never reused and
/// never decrease.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for NodeId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

// ── Actors ────────────────────────────────────────────────────────

/// Who is performing a request.
///
/// `Trusted` bypasses every permission predicate and is reserved for internal
/// bookkeeping (e.g. resolving `created_by` while evaluating `creator`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    Trusted,
    User(i64),
}

impl Actor {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Trusted)
    }

    /// The user id, or `None` for the trusted actor.
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Self::Trusted => None,
            Self::User(id) => Some(*id),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trusted => f.write_str("trusted"),
            Self::User(id) => write!(f, "user {id}"),
        }
    }
}

// ── Properties ────────────────────────────────────────────────────

/// Attribute name → stored value.
pub type PropertyMap = serde_json::Map<String, serde_json::Value>;

/// Which way a relationship's edges point, seen from the owning node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
    /// Matches edges in either direction; new edges are created outgoing.
    #[default]
    Either,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Self::Incoming => Self::Outgoing,
            Self::Outgoing => Self::Incoming,
            Self::Either => Self::Either,
        }
    }
}

/// Whether a value may be stored as a node property.
///
/// Properties are scalars or homogeneous-looking lists of scalars; nested
/// objects have no representation in the store.
pub fn is_storable(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => true,
        Value::Array(items) => items
            .iter()
            .all(|v| matches!(v, Value::Bool(_) | Value::Number(_) | Value::String(_))),
        Value::Object(_) => false,
    }
}

/// Whether `name` is usable as a label, relation type or property name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
