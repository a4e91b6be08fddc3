//! Field values as read from and written to a record store.
//!
//! The wire forms mirror what record-oriented RPC stores return:
//! a many-to-one field reads back as an `(id, display name)` pair, a
//! one-to-many or many-to-many field as a list of ids.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record identifier within one instance.
pub type RecordId = i64;

/// Destination/source field values keyed by field name.
///
/// A `BTreeMap` keeps iteration deterministic, which keeps payloads,
/// logs, and dedup lookups stable across runs.
pub type FieldValues = BTreeMap<String, Value>;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Absent / unset.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Many-to-one read form: referenced id plus its display name.
    Reference { id: RecordId, display: String },
    /// Multi-reference read form: the referenced ids.
    Ids(Vec<RecordId>),
}

impl Value {
    /// Reference constructor.
    pub fn reference(id: RecordId, display: impl Into<String>) -> Self {
        Value::Reference {
            id,
            display: display.into(),
        }
    }

    /// Text constructor.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Whether the value carries no payload worth writing.
    ///
    /// `Bool(false)` and `Int(0)` are real values; empty text, empty id
    /// lists, and `Null` are not.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::Ids(ids) => ids.is_empty(),
            _ => false,
        }
    }

    /// The single referenced id, for many-to-one values.
    ///
    /// Accepts both the wire `Reference` form and a plain integer id, since
    /// some transports flatten references on read.
    pub fn as_reference_id(&self) -> Option<RecordId> {
        match self {
            Value::Reference { id, .. } => Some(*id),
            Value::Int(id) => Some(*id),
            _ => None,
        }
    }

    /// The referenced id list, for multi-reference values.
    pub fn as_id_list(&self) -> Option<&[RecordId]> {
        match self {
            Value::Ids(ids) => Some(ids),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<RecordId>> for Value {
    fn from(v: Vec<RecordId>) -> Self {
        Value::Ids(v)
    }
}

/// One record as returned by `read`: its id plus the requested field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record id in the owning instance.
    pub id: RecordId,

    /// Field values keyed by field name.
    pub values: FieldValues,
}

impl Record {
    /// Create a record.
    pub fn new(id: RecordId, values: FieldValues) -> Self {
        Self { id, values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emptiness_rules() {
        assert!(Value::Null.is_empty());
        assert!(Value::Text(String::new()).is_empty());
        assert!(Value::Ids(vec![]).is_empty());

        assert!(!Value::Bool(false).is_empty());
        assert!(!Value::Int(0).is_empty());
        assert!(!Value::text("Acme").is_empty());
        assert!(!Value::Ids(vec![7]).is_empty());
    }

    #[test]
    fn test_reference_extraction() {
        assert_eq!(Value::reference(33, "MXN").as_reference_id(), Some(33));
        assert_eq!(Value::Int(33).as_reference_id(), Some(33));
        assert_eq!(Value::text("MXN").as_reference_id(), None);

        let ids = Value::Ids(vec![7, 9]);
        assert_eq!(ids.as_id_list(), Some(&[7, 9][..]));
        assert_eq!(Value::Int(7).as_id_list(), None);
    }
}
