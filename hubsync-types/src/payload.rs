//! Transformed payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{EntityKind, RecordAssociation};

/// A record mapped into the remote entity's property schema.
///
/// Produced once per record by the transformer and treated as immutable by
/// the commit path (merge-protect is the one sanctioned adjustment, applied
/// before the write).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedPayload {
    /// Effective endpoint kind. May differ from the stream kind for
    /// activity records, which dispatch to calls or tasks.
    pub kind: EntityKind,
    /// Remote property map. A `null` value clears the remote property; an
    /// absent key leaves it untouched.
    pub properties: Map<String, Value>,
    /// Remote id, when the source record supplied one.
    pub remote_id: Option<String>,
    /// Requested associations, linked after (or atomically with) commit.
    pub associations: Vec<RecordAssociation>,
}

impl TransformedPayload {
    /// Creates an empty payload for a kind.
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            properties: Map::new(),
            remote_id: None,
            associations: Vec::new(),
        }
    }

    /// Sets a property.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.properties.insert(name.into(), value);
    }

    /// Returns a property value as a string, when it has a scalar shape
    /// usable as a search term.
    pub fn property_as_str(&self, name: &str) -> Option<String> {
        match self.properties.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}
