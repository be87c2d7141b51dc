//! Normalized input records.
//!
//! A record is an ordered field map as delivered by the stream source.
//! Schema validation is the source's concern; this type only provides typed
//! access to the handful of fields the engine cares about (id, external id,
//! associations) and the content hash used as the dedup key.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// A normalized business record prior to transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRecord {
    fields: Map<String, Value>,
}

impl NormalizedRecord {
    /// Creates a record from a field map.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Creates a record from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(Error::InvalidRecord(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Returns the raw field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns a field value, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns a field as a string slice, if present and a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Whether the field is present at all (explicit null counts as present).
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// The record's own remote id, when the source already knows it.
    pub fn id(&self) -> Option<String> {
        self.fields.get("id").and_then(value_as_id)
    }

    /// Optional external correlation id.
    pub fn external_id(&self) -> Option<String> {
        self.fields
            .get("externalId")
            .or_else(|| self.fields.get("external_id"))
            .and_then(value_as_id)
    }

    /// Parses the nested `associations` block, if any.
    pub fn associations(&self) -> Result<Vec<RecordAssociation>> {
        match self.fields.get("associations") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }

    /// Content hash of the raw record, used as the dedup key.
    ///
    /// Keys are ordered canonically before hashing so that two logically
    /// identical records hash equal regardless of field order.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hash_value(&Value::Object(self.fields.clone()), &mut hasher);
        hex::encode(hasher.finalize())
    }
}

fn hash_value(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(b":");
                hash_value(&map[key], hasher);
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                hash_value(item, hasher);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        other => hasher.update(other.to_string().as_bytes()),
    }
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_id))
}

/// The target of a requested association.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssociationTarget {
    /// Remote id of the target entity. Ids arrive as either strings or
    /// numbers depending on the source.
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    /// Kind of the target entity (e.g. "deals").
    #[serde(rename = "objectType")]
    pub object_type: Option<String>,
}

/// A resolved relation label, as the remote association API expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationLabel {
    #[serde(rename = "associationCategory")]
    pub category: String,
    #[serde(rename = "associationTypeId")]
    pub type_id: i64,
}

/// One requested association on an input record.
///
/// `types` may be empty, in which case the relation label is discovered at
/// link time from the (fromKind, toKind) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordAssociation {
    pub to: AssociationTarget,
    #[serde(default)]
    pub types: Vec<AssociationLabel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> NormalizedRecord {
        NormalizedRecord::from_value(value).unwrap()
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(NormalizedRecord::from_value(json!([1, 2, 3])).is_err());
        assert!(NormalizedRecord::from_value(json!("text")).is_err());
    }

    #[test]
    fn id_accepts_strings_and_numbers() {
        assert_eq!(record(json!({"id": "77"})).id(), Some("77".to_string()));
        assert_eq!(record(json!({"id": 77})).id(), Some("77".to_string()));
        assert_eq!(record(json!({"id": ""})).id(), None);
        assert_eq!(record(json!({"email": "a@b.com"})).id(), None);
    }

    #[test]
    fn external_id_accepts_both_spellings() {
        assert_eq!(
            record(json!({"externalId": "x1"})).external_id(),
            Some("x1".to_string())
        );
        assert_eq!(
            record(json!({"external_id": "x2"})).external_id(),
            Some("x2".to_string())
        );
    }

    #[test]
    fn content_hash_is_field_order_independent() {
        let a = record(json!({"email": "a@b.com", "first_name": "A"}));
        let b = record(json!({"first_name": "A", "email": "a@b.com"}));
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_differs_on_value_change() {
        let a = record(json!({"email": "a@b.com"}));
        let b = record(json!({"email": "c@d.com"}));
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_distinguishes_null_from_absent() {
        let a = record(json!({"email": "a@b.com", "phone": null}));
        let b = record(json!({"email": "a@b.com"}));
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn associations_parse_numeric_target_ids() {
        let rec = record(json!({
            "id": "77",
            "associations": [{
                "to": {"id": 99, "objectType": "deals"},
                "types": [{"associationCategory": "HUBSPOT_DEFINED", "associationTypeId": 3}]
            }]
        }));
        let assocs = rec.associations().unwrap();
        assert_eq!(assocs.len(), 1);
        assert_eq!(assocs[0].to.id, Some("99".to_string()));
        assert_eq!(assocs[0].to.object_type, Some("deals".to_string()));
        assert_eq!(assocs[0].types[0].type_id, 3);
    }

    #[test]
    fn associations_default_to_empty() {
        assert!(record(json!({"id": "1"})).associations().unwrap().is_empty());
        assert!(record(json!({"id": "1", "associations": null}))
            .associations()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn association_types_may_be_omitted() {
        let rec = record(json!({
            "associations": [{"to": {"id": "9", "objectType": "contacts"}}]
        }));
        let assocs = rec.associations().unwrap();
        assert!(assocs[0].types.is_empty());
    }
}
