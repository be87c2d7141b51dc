//! Record transformation into remote property schemas.
//!
//! Pure functions, no network. Each entity kind has a declarative rename
//! table plus a handful of shape reductions (first usable phone number,
//! first address, date prefixes). Shared rules:
//!
//! - a source field that is entirely absent produces no property (the
//!   remote value is left untouched); an explicit null is carried through
//!   (the remote value is cleared)
//! - opaque string values pass through an ordered decode chain, and decoded
//!   composites are re-encoded to canonical JSON strings because the remote
//!   API rejects raw composite property values

use serde::Deserialize;
use serde_json::{Map, Value};

use hubsync_types::{EntityKind, NormalizedRecord, TransformedPayload};

use crate::error::{EngineError, EngineResult};

/// Deal stages the remote pipeline accepts for `dealstage`.
const DEAL_STAGES: &[&str] = &[
    "appointmentscheduled",
    "qualifiedtobuy",
    "presentationscheduled",
    "decisionmakerboughtin",
    "contractsent",
    "closedwon",
    "closedlost",
];

/// Maps a record into the property schema for its kind.
///
/// # Errors
///
/// Returns `EngineError::Schema` for kind-specific violations: an activity
/// with an unknown subtype, an unsupported custom-field type, or an
/// unusable call duration.
pub fn transform(record: &NormalizedRecord, kind: &EntityKind) -> EngineResult<TransformedPayload> {
    let mut payload = match kind {
        EntityKind::Contact => transform_contact(record)?,
        EntityKind::Company => transform_company(record),
        EntityKind::Deal => transform_deal(record),
        EntityKind::Activity => match record.get_str("type") {
            Some("call") => transform_call(record)?,
            Some("task") => transform_task(record),
            other => {
                return Err(EngineError::Schema(format!(
                    "unknown activity type {other:?} (expected call or task)"
                )))
            }
        },
        EntityKind::Call => transform_call(record)?,
        EntityKind::Task => transform_task(record),
        EntityKind::Note => transform_note(record),
        EntityKind::Generic(_) => transform_generic(record, kind.clone()),
    };

    payload.remote_id = record.id();
    payload.associations = record.associations()?;
    Ok(payload)
}

fn transform_contact(record: &NormalizedRecord) -> EngineResult<TransformedPayload> {
    let mut payload = TransformedPayload::new(EntityKind::Contact);
    copy_field(&mut payload, record, "first_name", "firstname");
    copy_field(&mut payload, record, "last_name", "lastname");
    copy_field(&mut payload, record, "email", "email");
    copy_field(&mut payload, record, "company_name", "company");

    if let Some(numbers) = record.get("phone_numbers") {
        payload.insert(
            "phone",
            first_phone(numbers).map_or(Value::Null, Value::String),
        );
    }
    apply_first_address(&mut payload, record, true);

    for field in parse_custom_fields(record)? {
        let name = field.name.to_lowercase();
        let value = if field.field_type.as_deref() == Some("date") {
            reduce_date_value(&field.value)
        } else {
            field.value
        };
        payload.insert(name, value);
    }

    Ok(payload)
}

fn transform_company(record: &NormalizedRecord) -> TransformedPayload {
    let mut payload = TransformedPayload::new(EntityKind::Company);
    copy_field(&mut payload, record, "name", "name");
    copy_field(&mut payload, record, "website", "domain");
    copy_field(&mut payload, record, "industry", "industry");

    if let Some(numbers) = record.get("phone_numbers") {
        if let Some(phone) = first_phone(numbers) {
            payload.insert("phone", Value::String(phone));
        }
    }
    apply_first_address(&mut payload, record, false);
    payload
}

fn transform_deal(record: &NormalizedRecord) -> TransformedPayload {
    let mut payload = TransformedPayload::new(EntityKind::Deal);
    copy_field(&mut payload, record, "title", "dealname");
    copy_field(&mut payload, record, "monetary_amount", "amount");
    copy_field(&mut payload, record, "pipeline_id", "pipeline");
    copy_field(&mut payload, record, "priority", "priority");
    copy_field(&mut payload, record, "owner_id", "hubspot_owner_id");

    if let Some(close_date) = record.get_str("close_date") {
        let normalized = if close_date.ends_with('Z') {
            close_date.to_string()
        } else {
            format!("{close_date}Z")
        };
        payload.insert("closedate", Value::String(normalized));
    }

    if let Some(status) = record.get_str("status") {
        if DEAL_STAGES.contains(&status) {
            payload.insert("dealstage", Value::String(status.to_string()));
        }
    }
    payload
}

fn transform_call(record: &NormalizedRecord) -> EngineResult<TransformedPayload> {
    let mut payload = TransformedPayload::new(EntityKind::Call);
    copy_field(&mut payload, record, "activity_datetime", "hs_timestamp");
    copy_field(&mut payload, record, "title", "hs_call_title");
    copy_field(&mut payload, record, "owner_id", "hubspot_owner_id");
    copy_field(&mut payload, record, "call_direction", "hs_call_direction");
    copy_field(&mut payload, record, "recording_url", "hs_call_recording_url");
    payload.insert("hs_call_status", Value::String("COMPLETED".to_string()));

    // Remote wants milliseconds; sources send seconds as number or string.
    if let Some(duration) = record.get("duration_seconds") {
        let seconds = match duration {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            Value::Null => None,
            _ => {
                return Err(EngineError::Schema(format!(
                    "unusable call duration: {duration}"
                )))
            }
        };
        if let Some(seconds) = seconds {
            payload.insert("hs_call_duration", Value::from(seconds * 1000));
        } else if !duration.is_null() {
            return Err(EngineError::Schema(format!(
                "unusable call duration: {duration}"
            )));
        }
    }
    Ok(payload)
}

fn transform_task(record: &NormalizedRecord) -> TransformedPayload {
    let mut payload = TransformedPayload::new(EntityKind::Task);
    copy_field(&mut payload, record, "end_datetime", "hs_timestamp");
    copy_field(&mut payload, record, "description", "hs_task_body");
    copy_field(&mut payload, record, "title", "hs_task_subject");
    copy_field(&mut payload, record, "status", "hs_task_status");
    copy_field(&mut payload, record, "priority", "hs_task_priority");
    copy_field(&mut payload, record, "owner_id", "hubspot_owner_id");
    payload
}

fn transform_note(record: &NormalizedRecord) -> TransformedPayload {
    let mut payload = TransformedPayload::new(EntityKind::Note);
    copy_field(&mut payload, record, "created_at", "hs_timestamp");
    copy_field(&mut payload, record, "body", "hs_note_body");
    copy_field(&mut payload, record, "owner_id", "hubspot_owner_id");
    payload
}

/// Generic fallback: unwrap a `properties` envelope when present, drop the
/// reserved routing fields, and pass every value through the decode chain.
fn transform_generic(record: &NormalizedRecord, kind: EntityKind) -> TransformedPayload {
    let mut payload = TransformedPayload::new(kind);

    let source: Map<String, Value> = match record.get("properties") {
        Some(Value::Object(envelope)) => envelope.clone(),
        _ => record.fields().clone(),
    };
    for (name, value) in source {
        if matches!(
            name.as_str(),
            "id" | "associations" | "externalId" | "external_id"
        ) {
            continue;
        }
        payload.insert(name, decode_opaque(&value));
    }
    payload
}

fn copy_field(
    payload: &mut TransformedPayload,
    record: &NormalizedRecord,
    source: &str,
    property: &str,
) {
    if let Some(value) = record.get(source) {
        payload.insert(property, value.clone());
    }
}

/// First usable phone number across the heterogeneous shapes sources send:
/// a list of `{number: ...}` objects, or a list of bare strings.
fn first_phone(value: &Value) -> Option<String> {
    let items = value.as_array()?;
    for item in items {
        match item {
            Value::Object(map) => {
                if let Some(Value::String(number)) = map.get("number") {
                    return Some(number.clone());
                }
            }
            Value::String(number) => return Some(number.clone()),
            _ => {}
        }
    }
    None
}

/// Denormalizes the first address block into flat properties. Contacts get
/// the street line as well; companies only take city/state/country.
fn apply_first_address(
    payload: &mut TransformedPayload,
    record: &NormalizedRecord,
    include_street: bool,
) {
    let Some(Value::Array(addresses)) = record.get("addresses") else {
        return;
    };
    let Some(Value::Object(address)) = addresses.first() else {
        return;
    };
    if include_street {
        if let Some(line) = address.get("line1") {
            payload.insert("address", line.clone());
        }
    }
    for key in ["city", "state", "country"] {
        if let Some(value) = address.get(key) {
            payload.insert(key, value.clone());
        }
    }
}

/// A custom field on an input record.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomField {
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Parses and validates the record's `custom_fields` block.
///
/// # Errors
///
/// `EngineError::Schema` when the block is malformed or any field carries
/// an unsupported type.
pub fn parse_custom_fields(record: &NormalizedRecord) -> EngineResult<Vec<CustomField>> {
    let fields: Vec<CustomField> = match record.get("custom_fields") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| EngineError::Schema(format!("invalid custom_fields block: {e}")))?,
    };
    for field in &fields {
        if let Some(field_type) = &field.field_type {
            hubspot_field_type(field_type)?;
        }
    }
    Ok(fields)
}

/// Maps a declared custom-field type to the remote field widget.
///
/// # Errors
///
/// `EngineError::Schema` for anything outside the accepted set.
pub fn hubspot_field_type(field_type: &str) -> EngineResult<&'static str> {
    match field_type {
        "date" => Ok("date"),
        "bool" => Ok("booleancheckbox"),
        "enumeration" => Ok("select"),
        "string" => Ok("textarea"),
        "number" => Ok("number"),
        other => Err(EngineError::Schema(format!(
            "custom field type {other:?} does not match an accepted type \
             (expected date, bool, enumeration, string or number)"
        ))),
    }
}

/// Reduces a date-typed custom value to its `YYYY-MM-DD`-shaped prefix when
/// one can be found; otherwise the value is left unchanged.
fn reduce_date_value(value: &Value) -> Value {
    match value {
        Value::String(s) => match extract_date_token(s) {
            Some(token) => Value::String(token),
            None => value.clone(),
        },
        other => other.clone(),
    }
}

/// Finds the first `\d{4}-?\d{1,2}-?\d{1,2}` shaped token in a string.
fn extract_date_token(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    for start in 0..bytes.len() {
        let rest = &bytes[start..];
        if rest.len() < 6 {
            break;
        }
        if !rest[..4].iter().all(u8::is_ascii_digit) {
            continue;
        }
        let mut pos = 4;
        if rest.get(pos) == Some(&b'-') {
            pos += 1;
        }
        let month = leading_digits(&rest[pos..], 2);
        if month == 0 {
            continue;
        }
        pos += month;
        if rest.get(pos) == Some(&b'-') {
            pos += 1;
        }
        let day = leading_digits(&rest[pos..], 2);
        if day == 0 {
            continue;
        }
        pos += day;
        return Some(String::from_utf8_lossy(&rest[..pos]).into_owned());
    }
    None
}

fn leading_digits(bytes: &[u8], max: usize) -> usize {
    bytes.iter().take(max).take_while(|b| b.is_ascii_digit()).count()
}

/// Ordered decode attempts for opaque string values. First success wins;
/// no attempt succeeding leaves the value unchanged.
const DECODERS: &[fn(&str) -> Option<Value>] = &[decode_json, decode_python_literal];

/// Speculatively decodes an opaque value, then re-encodes composites to a
/// canonical JSON string.
pub fn decode_opaque(value: &Value) -> Value {
    let decoded = match value {
        Value::String(s) => DECODERS
            .iter()
            .find_map(|decode| decode(s))
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    };
    match &decoded {
        Value::Object(_) | Value::Array(_) => {
            Value::String(serde_json::to_string(&decoded).unwrap_or_default())
        }
        _ => decoded,
    }
}

fn decode_json(s: &str) -> Option<Value> {
    serde_json::from_str(s.trim()).ok()
}

/// Best-effort decode of Python-literal shapes (`{'k': 'v'}`, True, False,
/// None) that some sources stringify instead of serializing as JSON.
fn decode_python_literal(s: &str) -> Option<Value> {
    let trimmed = s.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    let normalized = trimmed
        .replace('\'', "\"")
        .replace("True", "true")
        .replace("False", "false")
        .replace("None", "null");
    serde_json::from_str(&normalized).ok()
}

/// Restores properties that already carry a non-null remote value, so an
/// upsert under `only_upsert_empty_fields` never overwrites them.
pub fn apply_merge_protect(properties: &mut Map<String, Value>, existing: &Map<String, Value>) {
    for (name, value) in existing {
        if value.is_null() {
            continue;
        }
        if let Some(slot) = properties.get_mut(name) {
            *slot = value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_types::NormalizedRecord;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> NormalizedRecord {
        NormalizedRecord::from_value(value).unwrap()
    }

    #[test]
    fn contact_field_renames() {
        let payload = transform(
            &record(json!({
                "first_name": "Ada",
                "last_name": "Lovelace",
                "email": "ada@example.com",
                "company_name": "Analytical Engines"
            })),
            &EntityKind::Contact,
        )
        .unwrap();
        assert_eq!(payload.properties["firstname"], json!("Ada"));
        assert_eq!(payload.properties["lastname"], json!("Lovelace"));
        assert_eq!(payload.properties["company"], json!("Analytical Engines"));
        assert!(payload.remote_id.is_none());
    }

    #[test]
    fn absent_field_is_omitted_null_is_kept() {
        let payload = transform(
            &record(json!({"email": "a@b.com", "first_name": null})),
            &EntityKind::Contact,
        )
        .unwrap();
        assert_eq!(payload.properties["firstname"], Value::Null);
        assert!(!payload.properties.contains_key("lastname"));
    }

    #[test]
    fn first_phone_across_shapes() {
        assert_eq!(
            first_phone(&json!([{"type": "home"}, {"number": "555-1"}, "555-2"])),
            Some("555-1".to_string())
        );
        assert_eq!(first_phone(&json!(["555-2"])), Some("555-2".to_string()));
        assert_eq!(first_phone(&json!([])), None);
        assert_eq!(first_phone(&json!("not a list")), None);
    }

    #[test]
    fn contact_phone_list_without_usable_number_clears() {
        let payload = transform(
            &record(json!({"email": "a@b.com", "phone_numbers": [{"type": "home"}]})),
            &EntityKind::Contact,
        )
        .unwrap();
        assert_eq!(payload.properties["phone"], Value::Null);
    }

    #[test]
    fn contact_address_is_denormalized() {
        let payload = transform(
            &record(json!({
                "email": "a@b.com",
                "addresses": [{"line1": "1 Main St", "city": "Springfield", "country": "US"}]
            })),
            &EntityKind::Contact,
        )
        .unwrap();
        assert_eq!(payload.properties["address"], json!("1 Main St"));
        assert_eq!(payload.properties["city"], json!("Springfield"));
        assert_eq!(payload.properties["country"], json!("US"));
        assert!(!payload.properties.contains_key("state"));
    }

    #[test]
    fn company_takes_domain_and_first_address() {
        let payload = transform(
            &record(json!({
                "name": "Acme",
                "website": "acme.test",
                "phone_numbers": [{"number": "555-9"}],
                "addresses": [{"line1": "ignored", "city": "Metropolis"}]
            })),
            &EntityKind::Company,
        )
        .unwrap();
        assert_eq!(payload.properties["domain"], json!("acme.test"));
        assert_eq!(payload.properties["phone"], json!("555-9"));
        assert_eq!(payload.properties["city"], json!("Metropolis"));
        assert!(!payload.properties.contains_key("address"));
    }

    #[test]
    fn deal_close_date_gets_trailing_z() {
        let payload = transform(
            &record(json!({"title": "Big deal", "close_date": "2024-05-01T00:00:00"})),
            &EntityKind::Deal,
        )
        .unwrap();
        assert_eq!(payload.properties["closedate"], json!("2024-05-01T00:00:00Z"));
        assert_eq!(payload.properties["dealname"], json!("Big deal"));

        let already = transform(
            &record(json!({"close_date": "2024-05-01T00:00:00Z"})),
            &EntityKind::Deal,
        )
        .unwrap();
        assert_eq!(already.properties["closedate"], json!("2024-05-01T00:00:00Z"));
    }

    #[test]
    fn deal_stage_only_for_known_stages() {
        let known = transform(&record(json!({"status": "closedwon"})), &EntityKind::Deal).unwrap();
        assert_eq!(known.properties["dealstage"], json!("closedwon"));

        let unknown = transform(&record(json!({"status": "daydreaming"})), &EntityKind::Deal).unwrap();
        assert!(!unknown.properties.contains_key("dealstage"));
    }

    #[test]
    fn activity_dispatches_on_type() {
        let call = transform(
            &record(json!({"type": "call", "title": "Intro", "duration_seconds": 90})),
            &EntityKind::Activity,
        )
        .unwrap();
        assert_eq!(call.kind, EntityKind::Call);
        assert_eq!(call.properties["hs_call_duration"], json!(90_000));
        assert_eq!(call.properties["hs_call_status"], json!("COMPLETED"));

        let task = transform(
            &record(json!({"type": "task", "title": "Follow up", "status": "NOT_STARTED"})),
            &EntityKind::Activity,
        )
        .unwrap();
        assert_eq!(task.kind, EntityKind::Task);
        assert_eq!(task.properties["hs_task_subject"], json!("Follow up"));
    }

    #[test]
    fn unknown_activity_type_is_schema_error() {
        let err = transform(
            &record(json!({"type": "meeting"})),
            &EntityKind::Activity,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Schema(_)));
    }

    #[test]
    fn call_duration_accepts_string_seconds() {
        let payload = transform(
            &record(json!({"type": "call", "duration_seconds": "42"})),
            &EntityKind::Activity,
        )
        .unwrap();
        assert_eq!(payload.properties["hs_call_duration"], json!(42_000));
    }

    #[test]
    fn call_duration_rejects_garbage() {
        let err = transform(
            &record(json!({"type": "call", "duration_seconds": "soon"})),
            &EntityKind::Activity,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Schema(_)));
    }

    #[test]
    fn custom_fields_lowercase_and_date_reduce() {
        let payload = transform(
            &record(json!({
                "email": "a@b.com",
                "custom_fields": [
                    {"name": "Signup_Date", "value": "2021-05-14T10:00:00", "type": "date"},
                    {"name": "Tier", "value": "gold"}
                ]
            })),
            &EntityKind::Contact,
        )
        .unwrap();
        assert_eq!(payload.properties["signup_date"], json!("2021-05-14"));
        assert_eq!(payload.properties["tier"], json!("gold"));
    }

    #[test]
    fn unsupported_custom_field_type_is_schema_error() {
        let err = transform(
            &record(json!({
                "custom_fields": [{"name": "x", "value": 1, "type": "geolocation"}]
            })),
            &EntityKind::Contact,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Schema(_)));
    }

    #[test]
    fn extract_date_token_shapes() {
        assert_eq!(extract_date_token("2021-05-14T10:00:00"), Some("2021-05-14".into()));
        assert_eq!(extract_date_token("20210514"), Some("20210514".into()));
        assert_eq!(extract_date_token("born 1999-1-2 maybe"), Some("1999-1-2".into()));
        assert_eq!(extract_date_token("no date here"), None);
    }

    #[test]
    fn generic_unwraps_properties_envelope() {
        let payload = transform(
            &record(json!({
                "id": "5",
                "properties": {"stage": "won", "meta": {"a": 1}}
            })),
            &EntityKind::Generic("tickets".into()),
        )
        .unwrap();
        assert_eq!(payload.remote_id, Some("5".to_string()));
        assert_eq!(payload.properties["stage"], json!("won"));
        // composite re-encoded to a canonical JSON string
        assert_eq!(payload.properties["meta"], json!("{\"a\":1}"));
        assert!(!payload.properties.contains_key("id"));
    }

    #[test]
    fn decode_opaque_chain() {
        assert_eq!(decode_opaque(&json!("42")), json!(42));
        assert_eq!(decode_opaque(&json!("{\"a\": 1}")), json!("{\"a\":1}"));
        assert_eq!(decode_opaque(&json!("{'a': True}")), json!("{\"a\":true}"));
        assert_eq!(decode_opaque(&json!("plain text")), json!("plain text"));
        assert_eq!(decode_opaque(&json!({"a": 1})), json!("{\"a\":1}"));
    }

    #[test]
    fn merge_protect_restores_non_null_existing() {
        let mut properties = json!({"email": "new@b.com", "phone": "111", "city": "X"})
            .as_object()
            .cloned()
            .unwrap();
        let existing = json!({"email": "old@b.com", "phone": null, "state": "Y"})
            .as_object()
            .cloned()
            .unwrap();
        apply_merge_protect(&mut properties, &existing);
        assert_eq!(properties["email"], json!("old@b.com")); // protected
        assert_eq!(properties["phone"], json!("111")); // remote was null
        assert_eq!(properties["city"], json!("X")); // remote had no value
        assert!(!properties.contains_key("state")); // never added
    }

    #[test]
    fn payload_carries_associations() {
        let payload = transform(
            &record(json!({
                "id": "77",
                "associations": [{
                    "to": {"id": "99", "objectType": "deals"},
                    "types": [{"associationCategory": "HUBSPOT_DEFINED", "associationTypeId": 3}]
                }]
            })),
            &EntityKind::Contact,
        )
        .unwrap();
        assert_eq!(payload.remote_id, Some("77".to_string()));
        assert_eq!(payload.associations.len(), 1);
    }
}
