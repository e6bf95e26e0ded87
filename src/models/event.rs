//! Decoding of storage notification payloads.
//!
//! Notifications arrive in two historical shapes: the object name may be
//! carried as `name` or as the legacy `file_name`, and the generation may be
//! a string or a bare number. Decoding normalizes both into a single
//! [`ObjectRef`] so the rest of the pipeline never inspects raw JSON.

use serde_json::Value;
use thiserror::Error;

use crate::models::record::IdempotencyKey;

/// Canonical `{bucket, object, generation}` triple extracted from a
/// notification payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub object: String,
    pub generation: String,
}

impl ObjectRef {
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.bucket, &self.object, &self.generation)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("missing required CloudEvent fields: {}", missing.join(", "))]
pub struct MissingFields {
    /// Which of `bucket`, `name`, `generation` could not be resolved.
    pub missing: Vec<&'static str>,
}

/// Decode a notification data record into an [`ObjectRef`].
///
/// Field resolution order for the object name: `name` first, then the legacy
/// `file_name`; the first present non-empty value wins. The generation is
/// accepted as any JSON scalar and normalized to its canonical string form.
pub fn decode_event(data: &Value) -> Result<ObjectRef, MissingFields> {
    let bucket = non_empty_str(data, "bucket");
    let object = non_empty_str(data, "name").or_else(|| non_empty_str(data, "file_name"));
    let generation = data.get("generation").and_then(scalar_to_string);

    let mut missing = Vec::new();
    if bucket.is_none() {
        missing.push("bucket");
    }
    if object.is_none() {
        missing.push("name");
    }
    if generation.is_none() {
        missing.push("generation");
    }
    if !missing.is_empty() {
        return Err(MissingFields { missing });
    }

    Ok(ObjectRef {
        bucket: bucket.unwrap(),
        object: object.unwrap(),
        generation: generation.unwrap(),
    })
}

/// Unwrap a CloudEvent-style envelope: a structured envelope carries the
/// record under `data`; a bare record is used as-is.
pub fn envelope_data(body: &Value) -> &Value {
    match body.get("data") {
        Some(data @ Value::Object(_)) => data,
        _ => body,
    }
}

fn non_empty_str(data: &Value, field: &str) -> Option<String> {
    match data.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_primary_field_names() {
        let data = json!({"bucket": "photos", "name": "a/cat.jpg", "generation": "17"});
        let decoded = decode_event(&data).unwrap();
        assert_eq!(decoded.bucket, "photos");
        assert_eq!(decoded.object, "a/cat.jpg");
        assert_eq!(decoded.generation, "17");
    }

    #[test]
    fn legacy_file_name_is_accepted() {
        let data = json!({"bucket": "photos", "file_name": "cat.jpg", "generation": 3});
        assert_eq!(decode_event(&data).unwrap().object, "cat.jpg");
    }

    #[test]
    fn primary_name_wins_over_legacy() {
        let data = json!({
            "bucket": "photos",
            "name": "new.jpg",
            "file_name": "old.jpg",
            "generation": 1
        });
        assert_eq!(decode_event(&data).unwrap().object, "new.jpg");
    }

    #[test]
    fn numeric_and_string_generations_collapse() {
        let a = json!({"bucket": "b", "name": "o", "generation": 123});
        let b = json!({"bucket": "b", "name": "o", "generation": "123"});
        assert_eq!(
            decode_event(&a).unwrap().idempotency_key(),
            decode_event(&b).unwrap().idempotency_key()
        );
    }

    #[test]
    fn reports_every_missing_field() {
        let err = decode_event(&json!({})).unwrap_err();
        assert_eq!(err.missing, vec!["bucket", "name", "generation"]);
    }

    #[test]
    fn empty_strings_count_as_missing() {
        let data = json!({"bucket": "", "name": "cat.jpg", "generation": "1"});
        let err = decode_event(&data).unwrap_err();
        assert_eq!(err.missing, vec!["bucket"]);
    }

    #[test]
    fn envelope_data_unwraps_structured_events() {
        let body = json!({"specversion": "1.0", "data": {"bucket": "b"}});
        assert_eq!(envelope_data(&body), &json!({"bucket": "b"}));

        let bare = json!({"bucket": "b"});
        assert_eq!(envelope_data(&bare), &bare);
    }
}
