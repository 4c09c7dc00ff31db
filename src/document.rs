//! Schema-less documents.
//!
//! A document is a JSON-shaped mapping of field names to values, identified
//! within its collection by a string `id` field. The `createdAt` and
//! `updatedAt` stamps live inside the record itself (camelCase, RFC 3339)
//! because the persisted JSON is read directly by the web tier.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field names to values, as stored.
pub type Fields = Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// A record within a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Fields);

impl Document {
    pub fn new(fields: Fields) -> Self {
        Self(fields)
    }

    /// The record id, if one has been assigned.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Fields {
        &self.0
    }

    pub fn into_fields(self) -> Fields {
        self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Return the id, assigning a fresh UUID v4 if the caller supplied none
    /// (or supplied a non-string or empty value).
    pub(crate) fn ensure_id(&mut self) -> String {
        if let Some(id) = self.id().filter(|id| !id.is_empty()) {
            return id.to_string();
        }
        let id = Uuid::new_v4().to_string();
        self.0.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        id
    }

    /// Set `createdAt` to now unless the caller already supplied one.
    pub(crate) fn stamp_created(&mut self) {
        if !self.0.contains_key(CREATED_AT_FIELD) {
            self.0
                .insert(CREATED_AT_FIELD.to_string(), Value::String(now_rfc3339()));
        }
    }

    /// Shallow-merge `patch` into this record: supplied top-level fields
    /// replace existing ones, everything else is retained. The id is
    /// immutable and `updatedAt` is refreshed.
    pub(crate) fn apply_patch(&mut self, patch: Fields) {
        let id = self.0.get(ID_FIELD).cloned();
        for (field, value) in patch {
            self.0.insert(field, value);
        }
        if let Some(id) = id {
            self.0.insert(ID_FIELD.to_string(), id);
        }
        self.0
            .insert(UPDATED_AT_FIELD.to_string(), Value::String(now_rfc3339()));
    }

    /// Exact-equality filter: every field in `filter` must equal the
    /// corresponding record field. An empty filter matches everything.
    pub fn matches(&self, filter: &Fields) -> bool {
        filter
            .iter()
            .all(|(field, expected)| self.0.get(field) == Some(expected))
    }

    /// Serialize for storage (pretty-printed so records stay readable on
    /// disk and in bucket consoles).
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        // Maps of Value cannot fail to serialize.
        serde_json::to_vec_pretty(&self.0).unwrap_or_default()
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<Fields>(bytes).map(Self)
    }
}

impl From<Fields> for Document {
    fn from(fields: Fields) -> Self {
        Self(fields)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_ensure_id_keeps_existing() {
        let mut doc = Document::new(fields(json!({"id": "user-7", "name": "ada"})));
        assert_eq!(doc.ensure_id(), "user-7");
        assert_eq!(doc.id(), Some("user-7"));
    }

    #[test]
    fn test_ensure_id_generates_uuid() {
        let mut doc = Document::new(fields(json!({"name": "ada"})));
        let id = doc.ensure_id();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(doc.id(), Some(id.as_str()));
    }

    #[test]
    fn test_stamp_created_only_once() {
        let mut doc = Document::new(fields(json!({"createdAt": "2024-01-01T00:00:00Z"})));
        doc.stamp_created();
        assert_eq!(
            doc.get(CREATED_AT_FIELD),
            Some(&json!("2024-01-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_patch_is_merge_not_replace() {
        let mut doc = Document::new(fields(json!({"id": "1", "a": 1, "b": 2})));
        doc.apply_patch(fields(json!({"b": 3})));

        assert_eq!(doc.get("a"), Some(&json!(1)));
        assert_eq!(doc.get("b"), Some(&json!(3)));
        assert!(doc.get(UPDATED_AT_FIELD).is_some());
    }

    #[test]
    fn test_patch_cannot_change_id() {
        let mut doc = Document::new(fields(json!({"id": "1", "a": 1})));
        doc.apply_patch(fields(json!({"id": "2", "a": 5})));

        assert_eq!(doc.id(), Some("1"));
        assert_eq!(doc.get("a"), Some(&json!(5)));
    }

    #[test]
    fn test_matches_exact_equality() {
        let doc = Document::new(fields(json!({"id": "1", "cat": "a", "n": 2})));

        assert!(doc.matches(&fields(json!({"cat": "a"}))));
        assert!(doc.matches(&fields(json!({"cat": "a", "n": 2}))));
        assert!(!doc.matches(&fields(json!({"cat": "b"}))));
        assert!(!doc.matches(&fields(json!({"missing": null}))));
        assert!(doc.matches(&Fields::new()));
    }

    #[test]
    fn test_round_trip_bytes() {
        let doc = Document::new(fields(json!({"id": "1", "nested": {"k": [1, 2]}})));
        let restored = Document::from_slice(&doc.to_bytes()).expect("valid JSON");
        assert_eq!(doc, restored);
    }
}
