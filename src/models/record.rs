use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shallow set of fields merged into a record. `null` clears a field.
pub type Patch = Map<String, Value>;

/// A document the engine reads and patches but never owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetRecord {
    pub key: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl TargetRecord {
    pub fn new(key: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Non-empty string value of `field`, trimmed.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn has(&self, field: &str) -> bool {
        match self.get(field) {
            None => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        }
    }

    /// Shallow merge, as the record stores apply it.
    pub fn apply(&mut self, patch: &Patch) {
        for (field, value) in patch {
            self.fields.insert(field.clone(), value.clone());
        }
    }
}

/// Field names a job uses to mark terminal failures on a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureMarker {
    pub error_field: String,
    pub failed_at_field: String,
    pub attempts_field: String,
}

impl FailureMarker {
    pub fn for_job(job: &str) -> Self {
        let prefix = job.replace('-', "_");
        Self {
            error_field: format!("{prefix}_error"),
            failed_at_field: format!("{prefix}_failed_at"),
            attempts_field: format!("{prefix}_attempts"),
        }
    }

    /// Patch recording a terminal failure. The attempt counter accumulates
    /// across passes.
    pub fn failure_patch(&self, record: &TargetRecord, error: &str, at: DateTime<Utc>) -> Patch {
        let previous = record
            .get(&self.attempts_field)
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let mut patch = Patch::new();
        patch.insert(self.error_field.clone(), Value::String(error.to_string()));
        patch.insert(self.failed_at_field.clone(), Value::String(at.to_rfc3339()));
        patch.insert(self.attempts_field.clone(), Value::from(previous + 1));
        patch
    }

    /// Adds the fields that clear a previous failure to a success patch.
    pub fn clear_into(&self, record: &TargetRecord, patch: &mut Patch) {
        if record.get(&self.error_field).is_some() {
            patch.insert(self.error_field.clone(), Value::Null);
            patch.insert(self.failed_at_field.clone(), Value::Null);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> TargetRecord {
        TargetRecord::new("meal-1", value.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_text_ignores_blank_and_null() {
        let r = record(json!({"a": "  ", "b": null, "c": " soup "}));
        assert_eq!(r.text("a"), None);
        assert_eq!(r.text("b"), None);
        assert_eq!(r.text("c"), Some("soup"));
        assert!(!r.has("b"));
        assert!(r.has("c"));
    }

    #[test]
    fn test_failure_marker_accumulates_attempts() {
        let marker = FailureMarker::for_job("image-regeneration");
        assert_eq!(marker.error_field, "image_regeneration_error");

        let mut r = record(json!({"name": "pasta"}));
        let now = Utc::now();
        let first = marker.failure_patch(&r, "timeout", now);
        r.apply(&first);
        let second = marker.failure_patch(&r, "timeout", now);

        assert_eq!(second["image_regeneration_attempts"], json!(2));
        assert_eq!(second["image_regeneration_error"], json!("timeout"));
    }

    #[test]
    fn test_clear_only_when_failed_before() {
        let marker = FailureMarker::for_job("tagging");
        let clean = record(json!({}));
        let mut patch = Patch::new();
        marker.clear_into(&clean, &mut patch);
        assert!(patch.is_empty());

        let failed = record(json!({"tagging_error": "boom"}));
        marker.clear_into(&failed, &mut patch);
        assert_eq!(patch["tagging_error"], Value::Null);
        assert_eq!(patch["tagging_failed_at"], Value::Null);
    }
}
