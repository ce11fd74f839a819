use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::jobs::{JobDefinition, JobSettings};
use crate::models::record::{Patch, TargetRecord};
use crate::services::transformer::{Transformation, TransformError};
use crate::services::workers_ai::WorkersAiClient;

pub const NAME: &str = "tag-meal-generation";
pub const COLLECTION: &str = "tags";

/// Provenance written on tags whose meal came from the current generator.
pub const GENERATOR_VERSION: &str = "llm-meal-v1";

const MEAL_FIELDS: [&str; 6] = ["name", "description", "calories", "protein_g", "carbs_g", "fat_g"];

/// Tags that have not yet produced a meal with the current generator.
pub fn needs_generated_meal(record: &TargetRecord) -> bool {
    record.has("name") && record.text("meal_provenance") != Some(GENERATOR_VERSION)
}

/// Asks the text model for one meal matching a tag.
pub struct GenerateMealForTag {
    ai: Arc<WorkersAiClient>,
}

impl GenerateMealForTag {
    pub fn new(ai: Arc<WorkersAiClient>) -> Self {
        Self { ai }
    }
}

/// First JSON object embedded in model output, with every meal field present.
pub fn parse_meal(output: &str) -> Option<serde_json::Map<String, Value>> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end < start {
        return None;
    }

    let value: Value = serde_json::from_str(&output[start..=end]).ok()?;
    let meal = value.as_object()?;
    MEAL_FIELDS
        .iter()
        .all(|f| meal.get(*f).is_some_and(|v| !v.is_null()))
        .then(|| meal.clone())
}

#[async_trait]
impl Transformation for GenerateMealForTag {
    async fn apply(&self, record: &TargetRecord) -> Result<Patch, TransformError> {
        let tag = record
            .text("name")
            .ok_or_else(|| TransformError::Permanent("tag has no name".into()))?;

        let prompt = format!(
            "Create one realistic meal that fits the dietary tag \"{tag}\". \
             Reply with a single JSON object with the fields {} \
             (numbers for calories and grams). No other text.",
            MEAL_FIELDS.join(", ")
        );
        let output = self.ai.generate_text(&prompt, 400).await?;

        // The model sometimes wraps or truncates the JSON; another attempt usually fixes it.
        let meal = parse_meal(&output)
            .ok_or_else(|| TransformError::Transient("model output is not a complete meal".into()))?;

        let mut patch = Patch::new();
        patch.insert("generated_meal".into(), Value::Object(meal));
        patch.insert(
            "meal_provenance".into(),
            Value::String(GENERATOR_VERSION.to_string()),
        );
        Ok(patch)
    }
}

pub fn job(settings: JobSettings, ai: Arc<WorkersAiClient>) -> JobDefinition {
    JobDefinition::new(
        NAME,
        COLLECTION,
        settings,
        Arc::new(needs_generated_meal),
        Arc::new(GenerateMealForTag::new(ai.clone())),
    )
    .with_preflight(ai)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_meal_from_wrapped_output() {
        let output = r#"Sure! Here it is:
```json
{"name": "Tofu stir fry", "description": "Crispy tofu", "calories": 420,
 "protein_g": 24, "carbs_g": 38, "fat_g": 18}
```"#;
        let meal = parse_meal(output).unwrap();
        assert_eq!(meal["name"], json!("Tofu stir fry"));
    }

    #[test]
    fn test_parse_meal_rejects_incomplete() {
        assert!(parse_meal(r#"{"name": "Toast"}"#).is_none());
        assert!(parse_meal("no json here").is_none());
        assert!(parse_meal("} {").is_none());
    }

    #[test]
    fn test_eligibility_uses_provenance() {
        let tag = |v: Value| TargetRecord::new("tag-1", v.as_object().cloned().unwrap_or_default());
        assert!(needs_generated_meal(&tag(json!({"name": "vegan"}))));
        assert!(needs_generated_meal(&tag(json!({"name": "vegan", "meal_provenance": "manual"}))));
        assert!(!needs_generated_meal(&tag(json!({
            "name": "vegan",
            "meal_provenance": GENERATOR_VERSION
        }))));
    }
}
