use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::jobs::{JobDefinition, JobSettings};
use crate::models::record::{Patch, TargetRecord};
use crate::services::transformer::{Transformation, TransformError};
use crate::services::workers_ai::WorkersAiClient;

pub const NAME: &str = "description-migration";
pub const COLLECTION: &str = "meals";

/// Meals with a source description but no localized one yet.
pub fn needs_localized_description(record: &TargetRecord) -> bool {
    record.has("description") && !record.has("description_localized")
}

/// Localizes meal descriptions with the text model.
pub struct LocalizeDescription {
    ai: Arc<WorkersAiClient>,
    language: String,
}

impl LocalizeDescription {
    pub fn new(ai: Arc<WorkersAiClient>, language: impl Into<String>) -> Self {
        Self {
            ai,
            language: language.into(),
        }
    }

    fn prompt(&self, name: &str, description: &str) -> String {
        format!(
            "Translate this meal description into the language with ISO code '{}'. \
             Keep ingredient names accurate and the tone neutral. \
             Reply with the translated description only.\n\nMeal: {}\nDescription: {}",
            self.language, name, description
        )
    }
}

#[async_trait]
impl Transformation for LocalizeDescription {
    async fn apply(&self, record: &TargetRecord) -> Result<Patch, TransformError> {
        let description = record
            .text("description")
            .ok_or_else(|| TransformError::Permanent("meal has no description".into()))?;
        let name = record.text("name").unwrap_or("unnamed meal");

        let localized = self.ai.generate_text(&self.prompt(name, description), 512).await?;

        let mut patch = Patch::new();
        patch.insert("description_localized".into(), Value::String(localized));
        patch.insert(
            "description_language".into(),
            Value::String(self.language.clone()),
        );
        patch.insert(
            "description_model".into(),
            Value::String(self.ai.text_model().to_string()),
        );
        Ok(patch)
    }
}

pub fn job(settings: JobSettings, ai: Arc<WorkersAiClient>, language: &str) -> JobDefinition {
    JobDefinition::new(
        NAME,
        COLLECTION,
        settings,
        Arc::new(needs_localized_description),
        Arc::new(LocalizeDescription::new(ai.clone(), language)),
    )
    .with_preflight(ai)
}
