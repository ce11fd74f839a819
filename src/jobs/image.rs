use async_trait::async_trait;
use image::ImageFormat;
use serde_json::Value;
use std::sync::Arc;

use crate::config::ConfigError;
use crate::jobs::{JobDefinition, JobSettings, Preflight};
use crate::models::record::{Patch, TargetRecord};
use crate::services::eligibility::EligibilityFilter;
use crate::services::storage::R2Client;
use crate::services::transformer::{Transformation, TransformError};
use crate::services::workers_ai::WorkersAiClient;

pub const NAME: &str = "image-regeneration";
pub const COLLECTION: &str = "meals";

/// Meals whose image was not produced by the current provider.
pub struct StaleImage {
    provider: String,
}

impl StaleImage {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl EligibilityFilter for StaleImage {
    fn is_eligible(&self, record: &TargetRecord) -> bool {
        record.has("name") && record.text("image_provider") != Some(self.provider.as_str())
    }
}

/// Generates a meal image, stores it in R2 and points the record at it.
pub struct RegenerateImage {
    ai: Arc<WorkersAiClient>,
    storage: Option<Arc<R2Client>>,
    provider: String,
}

impl RegenerateImage {
    fn prompt(record: &TargetRecord) -> String {
        let name = record.text("name").unwrap_or("a healthy meal");
        match record.text("description") {
            Some(description) => format!(
                "Appetizing overhead food photograph of {name}: {description}. \
                 Natural light, plain background, no text."
            ),
            None => format!(
                "Appetizing overhead food photograph of {name}. \
                 Natural light, plain background, no text."
            ),
        }
    }
}

fn content_type(format: ImageFormat) -> Option<(&'static str, &'static str)> {
    match format {
        ImageFormat::Png => Some(("png", "image/png")),
        ImageFormat::Jpeg => Some(("jpg", "image/jpeg")),
        ImageFormat::WebP => Some(("webp", "image/webp")),
        _ => None,
    }
}

#[async_trait]
impl Transformation for RegenerateImage {
    async fn apply(&self, record: &TargetRecord) -> Result<Patch, TransformError> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| TransformError::Permanent("R2 storage is not configured".into()))?;

        let bytes = self.ai.generate_image(&Self::prompt(record)).await?;
        let (extension, mime) = image::guess_format(&bytes)
            .ok()
            .and_then(content_type)
            .ok_or_else(|| TransformError::Transient("model returned an unrecognized image".into()))?;

        let key = format!("meals/{}.{}", record.key, extension);
        storage.upload(&key, &bytes, mime).await?;

        let mut patch = Patch::new();
        patch.insert("image_key".into(), Value::String(key));
        patch.insert("image_provider".into(), Value::String(self.provider.clone()));
        Ok(patch)
    }
}

struct ImagePreflight {
    ai: Arc<WorkersAiClient>,
    storage_configured: bool,
}

impl Preflight for ImagePreflight {
    fn preflight(&self) -> Result<(), ConfigError> {
        self.ai.preflight()?;
        if !self.storage_configured {
            return Err(ConfigError::Missing("R2_BUCKET"));
        }
        Ok(())
    }
}

pub fn job(
    settings: JobSettings,
    ai: Arc<WorkersAiClient>,
    storage: Option<Arc<R2Client>>,
    provider: &str,
) -> JobDefinition {
    let preflight = ImagePreflight {
        ai: ai.clone(),
        storage_configured: storage.is_some(),
    };
    let transformation = RegenerateImage {
        ai,
        storage,
        provider: provider.to_string(),
    };

    JobDefinition::new(
        NAME,
        COLLECTION,
        settings,
        Arc::new(StaleImage::new(provider)),
        Arc::new(transformation),
    )
    .with_preflight(Arc::new(preflight))
}
