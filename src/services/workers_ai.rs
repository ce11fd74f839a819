use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::services::transformer::TransformError;

/// Client for Cloudflare Workers AI text and image models.
///
/// Credentials are optional at construction so that jobs which never call
/// the service can run without them; calls fail with `MissingCredential`.
pub struct WorkersAiClient {
    http: Client,
    account_id: Option<String>,
    api_token: Option<String>,
    text_model: String,
    image_model: String,
}

#[derive(Deserialize)]
struct AiEnvelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct TextResult {
    response: String,
}

#[derive(Deserialize)]
struct ImageResult {
    image: String,
}

impl WorkersAiClient {
    pub fn new(
        account_id: Option<String>,
        api_token: Option<String>,
        text_model: String,
        image_model: String,
    ) -> Result<Self, AiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(AiError::Http)?;

        Ok(Self {
            http,
            account_id: account_id.filter(|s| !s.is_empty()),
            api_token: api_token.filter(|s| !s.is_empty()),
            text_model,
            image_model,
        })
    }

    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    /// Fails when the account ID or token is missing.
    pub fn ensure_configured(&self) -> Result<(), AiError> {
        self.credentials().map(|_| ())
    }

    fn credentials(&self) -> Result<(&str, &str), AiError> {
        let account = self
            .account_id
            .as_deref()
            .ok_or(AiError::MissingCredential("CF_ACCOUNT_ID"))?;
        let token = self
            .api_token
            .as_deref()
            .ok_or(AiError::MissingCredential("CF_API_TOKEN"))?;
        Ok((account, token))
    }

    async fn run(&self, model: &str, body: serde_json::Value) -> Result<reqwest::Response, AiError> {
        let (account, token) = self.credentials()?;
        let url = format!("https://api.cloudflare.com/client/v4/accounts/{account}/ai/run/{model}");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(AiError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Status { status, body });
        }
        Ok(response)
    }

    /// Run the text model on a single prompt.
    pub async fn generate_text(&self, prompt: &str, max_tokens: u32) -> Result<String, AiError> {
        let body = serde_json::json!({
            "prompt": prompt,
            "max_tokens": max_tokens,
        });

        let response = self.run(&self.text_model, body).await?;
        let envelope: AiEnvelope<TextResult> = response.json().await.map_err(AiError::Http)?;

        let text = envelope.result.response.trim().to_string();
        if text.is_empty() {
            return Err(AiError::EmptyOutput);
        }
        Ok(text)
    }

    /// Run the image model and return the decoded image bytes.
    pub async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, AiError> {
        let body = serde_json::json!({
            "prompt": prompt,
            "steps": 4,
        });

        let response = self.run(&self.image_model, body).await?;
        let envelope: AiEnvelope<ImageResult> = response.json().await.map_err(AiError::Http)?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(envelope.result.image)
            .map_err(AiError::Decode)?;
        if bytes.is_empty() {
            return Err(AiError::EmptyOutput);
        }
        Ok(bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Workers AI returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Failed to decode generated image: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Model returned no output")]
    EmptyOutput,

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),
}

impl From<AiError> for TransformError {
    fn from(err: AiError) -> Self {
        let retryable = match &err {
            AiError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            AiError::MissingCredential(_) => false,
            AiError::Http(_) | AiError::Decode(_) | AiError::EmptyOutput => true,
        };

        if retryable {
            TransformError::Transient(err.to_string())
        } else {
            TransformError::Permanent(err.to_string())
        }
    }
}
