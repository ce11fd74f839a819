use serde::Deserialize;
use std::time::Duration;

use crate::jobs::JobSettings;
use crate::services::transformer::RetryPolicy;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Admin server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string (record store)
    pub database_url: String,

    /// Redis connection string (job lock, cursor and progress)
    pub redis_url: String,

    /// Cloudflare account ID. Checked when a job first needs Workers AI.
    pub cf_account_id: Option<String>,

    /// Cloudflare Workers AI API token
    pub cf_api_token: Option<String>,

    /// R2 bucket for regenerated images
    pub r2_bucket: Option<String>,
    pub r2_access_key: Option<String>,
    pub r2_secret_key: Option<String>,
    pub r2_endpoint: Option<String>,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Provenance tag written on regenerated images; records carrying a
    /// different tag are regenerated.
    #[serde(default = "default_image_provider")]
    pub image_provider: String,

    /// Target language for localized meal descriptions
    #[serde(default = "default_description_language")]
    pub description_language: String,

    /// Records read per scan
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Records transformed per step; keep small enough to finish inside
    /// the scheduler's time box.
    #[serde(default = "default_batch_quota")]
    pub batch_quota: usize,

    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Pause between external calls within a step
    #[serde(default = "default_item_pause_ms")]
    pub item_pause_ms: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Worker tick interval
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,
}

/// Complete set of R2 credentials.
#[derive(Debug, Clone)]
pub struct R2Settings {
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_text_model() -> String {
    "@cf/meta/llama-3.1-8b-instruct".to_string()
}

fn default_image_model() -> String {
    "@cf/black-forest-labs/flux-1-schnell".to_string()
}

fn default_image_provider() -> String {
    "workers-ai-flux".to_string()
}

fn default_description_language() -> String {
    "es".to_string()
}

fn default_page_size() -> usize {
    200
}

fn default_batch_quota() -> usize {
    10
}

fn default_lock_ttl_secs() -> u64 {
    30 * 60
}

fn default_item_pause_ms() -> u64 {
    1000
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_scheduler_interval_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// Engine settings shared by every registered job.
    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            page_size: self.page_size,
            batch_quota: self.batch_quota,
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            item_pause: Duration::from_millis(self.item_pause_ms),
            retry: RetryPolicy::new(
                self.retry_attempts,
                Duration::from_millis(self.retry_base_delay_ms),
            ),
        }
    }

    pub fn r2_settings(&self) -> Option<R2Settings> {
        Some(R2Settings {
            bucket: self.r2_bucket.clone()?,
            endpoint: self.r2_endpoint.clone()?,
            access_key: self.r2_access_key.clone()?,
            secret_key: self.r2_secret_key.clone()?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid job settings: {0}")]
    Invalid(String),
}
