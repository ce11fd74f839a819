//! Job definitions: what each named job scans, which records it picks, and
//! how it transforms them.

use garde::Validate;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, ConfigError};
use crate::services::eligibility::EligibilityFilter;
use crate::services::storage::R2Client;
use crate::services::transformer::{RetryPolicy, Transformation};
use crate::services::workers_ai::WorkersAiClient;

pub mod description;
pub mod image;
pub mod tagging;

/// Engine tunables for one job.
#[derive(Debug, Clone, Validate)]
pub struct JobSettings {
    #[garde(range(min = 1))]
    pub page_size: usize,

    /// Records transformed per step. Scanning wide and processing narrow
    /// amortizes store reads against the slower external calls.
    #[garde(range(min = 1), custom(within_page(self.page_size)))]
    pub batch_quota: usize,

    #[garde(custom(at_least_one_second))]
    pub lock_ttl: Duration,

    #[garde(skip)]
    pub item_pause: Duration,

    #[garde(skip)]
    pub retry: RetryPolicy,
}

fn within_page(page_size: usize) -> impl FnOnce(&usize, &()) -> garde::Result {
    move |quota, _| {
        if *quota <= page_size {
            Ok(())
        } else {
            Err(garde::Error::new(format!(
                "batch quota {quota} exceeds page size {page_size}"
            )))
        }
    }
}

fn at_least_one_second(ttl: &Duration, _: &()) -> garde::Result {
    if *ttl >= Duration::from_secs(1) {
        Ok(())
    } else {
        Err(garde::Error::new("lock TTL must be at least one second"))
    }
}

impl JobSettings {
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|report| ConfigError::Invalid(report.to_string()))
    }

    pub fn lock_ttl_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lock_ttl).unwrap_or(chrono::Duration::MAX)
    }
}

/// External prerequisites a transformation needs before it may touch records.
pub trait Preflight: Send + Sync {
    fn preflight(&self) -> Result<(), ConfigError>;
}

/// A named, independently tracked job.
pub struct JobDefinition {
    pub name: String,
    pub collection: String,
    pub settings: JobSettings,
    pub filter: Arc<dyn EligibilityFilter>,
    pub transformation: Arc<dyn Transformation>,
    pub preflight: Option<Arc<dyn Preflight>>,
}

impl JobDefinition {
    pub fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        settings: JobSettings,
        filter: Arc<dyn EligibilityFilter>,
        transformation: Arc<dyn Transformation>,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            settings,
            filter,
            transformation,
            preflight: None,
        }
    }

    pub fn with_preflight(mut self, preflight: Arc<dyn Preflight>) -> Self {
        self.preflight = Some(preflight);
        self
    }

    /// Settings and credentials check, run before any record is read.
    pub fn ensure_ready(&self) -> Result<(), ConfigError> {
        self.settings.check()?;
        match &self.preflight {
            Some(p) => p.preflight(),
            None => Ok(()),
        }
    }
}

/// Jobs keyed by name.
#[derive(Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<JobDefinition>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: JobDefinition) {
        self.jobs.insert(job.name.clone(), Arc::new(job));
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobDefinition>> {
        self.jobs.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<JobDefinition>> {
        self.jobs.values()
    }

    /// The production jobs, wired to Workers AI and R2.
    pub fn from_config(
        config: &AppConfig,
        ai: Arc<WorkersAiClient>,
        storage: Option<Arc<R2Client>>,
    ) -> Self {
        let settings = config.job_settings();
        let mut registry = Self::new();
        registry.register(description::job(
            settings.clone(),
            ai.clone(),
            &config.description_language,
        ));
        registry.register(image::job(
            settings.clone(),
            ai.clone(),
            storage,
            &config.image_provider,
        ));
        registry.register(tagging::job(settings, ai));
        registry
    }
}

impl Preflight for WorkersAiClient {
    fn preflight(&self) -> Result<(), ConfigError> {
        self.ensure_configured().map_err(|e| match e {
            crate::services::workers_ai::AiError::MissingCredential(name) => {
                ConfigError::Missing(name)
            }
            other => ConfigError::Invalid(other.to_string()),
        })
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> JobSettings {
    JobSettings {
        page_size: 200,
        batch_quota: 10,
        lock_ttl: Duration::from_secs(30 * 60),
        item_pause: Duration::ZERO,
        retry: RetryPolicy::new(3, Duration::ZERO),
    }
}
