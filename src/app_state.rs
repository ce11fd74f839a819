use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::jobs::JobRegistry;
use crate::services::{
    clock::SystemClock,
    driver::{BatchDriver, BatchEngine},
    record_store::PgRecordStore,
    state_store::RedisStateStore,
    storage::R2Client,
    workers_ai::WorkersAiClient,
};

/// Shared state for the admin server and the scheduler worker.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub job_state: Arc<RedisStateStore>,
    pub engine: Arc<BatchEngine>,
}

impl AppState {
    pub fn new(db: PgPool, job_state: RedisStateStore, registry: JobRegistry) -> Self {
        let job_state = Arc::new(job_state);
        let driver = BatchDriver::new(
            job_state.clone(),
            Arc::new(PgRecordStore::new(db.clone())),
            Arc::new(SystemClock),
        );

        Self {
            db,
            job_state,
            engine: Arc::new(BatchEngine::new(driver, registry)),
        }
    }

    /// Wire the production jobs from configuration. Missing external
    /// credentials are tolerated here and reported when a job first runs.
    pub fn from_config(config: &AppConfig, db: PgPool) -> Result<Self, InitError> {
        let job_state = RedisStateStore::new(&config.redis_url)?;

        let ai = WorkersAiClient::new(
            config.cf_account_id.clone(),
            config.cf_api_token.clone(),
            config.text_model.clone(),
            config.image_model.clone(),
        )?;

        let storage = match config.r2_settings() {
            Some(settings) => Some(Arc::new(R2Client::new(&settings)?)),
            None => {
                tracing::warn!("R2 storage not configured; image regeneration will refuse to run");
                None
            }
        };

        let registry = JobRegistry::from_config(config, Arc::new(ai), storage);
        Ok(Self::new(db, job_state, registry))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Store(#[from] crate::services::state_store::StoreError),

    #[error(transparent)]
    Ai(#[from] crate::services::workers_ai::AiError),

    #[error(transparent)]
    Storage(#[from] crate::services::storage::StorageError),
}
