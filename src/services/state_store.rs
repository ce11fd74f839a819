use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::job::{JobCursor, JobLock, JobProgress};

const KEY_PREFIX: &str = "batch_enrich";

/// Persistence for the three per-job singletons.
///
/// Lock, cursor and progress live under separate keys so that writing one
/// never overwrites the others.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    async fn load_lock(&self, job: &str) -> Result<Option<JobLock>, StoreError>;
    async fn save_lock(&self, job: &str, lock: &JobLock) -> Result<(), StoreError>;
    async fn delete_lock(&self, job: &str) -> Result<(), StoreError>;

    async fn load_cursor(&self, job: &str) -> Result<Option<JobCursor>, StoreError>;
    async fn save_cursor(&self, job: &str, cursor: &JobCursor) -> Result<(), StoreError>;

    async fn load_progress(&self, job: &str) -> Result<Option<JobProgress>, StoreError>;
    async fn save_progress(&self, job: &str, progress: &JobProgress) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Lock,
    Cursor,
    Progress,
}

impl Slot {
    fn key(self, job: &str) -> String {
        let suffix = match self {
            Slot::Lock => "lock",
            Slot::Cursor => "cursor",
            Slot::Progress => "progress",
        };
        format!("{KEY_PREFIX}:{job}:{suffix}")
    }
}

/// Redis-backed job state, one JSON string per key.
pub struct RedisStateStore {
    client: redis::Client,
}

impl RedisStateStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        Ok(Self { client })
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn load<T: DeserializeOwned>(&self, key: String) -> Result<Option<T>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(&key).await?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    async fn save<T: Serialize + Sync>(&self, key: String, value: &T) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(value)?;
        conn.set::<_, _, ()>(&key, payload).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStateStore for RedisStateStore {
    async fn load_lock(&self, job: &str) -> Result<Option<JobLock>, StoreError> {
        self.load(Slot::Lock.key(job)).await
    }

    async fn save_lock(&self, job: &str, lock: &JobLock) -> Result<(), StoreError> {
        self.save(Slot::Lock.key(job), lock).await
    }

    async fn delete_lock(&self, job: &str) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(Slot::Lock.key(job)).await?;
        Ok(())
    }

    async fn load_cursor(&self, job: &str) -> Result<Option<JobCursor>, StoreError> {
        self.load(Slot::Cursor.key(job)).await
    }

    async fn save_cursor(&self, job: &str, cursor: &JobCursor) -> Result<(), StoreError> {
        self.save(Slot::Cursor.key(job), cursor).await
    }

    async fn load_progress(&self, job: &str) -> Result<Option<JobProgress>, StoreError> {
        self.load(Slot::Progress.key(job)).await
    }

    async fn save_progress(&self, job: &str, progress: &JobProgress) -> Result<(), StoreError> {
        self.save(Slot::Progress.key(job), progress).await
    }
}

/// In-process job state. Values round-trip through JSON like the Redis
/// store so both behave the same way.
#[derive(Default)]
pub struct MemoryStateStore {
    slots: RwLock<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn load<T: DeserializeOwned>(&self, key: String) -> Result<Option<T>, StoreError> {
        let slots = self.slots.read().await;
        match slots.get(&key) {
            Some(p) => Ok(Some(serde_json::from_str(p)?)),
            None => Ok(None),
        }
    }

    async fn save<T: Serialize + Sync>(&self, key: String, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value)?;
        self.slots.write().await.insert(key, payload);
        Ok(())
    }
}

#[async_trait]
impl JobStateStore for MemoryStateStore {
    async fn load_lock(&self, job: &str) -> Result<Option<JobLock>, StoreError> {
        self.load(Slot::Lock.key(job)).await
    }

    async fn save_lock(&self, job: &str, lock: &JobLock) -> Result<(), StoreError> {
        self.save(Slot::Lock.key(job), lock).await
    }

    async fn delete_lock(&self, job: &str) -> Result<(), StoreError> {
        self.slots.write().await.remove(&Slot::Lock.key(job));
        Ok(())
    }

    async fn load_cursor(&self, job: &str) -> Result<Option<JobCursor>, StoreError> {
        self.load(Slot::Cursor.key(job)).await
    }

    async fn save_cursor(&self, job: &str, cursor: &JobCursor) -> Result<(), StoreError> {
        self.save(Slot::Cursor.key(job), cursor).await
    }

    async fn load_progress(&self, job: &str) -> Result<Option<JobProgress>, StoreError> {
        self.load(Slot::Progress.key(job)).await
    }

    async fn save_progress(&self, job: &str, progress: &JobProgress) -> Result<(), StoreError> {
        self.save(Slot::Progress.key(job), progress).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Record not found: {collection}/{key}")]
    NotFound { collection: String, key: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced_per_job() {
        assert_eq!(Slot::Lock.key("image-regeneration"), "batch_enrich:image-regeneration:lock");
        assert_ne!(Slot::Cursor.key("a"), Slot::Cursor.key("b"));
    }

    #[tokio::test]
    async fn test_memory_store_slots_are_independent() {
        let store = MemoryStateStore::new();
        let cursor = JobCursor {
            last_key: Some("k-10".to_string()),
            finished: false,
        };
        store.save_cursor("job", &cursor).await.unwrap();
        store
            .save_progress("job", &JobProgress::default())
            .await
            .unwrap();
        store.delete_lock("job").await.unwrap();

        assert_eq!(store.load_cursor("job").await.unwrap(), Some(cursor));
        assert!(store.load_lock("job").await.unwrap().is_none());
        assert!(store.load_cursor("other").await.unwrap().is_none());
    }
}
