use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tokio::sync::RwLock;

use crate::db::queries;
use crate::models::record::{Patch, TargetRecord};
use crate::services::state_store::StoreError;

/// Capability to read and patch the records a job enriches.
///
/// Pages are ordered by key ascending and start strictly after `after_key`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_page(
        &self,
        collection: &str,
        after_key: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<TargetRecord>, StoreError>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<TargetRecord>, StoreError>;

    async fn patch(&self, collection: &str, key: &str, fields: &Patch) -> Result<(), StoreError>;
}

/// Postgres `documents` table.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get_page(
        &self,
        collection: &str,
        after_key: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<TargetRecord>, StoreError> {
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        Ok(queries::get_page(&self.pool, collection, after_key, limit).await?)
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<TargetRecord>, StoreError> {
        Ok(queries::get_document(&self.pool, collection, key).await?)
    }

    async fn patch(&self, collection: &str, key: &str, fields: &Patch) -> Result<(), StoreError> {
        if queries::patch_document(&self.pool, collection, key, fields).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            })
        }
    }
}

/// In-memory record store with the same ordering as the Postgres one.
#[derive(Default)]
pub struct MemoryRecordStore {
    collections: RwLock<HashMap<String, BTreeMap<String, TargetRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, collection: &str, record: TargetRecord) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(record.key.clone(), record);
    }

    pub async fn all(&self, collection: &str) -> Vec<TargetRecord> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_page(
        &self,
        collection: &str,
        after_key: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<TargetRecord>, StoreError> {
        let collections = self.collections.read().await;
        let Some(records) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let lower = match after_key {
            Some(k) => Bound::Excluded(k.to_string()),
            None => Bound::Unbounded,
        };
        Ok(records
            .range((lower, Bound::Unbounded))
            .take(page_size)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<TargetRecord>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    async fn patch(&self, collection: &str, key: &str, fields: &Patch) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        match collections.get_mut(collection).and_then(|c| c.get_mut(key)) {
            Some(record) => {
                record.apply(fields);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            }),
        }
    }
}
