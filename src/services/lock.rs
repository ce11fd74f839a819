//! Advisory per-job lock with a staleness timeout.
//!
//! Acquisition is read-then-write, so two processes checking at the same
//! instant can both succeed. Deployments run one scheduler per job, which
//! keeps this to the case it guards against: a scheduled step firing while
//! an administrative drain holds the lock. A store-native create-if-absent
//! write would make acquisition atomic.

use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::JobLock;
use crate::services::clock::Clock;
use crate::services::state_store::{JobStateStore, StoreError};

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn JobStateStore>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(store: Arc<dyn JobStateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Take the lock unless an active one exists. A stale lock is cleared and
    /// replaced.
    pub async fn acquire(&self, job: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self.try_acquire(job, ttl).await?.is_some())
    }

    /// Like [`acquire`](Self::acquire), returning the written lock so the
    /// holder can later release it by owner token.
    pub async fn try_acquire(&self, job: &str, ttl: Duration) -> Result<Option<JobLock>, StoreError> {
        if self.is_active(job, ttl).await? {
            tracing::info!(job, "Lock held by another run");
            return Ok(None);
        }

        let lock = JobLock {
            locked: true,
            acquired_at: self.clock.now(),
            owner_token: Uuid::new_v4().to_string(),
        };
        self.store.save_lock(job, &lock).await?;

        tracing::info!(job, owner = %lock.owner_token, "Lock acquired");
        Ok(Some(lock))
    }

    /// Remove the lock. Releasing an absent lock is not an error.
    pub async fn release(&self, job: &str) -> Result<(), StoreError> {
        self.store.delete_lock(job).await?;
        tracing::info!(job, "Lock released");
        Ok(())
    }

    /// Remove the lock only if `owner_token` still holds it. Returns false
    /// when the lock is absent or was taken over after going stale.
    pub async fn release_if_owner(&self, job: &str, owner_token: &str) -> Result<bool, StoreError> {
        match self.store.load_lock(job).await? {
            Some(lock) if lock.owner_token == owner_token => {
                self.store.delete_lock(job).await?;
                tracing::info!(job, owner = owner_token, "Lock released");
                Ok(true)
            }
            Some(lock) => {
                tracing::warn!(
                    job,
                    owner = owner_token,
                    holder = %lock.owner_token,
                    "Lock taken over by another run, leaving it in place"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// True only for a held lock younger than `ttl`. A stale lock is
    /// force-released as a side effect.
    pub async fn is_active(&self, job: &str, ttl: Duration) -> Result<bool, StoreError> {
        let Some(lock) = self.store.load_lock(job).await? else {
            return Ok(false);
        };

        let age = self.clock.now() - lock.acquired_at;
        if lock.locked && age < ttl {
            return Ok(true);
        }

        tracing::warn!(
            job,
            owner = %lock.owner_token,
            age_secs = age.num_seconds(),
            ttl_secs = ttl.num_seconds(),
            "Stale lock found, force-releasing"
        );
        self.store.delete_lock(job).await?;
        Ok(false)
    }
}
