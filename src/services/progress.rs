use std::sync::Arc;

use crate::models::job::JobProgress;
use crate::services::clock::Clock;
use crate::services::state_store::{JobStateStore, StoreError};

/// Cumulative counters for the current pass of each job.
pub struct ProgressTracker {
    store: Arc<dyn JobStateStore>,
    clock: Arc<dyn Clock>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn JobStateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn read(&self, job: &str) -> Result<JobProgress, StoreError> {
        Ok(self.store.load_progress(job).await?.unwrap_or_default())
    }

    /// Add one step's counts to the running totals.
    pub async fn record(
        &self,
        job: &str,
        processed: u64,
        updated: u64,
        failed: u64,
    ) -> Result<JobProgress, StoreError> {
        let mut progress = self.read(job).await?;
        progress.total_processed += processed;
        progress.total_updated += updated;
        progress.total_failed += failed;
        progress.last_update = Some(self.clock.now());

        self.store.save_progress(job, &progress).await?;
        Ok(progress)
    }

    /// Zero the counters, at the end of a pass or on explicit reset.
    pub async fn reset(&self, job: &str) -> Result<(), StoreError> {
        let progress = JobProgress {
            last_update: Some(self.clock.now()),
            ..JobProgress::default()
        };
        self.store.save_progress(job, &progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::SystemClock;
    use crate::services::state_store::MemoryStateStore;

    #[tokio::test]
    async fn test_record_accumulates_until_reset() {
        let tracker = ProgressTracker::new(Arc::new(MemoryStateStore::new()), Arc::new(SystemClock));

        tracker.record("job", 10, 8, 2).await.unwrap();
        let progress = tracker.record("job", 5, 5, 0).await.unwrap();
        assert_eq!(progress.total_processed, 15);
        assert_eq!(progress.total_updated, 13);
        assert_eq!(progress.total_failed, 2);
        assert!(progress.last_update.is_some());

        tracker.reset("job").await.unwrap();
        assert_eq!(tracker.read("job").await.unwrap().total_processed, 0);
    }
}
