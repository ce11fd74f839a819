use std::sync::Arc;

use crate::models::job::JobCursor;
use crate::services::state_store::{JobStateStore, StoreError};

/// Pagination position per job.
pub struct CursorStore {
    store: Arc<dyn JobStateStore>,
}

impl CursorStore {
    pub fn new(store: Arc<dyn JobStateStore>) -> Self {
        Self { store }
    }

    /// Stored cursor, or the start of the collection if none was written yet.
    pub async fn read(&self, job: &str) -> Result<JobCursor, StoreError> {
        Ok(self.store.load_cursor(job).await?.unwrap_or_default())
    }

    pub async fn advance(
        &self,
        job: &str,
        last_key: Option<String>,
        finished: bool,
    ) -> Result<(), StoreError> {
        let cursor = JobCursor { last_key, finished };
        self.store.save_cursor(job, &cursor).await
    }

    /// Restart the scan from the beginning of the collection.
    pub async fn reset(&self, job: &str) -> Result<(), StoreError> {
        self.store.save_cursor(job, &JobCursor::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::state_store::MemoryStateStore;

    #[tokio::test]
    async fn test_read_defaults_then_advance_and_reset() {
        let cursors = CursorStore::new(Arc::new(MemoryStateStore::new()));
        assert_eq!(cursors.read("job").await.unwrap(), JobCursor::default());

        cursors
            .advance("job", Some("meal-0042".into()), false)
            .await
            .unwrap();
        let cursor = cursors.read("job").await.unwrap();
        assert_eq!(cursor.last_key.as_deref(), Some("meal-0042"));
        assert!(!cursor.finished);

        cursors.reset("job").await.unwrap();
        assert_eq!(cursors.read("job").await.unwrap(), JobCursor::default());
    }
}
