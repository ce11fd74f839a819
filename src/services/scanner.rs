use std::sync::Arc;

use crate::models::job::JobCursor;
use crate::models::record::TargetRecord;
use crate::services::record_store::RecordStore;
use crate::services::state_store::StoreError;

/// One ordered page read from a collection.
#[derive(Debug, Clone)]
pub struct ScannedPage {
    pub records: Vec<TargetRecord>,
    pub requested: usize,
}

impl ScannedPage {
    /// Nothing after the cursor: the scan reached the end on this call.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A short page is the last page of the collection.
    pub fn reached_end(&self) -> bool {
        self.records.len() < self.requested
    }

    pub fn last_key(&self) -> Option<&str> {
        self.records.last().map(|r| r.key.as_str())
    }
}

/// Reads pages of candidates starting after a persisted cursor.
///
/// Holds no iterator state: every call derives its page from the cursor it
/// is given, so a scan resumes across invocations.
pub struct CollectionScanner {
    records: Arc<dyn RecordStore>,
}

impl CollectionScanner {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    pub async fn next_page(
        &self,
        collection: &str,
        cursor: &JobCursor,
        page_size: usize,
    ) -> Result<ScannedPage, StoreError> {
        // A finished cursor means the previous pass completed; start over.
        let after = if cursor.finished {
            None
        } else {
            cursor.last_key.as_deref()
        };

        let records = self.records.get_page(collection, after, page_size).await?;
        tracing::debug!(
            collection,
            after = after.unwrap_or("<start>"),
            fetched = records.len(),
            "Scanned page"
        );

        Ok(ScannedPage {
            records,
            requested: page_size,
        })
    }
}
