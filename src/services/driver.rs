//! Batch driver: runs a job either one bounded step at a time (scheduled
//! triggers) or to the end of the collection (administrative drain).
//!
//! A step reads the job cursor, scans one page, narrows it to eligible
//! records, transforms up to the batch quota, writes patches or failure
//! markers, advances the cursor and records progress. When a scan reaches
//! the end of the collection the cursor rewinds so the next step begins a
//! fresh pass.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::config::ConfigError;
use crate::jobs::{JobDefinition, JobRegistry};
use crate::models::job::{DrainSummary, JobStatusReport, StepSummary};
use crate::models::record::FailureMarker;
use crate::services::clock::Clock;
use crate::services::cursor::CursorStore;
use crate::services::eligibility;
use crate::services::lock::LockManager;
use crate::services::progress::ProgressTracker;
use crate::services::record_store::RecordStore;
use crate::services::scanner::CollectionScanner;
use crate::services::state_store::{JobStateStore, StoreError};
use crate::services::transformer::ItemTransformer;

pub struct BatchDriver {
    locks: LockManager,
    cursors: CursorStore,
    progress: ProgressTracker,
    scanner: CollectionScanner,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl BatchDriver {
    pub fn new(
        state: Arc<dyn JobStateStore>,
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            locks: LockManager::new(state.clone(), clock.clone()),
            cursors: CursorStore::new(state.clone()),
            progress: ProgressTracker::new(state, clock.clone()),
            scanner: CollectionScanner::new(records.clone()),
            records,
            clock,
        }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Process at most one page. Never takes the lock; exits with no work if
    /// a drain currently holds it.
    pub async fn run_single_step(&self, job: &JobDefinition) -> Result<StepSummary, EngineError> {
        job.ensure_ready()?;
        let name = job.name.as_str();

        if self.locks.is_active(name, job.settings.lock_ttl_delta()).await? {
            metrics::counter!("batch_lockouts_total", "job" => name.to_string()).increment(1);
            tracing::info!(job = name, "Job locked by another run, skipping step");
            return Ok(StepSummary::locked_out());
        }

        let transformer = ItemTransformer::new(job.transformation.clone(), job.settings.retry.clone());
        let mut pacer = CallPacer::new(job.settings.item_pause);
        let summary = self.step(job, &transformer, &mut pacer).await?;

        tracing::info!(
            job = name,
            processed = summary.processed,
            updated = summary.updated,
            failed = summary.failed,
            has_more = summary.has_more,
            "Step complete"
        );
        Ok(summary)
    }

    /// Run steps until the collection is exhausted, holding the job lock for
    /// the whole run. The lock is released on every exit path, including a
    /// panic inside a step and the drain future being dropped mid-run.
    /// Only this run's own lock is released; a lock taken over after this
    /// one went stale stays in place.
    pub async fn run_drain(&self, job: &JobDefinition) -> Result<DrainSummary, EngineError> {
        job.ensure_ready()?;
        let name = job.name.as_str();

        let Some(lock) = self.locks.try_acquire(name, job.settings.lock_ttl_delta()).await? else {
            metrics::counter!("batch_lockouts_total", "job" => name.to_string()).increment(1);
            return Err(EngineError::LockHeld {
                job: name.to_string(),
            });
        };
        let mut guard = DrainLockGuard {
            locks: self.locks.clone(),
            job: name.to_string(),
            owner_token: lock.owner_token.clone(),
            armed: true,
        };

        tracing::info!(job = name, "Drain started");
        let outcome = AssertUnwindSafe(self.drain_steps(job)).catch_unwind().await;
        let released = self.locks.release_if_owner(name, &lock.owner_token).await;
        guard.disarm();

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                if let Err(e) = &released {
                    tracing::error!(job = name, error = %e, "Failed to release lock after panic");
                }
                std::panic::resume_unwind(panic);
            }
        };

        match (&result, released) {
            (Ok(summary), Ok(_)) => {
                tracing::info!(
                    job = name,
                    processed_total = summary.processed_total,
                    updated_total = summary.updated_total,
                    failed_total = summary.failed_total,
                    steps = summary.steps,
                    "Drain complete"
                );
            }
            (Ok(_), Err(e)) => return Err(e.into()),
            (Err(e), Ok(_)) => tracing::error!(job = name, error = %e, "Drain aborted"),
            (Err(e), Err(release_err)) => tracing::error!(
                job = name,
                error = %e,
                release_error = %release_err,
                "Drain aborted and lock release failed"
            ),
        }
        result
    }

    async fn drain_steps(&self, job: &JobDefinition) -> Result<DrainSummary, EngineError> {
        let transformer = ItemTransformer::new(job.transformation.clone(), job.settings.retry.clone());
        let mut pacer = CallPacer::new(job.settings.item_pause);
        let mut total = DrainSummary::default();

        loop {
            let step = self.step(job, &transformer, &mut pacer).await?;
            total.steps += 1;
            total.processed_total += step.processed;
            total.updated_total += step.updated;
            total.failed_total += step.failed;

            tracing::debug!(
                job = %job.name,
                step = total.steps,
                processed = step.processed,
                "Drain step complete"
            );
            if !step.has_more {
                return Ok(total);
            }
        }
    }

    async fn step(
        &self,
        job: &JobDefinition,
        transformer: &ItemTransformer,
        pacer: &mut CallPacer,
    ) -> Result<StepSummary, EngineError> {
        let started = Instant::now();
        let name = job.name.as_str();
        let settings = &job.settings;

        let cursor = self.cursors.read(name).await?;
        let page = self
            .scanner
            .next_page(&job.collection, &cursor, settings.page_size)
            .await?;

        if page.is_empty() {
            self.complete_pass(name, &StepSummary::default()).await?;
            return Ok(StepSummary::default());
        }

        let selection = eligibility::select(&page.records, job.filter.as_ref(), settings.batch_quota);
        let marker = FailureMarker::for_job(name);
        let mut summary = StepSummary::default();

        for record in selection.chosen.iter() {
            pacer.wait().await;
            summary.processed += 1;

            match transformer.transform(record).await {
                Ok(mut patch) => {
                    marker.clear_into(record, &mut patch);
                    self.records.patch(&job.collection, &record.key, &patch).await?;
                    summary.updated += 1;
                }
                Err(failure) => {
                    tracing::warn!(
                        job = name,
                        key = %record.key,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Transformation failed, marking record"
                    );
                    let patch = marker.failure_patch(record, &failure.error.to_string(), self.clock.now());
                    self.records.patch(&job.collection, &record.key, &patch).await?;
                    summary.failed += 1;
                }
            }
        }

        // Past the quota, stop at the last processed record so the rest of
        // the page is scanned again by the next step.
        let (next_key, finished) = match selection.chosen.last() {
            Some(last) if selection.truncated => (Some(last.key.clone()), false),
            _ => (page.last_key().map(str::to_string), page.reached_end()),
        };

        // Cursor first: a failed progress write undercounts, it never
        // replays the page.
        if finished {
            self.complete_pass(name, &summary).await?;
        } else {
            self.cursors.advance(name, next_key, false).await?;
            self.progress
                .record(name, summary.processed, summary.updated, summary.failed)
                .await?;
        }
        summary.has_more = !finished;

        metrics::counter!("batch_items_processed_total", "job" => name.to_string())
            .increment(summary.processed);
        metrics::counter!("batch_items_updated_total", "job" => name.to_string())
            .increment(summary.updated);
        metrics::counter!("batch_items_failed_total", "job" => name.to_string())
            .increment(summary.failed);
        metrics::histogram!("batch_step_seconds", "job" => name.to_string())
            .record(started.elapsed().as_secs_f64());

        Ok(summary)
    }

    /// End of collection: rewind the cursor and start a new pass. `last` is
    /// the final step of the pass, not yet folded into stored progress.
    async fn complete_pass(&self, job: &str, last: &StepSummary) -> Result<(), StoreError> {
        let totals = self.progress.read(job).await?;
        self.cursors.advance(job, None, true).await?;
        self.progress.reset(job).await?;

        tracing::info!(
            job,
            total_processed = totals.total_processed + last.processed,
            total_updated = totals.total_updated + last.updated,
            total_failed = totals.total_failed + last.failed,
            "Pass complete, cursor rewound"
        );
        Ok(())
    }

    pub async fn status(&self, job: &JobDefinition) -> Result<JobStatusReport, EngineError> {
        let name = job.name.as_str();
        let is_locked = self.locks.is_active(name, job.settings.lock_ttl_delta()).await?;
        let cursor = self.cursors.read(name).await?;
        let progress = self.progress.read(name).await?;

        Ok(JobStatusReport {
            job: name.to_string(),
            is_locked,
            cursor_finished: cursor.finished,
            last_key: cursor.last_key,
            progress,
        })
    }

    /// Restart the job from the beginning of its collection.
    pub async fn reset(&self, job: &JobDefinition) -> Result<(), EngineError> {
        self.cursors.reset(&job.name).await?;
        self.progress.reset(&job.name).await?;
        tracing::info!(job = %job.name, "Job reset");
        Ok(())
    }
}

/// Spaces external calls by the job's item pause for the length of a run,
/// including across step boundaries of a drain.
struct CallPacer {
    pause: Duration,
    called: bool,
}

impl CallPacer {
    fn new(pause: Duration) -> Self {
        Self {
            pause,
            called: false,
        }
    }

    async fn wait(&mut self) {
        if self.called && !self.pause.is_zero() {
            sleep(self.pause).await;
        }
        self.called = true;
    }
}

/// Releases a drain's lock when the drain future is dropped before reaching
/// its own release, e.g. a disconnected admin request or a caller timeout.
struct DrainLockGuard {
    locks: LockManager,
    job: String,
    owner_token: String,
    armed: bool,
}

impl DrainLockGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DrainLockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(job = %self.job, "No runtime to release abandoned drain lock");
            return;
        };

        tracing::warn!(job = %self.job, "Drain cancelled, releasing lock");
        let locks = self.locks.clone();
        let job = std::mem::take(&mut self.job);
        let owner_token = std::mem::take(&mut self.owner_token);
        handle.spawn(async move {
            if let Err(e) = locks.release_if_owner(&job, &owner_token).await {
                tracing::error!(job = %job, error = %e, "Failed to release abandoned drain lock");
            }
        });
    }
}

/// Name-addressed entry point used by the triggers.
pub struct BatchEngine {
    driver: BatchDriver,
    registry: JobRegistry,
}

impl BatchEngine {
    pub fn new(driver: BatchDriver, registry: JobRegistry) -> Self {
        Self { driver, registry }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    fn job(&self, name: &str) -> Result<Arc<JobDefinition>, EngineError> {
        self.registry
            .get(name)
            .ok_or_else(|| EngineError::UnknownJob(name.to_string()))
    }

    pub async fn run_single_step(&self, name: &str) -> Result<StepSummary, EngineError> {
        self.driver.run_single_step(&*self.job(name)?).await
    }

    pub async fn run_drain(&self, name: &str) -> Result<DrainSummary, EngineError> {
        self.driver.run_drain(&*self.job(name)?).await
    }

    pub async fn status(&self, name: &str) -> Result<JobStatusReport, EngineError> {
        self.driver.status(&*self.job(name)?).await
    }

    pub async fn reset(&self, name: &str) -> Result<(), EngineError> {
        self.driver.reset(&*self.job(name)?).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job '{job}' is locked by another run")]
    LockHeld { job: String },

    #[error("Unknown job: {0}")]
    UnknownJob(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_settings;
    use crate::models::record::{Patch, TargetRecord};
    use crate::services::clock::SystemClock;
    use crate::services::record_store::MemoryRecordStore;
    use crate::models::job::{JobCursor, JobLock, JobProgress};
    use crate::services::state_store::MemoryStateStore;
    use crate::services::transformer::{Transformation, TransformError};
    use async_trait::async_trait;
    use serde_json::{json, Map};

    struct MarkDone;

    #[async_trait]
    impl Transformation for MarkDone {
        async fn apply(&self, _record: &TargetRecord) -> Result<Patch, TransformError> {
            let mut patch = Patch::new();
            patch.insert("done".into(), json!(true));
            Ok(patch)
        }
    }

    struct Explodes;

    #[async_trait]
    impl Transformation for Explodes {
        async fn apply(&self, _record: &TargetRecord) -> Result<Patch, TransformError> {
            panic!("transformation bug");
        }
    }

    struct Slow;

    #[async_trait]
    impl Transformation for Slow {
        async fn apply(&self, _record: &TargetRecord) -> Result<Patch, TransformError> {
            sleep(Duration::from_millis(500)).await;
            Ok(Patch::new())
        }
    }

    /// State store whose cursor writes always fail.
    struct CursorWritesFail(MemoryStateStore);

    #[async_trait]
    impl JobStateStore for CursorWritesFail {
        async fn load_lock(&self, job: &str) -> Result<Option<JobLock>, StoreError> {
            self.0.load_lock(job).await
        }
        async fn save_lock(&self, job: &str, lock: &JobLock) -> Result<(), StoreError> {
            self.0.save_lock(job, lock).await
        }
        async fn delete_lock(&self, job: &str) -> Result<(), StoreError> {
            self.0.delete_lock(job).await
        }
        async fn load_cursor(&self, job: &str) -> Result<Option<JobCursor>, StoreError> {
            self.0.load_cursor(job).await
        }
        async fn save_cursor(&self, job: &str, _cursor: &JobCursor) -> Result<(), StoreError> {
            Err(StoreError::NotFound {
                collection: "job_state".to_string(),
                key: job.to_string(),
            })
        }
        async fn load_progress(&self, job: &str) -> Result<Option<JobProgress>, StoreError> {
            self.0.load_progress(job).await
        }
        async fn save_progress(&self, job: &str, progress: &JobProgress) -> Result<(), StoreError> {
            self.0.save_progress(job, progress).await
        }
    }

    fn not_done(r: &TargetRecord) -> bool {
        r.get("done").is_none()
    }

    async fn setup(
        keys: usize,
        transformation: Arc<dyn Transformation>,
    ) -> (BatchDriver, JobDefinition, Arc<MemoryRecordStore>) {
        let records = Arc::new(MemoryRecordStore::new());
        for i in 0..keys {
            records
                .insert("meals", TargetRecord::new(format!("m{i:03}"), Map::new()))
                .await;
        }
        let driver = BatchDriver::new(
            Arc::new(MemoryStateStore::new()),
            records.clone(),
            Arc::new(SystemClock),
        );
        let job = JobDefinition::new("test-job", "meals", test_settings(), Arc::new(not_done), transformation);
        (driver, job, records)
    }

    #[tokio::test]
    async fn test_quota_stops_cursor_at_last_processed() {
        let (driver, mut job, _) = setup(5, Arc::new(MarkDone)).await;
        job.settings.page_size = 5;
        job.settings.batch_quota = 2;

        let step = driver.run_single_step(&job).await.unwrap();
        assert_eq!(step.processed, 2);
        assert!(step.has_more);
        let status = driver.status(&job).await.unwrap();
        assert_eq!(status.last_key.as_deref(), Some("m001"));

        driver.run_single_step(&job).await.unwrap();
        let last = driver.run_single_step(&job).await.unwrap();
        assert_eq!(last.processed, 1);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn test_empty_collection_finishes() {
        let (driver, job, _) = setup(0, Arc::new(MarkDone)).await;
        let step = driver.run_single_step(&job).await.unwrap();
        assert_eq!(step, StepSummary::default());

        let status = driver.status(&job).await.unwrap();
        assert!(status.cursor_finished);
        assert!(status.last_key.is_none());
    }

    #[tokio::test]
    async fn test_drain_refuses_when_locked() {
        let (driver, job, _) = setup(3, Arc::new(MarkDone)).await;
        assert!(driver
            .locks()
            .acquire("test-job", job.settings.lock_ttl_delta())
            .await
            .unwrap());

        let err = driver.run_drain(&job).await.unwrap_err();
        assert!(matches!(err, EngineError::LockHeld { .. }));
    }

    #[tokio::test]
    async fn test_invalid_settings_fail_before_scan() {
        let (driver, mut job, _) = setup(3, Arc::new(MarkDone)).await;
        job.settings.batch_quota = 0;

        let err = driver.run_single_step(&job).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        let status = driver.status(&job).await.unwrap();
        assert!(status.last_key.is_none() && !status.cursor_finished);
    }

    #[tokio::test]
    async fn test_drain_releases_lock_on_panic() {
        let (driver, job, _) = setup(2, Arc::new(Explodes)).await;

        let outcome = AssertUnwindSafe(driver.run_drain(&job)).catch_unwind().await;
        assert!(outcome.is_err());
        assert!(!driver.status(&job).await.unwrap().is_locked);
    }

    #[tokio::test]
    async fn test_engine_unknown_job() {
        let (driver, _, _) = setup(0, Arc::new(MarkDone)).await;
        let engine = BatchEngine::new(driver, JobRegistry::new());
        let err = engine.run_single_step("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownJob(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_item_pause_spans_drain_steps() {
        let (driver, mut job, _) = setup(4, Arc::new(MarkDone)).await;
        job.settings.page_size = 1;
        job.settings.batch_quota = 1;
        job.settings.item_pause = Duration::from_millis(40);

        let started = Instant::now();
        let summary = driver.run_drain(&job).await.unwrap();

        assert_eq!(summary.processed_total, 4);
        assert!(summary.steps >= 4);
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_cancelled_drain_releases_lock() {
        let (driver, job, _) = setup(2, Arc::new(Slow)).await;

        let outcome = tokio::time::timeout(Duration::from_millis(100), driver.run_drain(&job)).await;
        assert!(outcome.is_err());

        // release runs on a spawned task
        sleep(Duration::from_millis(20)).await;
        assert!(!driver.status(&job).await.unwrap().is_locked);
        assert!(driver
            .locks()
            .acquire("test-job", job.settings.lock_ttl_delta())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failed_cursor_write_records_no_progress() {
        let records = Arc::new(MemoryRecordStore::new());
        for i in 0..3 {
            records
                .insert("meals", TargetRecord::new(format!("m{i:03}"), Map::new()))
                .await;
        }
        let driver = BatchDriver::new(
            Arc::new(CursorWritesFail(MemoryStateStore::new())),
            records,
            Arc::new(SystemClock),
        );
        let mut job = JobDefinition::new(
            "test-job",
            "meals",
            test_settings(),
            Arc::new(not_done),
            Arc::new(MarkDone),
        );
        job.settings.batch_quota = 2;

        let err = driver.run_single_step(&job).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
        assert_eq!(driver.status(&job).await.unwrap().progress.total_processed, 0);
    }
}
