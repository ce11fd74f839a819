//! Test helper utilities for engine scenarios

use async_trait::async_trait;
use batch_enrich::{
    jobs::{JobDefinition, JobSettings},
    models::record::{Patch, TargetRecord},
    services::{
        clock::ManualClock,
        driver::BatchDriver,
        record_store::MemoryRecordStore,
        state_store::MemoryStateStore,
        transformer::{RetryPolicy, TransformError, Transformation},
    },
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const JOB: &str = "enrich-meals";
pub const COLLECTION: &str = "meals";

/// Records enriched fields and counts calls per key; fails every attempt for
/// keys in `failing`.
#[derive(Default)]
pub struct RecordingTransformation {
    calls: Mutex<HashMap<String, usize>>,
    failing: HashSet<String>,
}

impl RecordingTransformation {
    pub fn failing_on(keys: &[&str]) -> Self {
        Self {
            failing: keys.iter().map(|k| k.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn called_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.calls.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Transformation for RecordingTransformation {
    async fn apply(&self, record: &TargetRecord) -> Result<Patch, TransformError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(record.key.clone())
            .or_default() += 1;

        if self.failing.contains(&record.key) {
            return Err(TransformError::Transient("generation service timed out".into()));
        }

        let mut patch = Patch::new();
        patch.insert("enriched".into(), json!(true));
        Ok(patch)
    }
}

/// Eligible until the record carries `enriched: true`.
pub fn needs_enrichment(record: &TargetRecord) -> bool {
    record.get("enriched") != Some(&json!(true))
}

pub fn settings(page_size: usize, batch_quota: usize) -> JobSettings {
    JobSettings {
        page_size,
        batch_quota,
        lock_ttl: Duration::from_secs(30 * 60),
        item_pause: Duration::ZERO,
        retry: RetryPolicy::new(3, Duration::ZERO),
    }
}

pub fn meal(key: &str, fields: Value) -> TargetRecord {
    TargetRecord::new(key, fields.as_object().cloned().unwrap_or_else(Map::new))
}

pub struct Harness {
    pub driver: BatchDriver,
    pub job: JobDefinition,
    pub records: Arc<MemoryRecordStore>,
    pub state: Arc<MemoryStateStore>,
    pub clock: Arc<ManualClock>,
    pub transformation: Arc<RecordingTransformation>,
}

impl Harness {
    pub async fn new(
        records: Vec<TargetRecord>,
        settings: JobSettings,
        transformation: RecordingTransformation,
    ) -> Self {
        let store = Arc::new(MemoryRecordStore::new());
        for record in records {
            store.insert(COLLECTION, record).await;
        }
        let state = Arc::new(MemoryStateStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let transformation = Arc::new(transformation);

        let driver = BatchDriver::new(state.clone(), store.clone(), clock.clone());
        let job = JobDefinition::new(
            JOB,
            COLLECTION,
            settings,
            Arc::new(needs_enrichment),
            transformation.clone(),
        );

        Self {
            driver,
            job,
            records: store,
            state,
            clock,
            transformation,
        }
    }

    /// `count` plain meals keyed `meal-000`, `meal-001`, ...
    pub async fn with_meals(
        count: usize,
        settings: JobSettings,
        transformation: RecordingTransformation,
    ) -> Self {
        let records = (0..count)
            .map(|i| meal(&format!("meal-{i:03}"), json!({"name": format!("Meal {i}")})))
            .collect();
        Self::new(records, settings, transformation).await
    }

    pub async fn record(&self, key: &str) -> TargetRecord {
        use batch_enrich::services::record_store::RecordStore;
        self.records
            .get(COLLECTION, key)
            .await
            .unwrap()
            .expect("record exists")
    }
}
