use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pagination position of a named job.
///
/// An absent cursor reads as the default: start of collection, not finished.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCursor {
    pub last_key: Option<String>,
    pub finished: bool,
}

/// Advisory mutual-exclusion flag for a named job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobLock {
    pub locked: bool,
    pub acquired_at: DateTime<Utc>,
    pub owner_token: String,
}

/// Cumulative counters for the current pass of a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    pub total_processed: u64,
    pub total_updated: u64,
    pub total_failed: u64,
    pub last_update: Option<DateTime<Utc>>,
}

/// Result of one single-step invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepSummary {
    pub processed: u64,
    pub updated: u64,
    pub failed: u64,
    pub has_more: bool,
    /// Set when an active lock made this step exit without doing any work.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub locked_out: bool,
}

impl StepSummary {
    pub fn locked_out() -> Self {
        Self {
            has_more: true,
            locked_out: true,
            ..Self::default()
        }
    }
}

/// Result of a drain run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrainSummary {
    pub processed_total: u64,
    pub updated_total: u64,
    pub failed_total: u64,
    pub steps: u64,
}

/// Point-in-time view of a job's persisted state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStatusReport {
    pub job: String,
    pub is_locked: bool,
    pub cursor_finished: bool,
    pub last_key: Option<String>,
    pub progress: JobProgress,
}
