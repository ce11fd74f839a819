use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::models::record::{Patch, TargetRecord};

/// The external transformation a job applies to one record.
///
/// Implementations call out to generation services; they are not assumed
/// idempotent with respect to those calls. The patch they return must be.
#[async_trait]
pub trait Transformation: Send + Sync {
    async fn apply(&self, record: &TargetRecord) -> Result<Patch, TransformError>;
}

/// Whether an error should be retried or treated as final for this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// External call failed or timed out; worth another attempt.
    #[error("transient: {0}")]
    Transient(String),

    /// The record cannot be transformed as it stands; retrying now won't help.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl TransformError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            TransformError::Transient(_) => RetryDisposition::Retry,
            TransformError::Permanent(_) => RetryDisposition::Stop,
        }
    }
}

/// Terminal failure after the retry policy gave up.
#[derive(Debug)]
pub struct TransformFailure {
    pub error: TransformError,
    pub attempts: usize,
}

/// Attempt count and exponential backoff for item transformations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    /// Three attempts, waiting 2s then 4s between them.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the given zero-based failed attempt: base, 2x base, 4x base...
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// Applies a transformation with bounded retry.
pub struct ItemTransformer {
    transformation: Arc<dyn Transformation>,
    policy: RetryPolicy,
}

impl ItemTransformer {
    pub fn new(transformation: Arc<dyn Transformation>, policy: RetryPolicy) -> Self {
        Self {
            transformation,
            policy,
        }
    }

    pub async fn transform(&self, record: &TargetRecord) -> Result<Patch, TransformFailure> {
        let mut attempt = 0;

        loop {
            match self.transformation.apply(record).await {
                Ok(patch) => return Ok(patch),
                Err(error) => {
                    let attempts = attempt + 1;
                    if error.disposition() == RetryDisposition::Stop
                        || attempts >= self.policy.max_attempts
                    {
                        return Err(TransformFailure { error, attempts });
                    }

                    let delay = self.policy.backoff_delay(attempt);
                    tracing::warn!(
                        key = %record.key,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transformation failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
