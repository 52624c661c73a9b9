//! Per-step deadline guard for the conversion pipeline.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// A guarded step did not finish before its deadline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TimeoutError {
    message: String,
    limit: Duration,
}

impl TimeoutError {
    pub fn new(message: impl Into<String>, limit: Duration) -> Self {
        Self {
            message: message.into(),
            limit,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

/// Race `operation` against a `limit` deadline.
///
/// If the deadline wins, the operation future is dropped and the call fails
/// with a [`TimeoutError`] carrying `message`. Work the operation already
/// handed off elsewhere (a worker thread, for instance) is not interrupted;
/// its result is simply discarded.
pub async fn with_timeout<F, T, E>(operation: F, limit: Duration, message: &str) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::debug!(limit_ms = limit.as_millis() as u64, "{}", message);
            Err(TimeoutError::new(message, limit).into())
        }
    }
}
