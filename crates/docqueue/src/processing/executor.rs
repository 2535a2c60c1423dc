//! The job capability the queue runs

use async_trait::async_trait;
use thiserror::Error;

use super::progress::ProgressSender;
use super::task::FailureKind;

/// Failure reported by a job. Displays as the bare message so it reaches
/// the task record verbatim.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    /// Job-logic failure (bad input document, extraction error)
    pub fn extraction(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Extraction,
            message: message.into(),
        }
    }

    /// Infrastructure failure
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Internal,
            message: message.into(),
        }
    }
}

impl From<crate::error::Error> for JobError {
    fn from(err: crate::error::Error) -> Self {
        JobError::internal(err.to_string())
    }
}

/// Runs one kind of request. The queue is agnostic to what the request
/// means; it only sees success with a JSON payload or a `JobError`.
///
/// Execution may take minutes and may block; implementations should move
/// CPU-heavy or blocking work onto `spawn_blocking`.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    type Request: Send + 'static;

    async fn execute(
        &self,
        request: Self::Request,
        progress: ProgressSender,
    ) -> Result<serde_json::Value, JobError>;
}
