//! Task records and lifecycle transitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque task identifier, generated at submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::TaskNotFound(s.to_string()))
    }
}

/// Task lifecycle status
///
/// ```text
/// Pending ──▶ Processing ──▶ Completed | Failed
///    │
///    └──────▶ Cancelled
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a failure came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The job ran and reported a domain failure (bad document, extraction error)
    Extraction,
    /// Infrastructure failure: panics, timeouts, lost payloads
    Internal,
}

/// Point-in-time copy of a task, handed out by lookups
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    /// Percent, 0-100
    pub progress: u8,
    /// Present only when completed
    pub result: Option<serde_json::Value>,
    /// Present only when failed
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
}

impl Task {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            updated_at: None,
            status: TaskStatus::Pending,
            progress: 0,
            result: None,
            error_message: None,
            failure_kind: None,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "illegal transition for task {}: {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn mark_processing(&mut self) -> Result<()> {
        self.transition(TaskStatus::Processing)
    }

    pub(crate) fn mark_completed(&mut self, result: serde_json::Value) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.progress = 100;
        self.result = Some(result);
        Ok(())
    }

    pub(crate) fn mark_failed(&mut self, kind: FailureKind, message: String) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.failure_kind = Some(kind);
        self.error_message = Some(message);
        Ok(())
    }

    pub(crate) fn mark_cancelled(&mut self) -> Result<()> {
        self.transition(TaskStatus::Cancelled)
    }

    /// Time of the last transition, falling back to creation
    pub fn last_touched(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}
