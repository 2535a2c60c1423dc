//! Wire types for the stream protocol and the polling endpoints

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::processing::{EventStatus, ProgressEvent, QueueCounts, Task, TaskId};

/// Seconds since the Unix epoch, with sub-second precision
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// One record of the progress stream
///
/// Sent as an SSE frame, `data: <json>\n\n`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub status: EventStatus,
    pub message: String,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Percent complete (0-100)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl StreamEvent {
    pub fn new(status: EventStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            timestamp: unix_timestamp(),
            data: None,
            progress: None,
        }
    }

    pub fn started(message: impl Into<String>) -> Self {
        Self::new(EventStatus::Started, message)
    }

    pub fn progress(message: impl Into<String>, percent: u8) -> Self {
        Self::new(EventStatus::Progress, message).with_progress(percent)
    }

    pub fn completed(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(EventStatus::Completed, message)
            .with_data(data)
            .with_progress(100)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventStatus::Error, message)
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_progress(mut self, percent: u8) -> Self {
        self.progress = Some(percent.min(100));
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// JSON body of the SSE frame
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"status":"error","message":"unencodable event: {}","timestamp":{}}}"#,
                e, self.timestamp
            )
        })
    }
}

impl From<ProgressEvent> for StreamEvent {
    fn from(event: ProgressEvent) -> Self {
        Self {
            status: event.status,
            message: event.message,
            timestamp: event.timestamp,
            data: event.data,
            progress: event.progress,
        }
    }
}

/// GET /queue/task/:id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    pub status: String,
    pub progress: u8,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub queue_position: Option<usize>,
    pub error_message: Option<String>,
}

impl TaskStatusResponse {
    pub fn from_task(task: &Task, queue_position: Option<usize>) -> Self {
        Self {
            task_id: task.id,
            status: task.status.as_str().to_string(),
            progress: task.progress,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.map(|t| t.to_rfc3339()),
            queue_position,
            error_message: task.error_message.clone().filter(|m| !m.is_empty()),
        }
    }
}

/// GET /queue/status
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatusResponse {
    pub queue_status: QueueCounts,
    pub timestamp: f64,
}

/// DELETE /queue/task/:id
#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub message: String,
}

/// GET /health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub system_info: serde_json::Value,
    pub services: HashMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_skips_absent_fields() {
        let frame = StreamEvent::started("Analysis started").to_json();
        assert!(frame.starts_with('{'));
        assert!(frame.contains(r#""status":"started""#));
        assert!(!frame.contains("progress"));
        assert!(!frame.contains("data\":"));
    }

    #[test]
    fn test_completed_event_carries_payload() {
        let event = StreamEvent::completed("done", serde_json::json!({"pages": []}));
        assert!(event.is_terminal());
        assert_eq!(event.progress, Some(100));

        let parsed: serde_json::Value =
            serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(parsed["status"], "completed");
        assert_eq!(parsed["data"]["pages"], serde_json::json!([]));
    }

    #[test]
    fn test_progress_event_conversion() {
        let event: StreamEvent = ProgressEvent::progress("halfway", 50).into();
        assert_eq!(event.status, EventStatus::Progress);
        assert_eq!(event.progress, Some(50));
        assert!(!event.is_terminal());
    }
}
