//! Per-task progress mailbox
//!
//! A bounded, lossy relay from the running job to whoever is streaming the
//! task. Pushes never block: when the mailbox is full the event is dropped
//! and counted. Only the terminal status is guaranteed to be observable, and
//! that lives on the task record, not here.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::types::response::unix_timestamp;

/// Event status vocabulary shared with the stream protocol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    Progress,
    Completed,
    Error,
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Error)
    }
}

/// One progress record pushed by a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: EventStatus,
    pub message: String,
    pub progress: Option<u8>,
    pub timestamp: f64,
    /// Opaque stage details forwarded from the job
    pub data: Option<serde_json::Value>,
}

impl ProgressEvent {
    pub fn progress(message: impl Into<String>, percent: u8) -> Self {
        Self {
            status: EventStatus::Progress,
            message: message.into(),
            progress: Some(percent.min(100)),
            timestamp: unix_timestamp(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Lower bound of the band stage progress is mapped into
const STAGE_BAND_START: u8 = 30;
/// Width of that band, so stages span 30-80%
const STAGE_BAND_WIDTH: u8 = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Starting,
    Completed,
    Error,
}

/// Extra details a job attaches to a stage notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageInfo {
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StageInfo {
    pub fn starting() -> Self {
        Self {
            status: StageStatus::Starting,
            elapsed_time: None,
            message: None,
        }
    }

    pub fn completed(elapsed: Duration) -> Self {
        Self {
            status: StageStatus::Completed,
            elapsed_time: Some(elapsed.as_secs_f64()),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Error,
            elapsed_time: None,
            message: Some(message.into()),
        }
    }
}

/// Map a stage notification onto a progress event.
///
/// `current` is the 0-based stage index. Error notifications produce no
/// event; the failure surfaces through the task status instead.
pub fn stage_event(
    stage: &str,
    current: usize,
    total: usize,
    info: &StageInfo,
) -> Option<ProgressEvent> {
    let total = total.max(1);
    let percent =
        STAGE_BAND_START as usize + current.min(total) * STAGE_BAND_WIDTH as usize / total;
    let message = match info.status {
        StageStatus::Starting => format!("Starting {} ({}/{})", stage, current + 1, total),
        StageStatus::Completed => format!(
            "Completed {} ({:.2}s)",
            stage,
            info.elapsed_time.unwrap_or_default()
        ),
        StageStatus::Error => return None,
    };
    let mut event = ProgressEvent::progress(message, percent as u8);
    if let Ok(data) = serde_json::to_value(info) {
        event = event.with_data(data);
    }
    Some(event)
}

/// Create a mailbox with room for `capacity` undelivered events
pub fn progress_channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicUsize::new(0));
    (
        ProgressSender {
            tx: Some(tx),
            dropped: dropped.clone(),
        },
        ProgressReceiver { rx, dropped },
    )
}

/// Producer side, owned by the executing job
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    dropped: Arc<AtomicUsize>,
}

impl ProgressSender {
    /// A sender with no consumer; every push is discarded
    pub fn disconnected() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Push without blocking. Returns whether the event was queued.
    pub fn send(&self, event: ProgressEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(
                    "Progress mailbox full, dropped '{}' ({} dropped so far)",
                    event.message,
                    total
                );
                false
            }
            // Consumer went away; the job keeps running regardless
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Shorthand for a `progress` event
    pub fn report(&self, message: impl Into<String>, percent: u8) -> bool {
        self.send(ProgressEvent::progress(message, percent))
    }

    /// Stage callback: `(stage_name, current_index, total_stages, info)`
    pub fn stage(&self, stage: &str, current: usize, total: usize, info: &StageInfo) -> bool {
        match stage_event(stage, current, total, info) {
            Some(event) => self.send(event),
            None => false,
        }
    }

    /// Events discarded because the mailbox was full
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Consumer side, owned by the stream adapter
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: mpsc::Receiver<ProgressEvent>,
    dropped: Arc<AtomicUsize>,
}

impl ProgressReceiver {
    /// Wait up to `timeout` for the next event
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<ProgressEvent> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently buffered
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}
