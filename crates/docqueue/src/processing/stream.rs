//! Task observation as a stream of protocol events
//!
//! Mirrors a task's lifecycle to a client: an acknowledgment, queue-position
//! updates while pending, forwarded job progress while processing, and
//! exactly one terminal event.

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StreamConfig;
use crate::types::response::StreamEvent;

use super::progress::{EventStatus, ProgressReceiver};
use super::task::{FailureKind, TaskId, TaskStatus};
use super::task_queue::TaskQueue;

enum Phase {
    /// Acknowledgment not yet sent
    Start,
    Polling,
    Done,
}

/// Observer for a single submitted task
pub struct AnalysisStream<R: Send + 'static> {
    queue: Option<Arc<TaskQueue<R>>>,
    task_id: Option<TaskId>,
    progress: Option<ProgressReceiver>,
    filename: String,
    config: StreamConfig,
    rejection: Option<String>,
    phase: Phase,
    buffered: VecDeque<StreamEvent>,
    delay: Option<Duration>,
    announced_processing: bool,
}

impl<R: Send + 'static> AnalysisStream<R> {
    pub fn new(
        queue: Arc<TaskQueue<R>>,
        task_id: TaskId,
        progress: ProgressReceiver,
        filename: impl Into<String>,
        config: StreamConfig,
    ) -> Self {
        Self {
            queue: Some(queue),
            task_id: Some(task_id),
            progress: Some(progress),
            filename: filename.into(),
            config,
            rejection: None,
            phase: Phase::Start,
            buffered: VecDeque::new(),
            delay: None,
            announced_processing: false,
        }
    }

    /// A stream for an upload that failed validation and was never queued
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            queue: None,
            task_id: None,
            progress: None,
            filename: String::new(),
            config: StreamConfig::default(),
            rejection: Some(message.into()),
            phase: Phase::Start,
            buffered: VecDeque::new(),
            delay: None,
            announced_processing: false,
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, StreamEvent> {
        stream::unfold(self, |mut adapter| async move {
            adapter.next_event().await.map(|event| (event, adapter))
        })
        .boxed()
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.buffered.pop_front() {
                return Some(event);
            }
            match self.phase {
                Phase::Done => return None,
                Phase::Start => self.acknowledge(),
                Phase::Polling => {
                    if let Some(delay) = self.delay.take() {
                        tokio::time::sleep(delay).await;
                    }
                    self.poll().await;
                }
            }
        }
    }

    fn acknowledge(&mut self) {
        self.buffered.push_back(StreamEvent::started("Analysis started"));
        match self.rejection.take() {
            Some(message) => self.finish(StreamEvent::error(message)),
            None => {
                self.buffered
                    .push_back(StreamEvent::progress("File validation completed", 10));
                self.phase = Phase::Polling;
            }
        }
    }

    async fn poll(&mut self) {
        let (Some(queue), Some(task_id)) = (self.queue.clone(), self.task_id) else {
            self.finish(StreamEvent::error("Task not found"));
            return;
        };
        let Some(task) = queue.get_status(&task_id) else {
            self.finish(StreamEvent::error("Task not found"));
            return;
        };

        match task.status {
            TaskStatus::Pending => {
                let event = match queue.get_queue_position(&task_id) {
                    Some(position) if position > 1 => StreamEvent::progress(
                        format!(
                            "Waiting for available resources... (Position in queue: {})",
                            position
                        ),
                        15,
                    ),
                    _ => StreamEvent::progress("Preparing for processing...", 18),
                };
                self.buffered.push_back(event);
                self.delay = Some(self.config.pending_interval());
            }
            TaskStatus::Processing => {
                if !self.announced_processing {
                    self.announced_processing = true;
                    self.buffered.push_back(StreamEvent::progress(
                        format!("Processing PDF: {}", self.filename),
                        20,
                    ));
                    return;
                }
                let forwarded = match self.progress.as_mut() {
                    Some(rx) => rx.recv_timeout(self.config.drain_timeout()).await,
                    None => None,
                };
                match forwarded {
                    Some(event) => self.forward(event.into()),
                    // Idle or the job already hung up; avoid spinning
                    None => self.delay = Some(self.config.poll_interval()),
                }
            }
            TaskStatus::Completed => {
                if let Some(rx) = self.progress.as_mut() {
                    let leftovers = rx.drain();
                    for event in leftovers {
                        self.forward(event.into());
                    }
                }
                let result = task.result.unwrap_or(serde_json::Value::Null);
                let message = match result
                    .pointer("/metadata/processing_time")
                    .and_then(|v| v.as_f64())
                {
                    Some(seconds) => format!("Analysis completed in {:.2} seconds", seconds),
                    None => "Analysis completed".to_string(),
                };
                self.finish(StreamEvent::completed(message, result));
            }
            TaskStatus::Failed => {
                let cause = task.error_message.unwrap_or_default();
                let message = match task.failure_kind {
                    Some(FailureKind::Extraction) => {
                        format!("Document extraction failed: {}", cause)
                    }
                    _ => format!("Internal server error: {}", cause),
                };
                self.finish(StreamEvent::error(message));
            }
            TaskStatus::Cancelled => {
                self.finish(StreamEvent::error("Processing was cancelled"));
            }
        }
    }

    /// Relay a job event; only the adapter may end the stream
    fn forward(&mut self, mut event: StreamEvent) {
        if event.is_terminal() || event.status == EventStatus::Started {
            event.status = EventStatus::Progress;
        }
        self.buffered.push_back(event);
    }

    fn finish(&mut self, terminal: StreamEvent) {
        if let Some(task_id) = self.task_id {
            tracing::debug!("Stream for task {} ending: {}", task_id, terminal.message);
        }
        self.buffered.push_back(terminal);
        self.phase = Phase::Done;
        self.progress = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::processing::executor::{JobError, JobExecutor};
    use crate::processing::progress::{ProgressEvent, ProgressSender};
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    struct ScriptedJob {
        steps: Vec<&'static str>,
        failure: Option<JobError>,
        payload: serde_json::Value,
        gate: Option<Arc<Semaphore>>,
        delay_ms: u64,
    }

    impl ScriptedJob {
        fn ok(payload: serde_json::Value) -> Self {
            Self {
                steps: Vec::new(),
                failure: None,
                payload,
                gate: None,
                delay_ms: 0,
            }
        }
    }

    struct ScriptedExecutor;

    #[async_trait]
    impl JobExecutor for ScriptedExecutor {
        type Request = ScriptedJob;

        async fn execute(
            &self,
            job: ScriptedJob,
            progress: ProgressSender,
        ) -> Result<serde_json::Value, JobError> {
            if let Some(gate) = &job.gate {
                let _permit = gate.acquire().await;
            }
            for (i, step) in job.steps.iter().enumerate() {
                progress.report(*step, 30 + i as u8);
            }
            tokio::time::sleep(Duration::from_millis(job.delay_ms)).await;
            match job.failure {
                Some(err) => Err(err),
                None => Ok(job.payload),
            }
        }
    }

    fn fast_stream_config() -> StreamConfig {
        StreamConfig {
            poll_interval_ms: 5,
            pending_interval_ms: 20,
            drain_timeout_ms: 20,
        }
    }

    fn make_queue() -> Arc<TaskQueue<ScriptedJob>> {
        Arc::new(TaskQueue::new(
            Arc::new(ScriptedExecutor),
            QueueConfig {
                tick_ms: 5,
                ..QueueConfig::default()
            },
        ))
    }

    async fn collect(
        queue: &Arc<TaskQueue<ScriptedJob>>,
        job: ScriptedJob,
        filename: &str,
    ) -> Vec<StreamEvent> {
        let (id, rx) = queue.submit_with_progress(job);
        let stream = AnalysisStream::new(queue.clone(), id, rx, filename, fast_stream_config());
        tokio::time::timeout(Duration::from_secs(5), stream.into_stream().collect())
            .await
            .expect("stream did not terminate")
    }

    fn assert_single_terminal(events: &[StreamEvent]) {
        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_completed_flow() {
        let queue = make_queue();
        queue.start();

        let payload = serde_json::json!({ "metadata": { "processing_time": 1.234 } });
        let events = collect(
            &queue,
            ScriptedJob {
                steps: vec!["step a", "step b"],
                delay_ms: 100,
                ..ScriptedJob::ok(payload.clone())
            },
            "paper.pdf",
        )
        .await;

        assert_eq!(events[0].status, EventStatus::Started);
        assert_eq!(events[0].message, "Analysis started");
        assert_eq!(events[1].message, "File validation completed");
        assert_eq!(events[1].progress, Some(10));
        assert!(events
            .iter()
            .any(|e| e.message == "Processing PDF: paper.pdf" && e.progress == Some(20)));

        let forwarded: Vec<_> = events
            .iter()
            .filter(|e| e.message.starts_with("step"))
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(forwarded, vec!["step a", "step b"]);

        let last = events.last().unwrap();
        assert_eq!(last.status, EventStatus::Completed);
        assert_eq!(last.message, "Analysis completed in 1.23 seconds");
        assert_eq!(last.progress, Some(100));
        assert_eq!(last.data.as_ref(), Some(&payload));
        assert_single_terminal(&events);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_completed_without_timing() {
        let queue = make_queue();
        queue.start();
        let events = collect(&queue, ScriptedJob::ok(serde_json::json!({})), "a.pdf").await;
        assert_eq!(events.last().unwrap().message, "Analysis completed");
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_failure_messages_follow_kind() {
        let queue = make_queue();
        queue.start();

        let events = collect(
            &queue,
            ScriptedJob {
                failure: Some(JobError::extraction("bad xref")),
                ..ScriptedJob::ok(serde_json::Value::Null)
            },
            "a.pdf",
        )
        .await;
        let last = events.last().unwrap();
        assert_eq!(last.status, EventStatus::Error);
        assert_eq!(last.message, "Document extraction failed: bad xref");
        assert_single_terminal(&events);

        let events = collect(
            &queue,
            ScriptedJob {
                failure: Some(JobError::internal("disk full")),
                ..ScriptedJob::ok(serde_json::Value::Null)
            },
            "a.pdf",
        )
        .await;
        assert_eq!(
            events.last().unwrap().message,
            "Internal server error: disk full"
        );
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_pending_reports_position_then_cancel() {
        let queue = make_queue();
        let _head = queue.submit(ScriptedJob::ok(serde_json::Value::Null));
        let (id, rx) = queue.submit_with_progress(ScriptedJob::ok(serde_json::Value::Null));

        let mut stream =
            AnalysisStream::new(queue.clone(), id, rx, "b.pdf", fast_stream_config()).into_stream();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(stream.next().await.unwrap());
        }
        assert_eq!(
            seen[2].message,
            "Waiting for available resources... (Position in queue: 2)"
        );
        assert_eq!(seen[2].progress, Some(15));

        assert!(queue.cancel(&id));
        let rest: Vec<_> = tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
            .await
            .unwrap();
        let last = rest.last().unwrap();
        assert_eq!(last.status, EventStatus::Error);
        assert_eq!(last.message, "Processing was cancelled");
        assert_eq!(rest.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_head_of_line_is_preparing() {
        let queue = make_queue();
        let (id, rx) = queue.submit_with_progress(ScriptedJob::ok(serde_json::Value::Null));
        let mut stream =
            AnalysisStream::new(queue.clone(), id, rx, "a.pdf", fast_stream_config()).into_stream();
        stream.next().await;
        stream.next().await;
        let third = stream.next().await.unwrap();
        assert_eq!(third.message, "Preparing for processing...");
        assert_eq!(third.progress, Some(18));
    }

    #[tokio::test]
    async fn test_unknown_task_ends_with_not_found() {
        let queue = make_queue();
        let (_, rx) = crate::processing::progress_channel(4);
        let events: Vec<_> =
            AnalysisStream::new(queue, TaskId::new(), rx, "a.pdf", fast_stream_config())
                .into_stream()
                .collect()
                .await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].message, "Task not found");
        assert_eq!(events[2].status, EventStatus::Error);
    }

    #[tokio::test]
    async fn test_rejected_upload() {
        let events: Vec<_> = AnalysisStream::<ScriptedJob>::rejected("No file selected")
            .into_stream()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, EventStatus::Started);
        assert_eq!(events[1].status, EventStatus::Error);
        assert_eq!(events[1].message, "No file selected");
    }

    #[tokio::test]
    async fn test_job_cannot_end_the_stream_early() {
        struct RogueExecutor;

        #[async_trait]
        impl JobExecutor for RogueExecutor {
            type Request = ();

            async fn execute(
                &self,
                _: (),
                progress: ProgressSender,
            ) -> Result<serde_json::Value, JobError> {
                let mut fake = ProgressEvent::progress("fake finish", 100);
                fake.status = EventStatus::Completed;
                progress.send(fake);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(serde_json::json!({}))
            }
        }

        let queue: Arc<TaskQueue<()>> =
            Arc::new(TaskQueue::new(Arc::new(RogueExecutor), QueueConfig::default()));
        queue.start();
        let (id, rx) = queue.submit_with_progress(());
        let events: Vec<_> = tokio::time::timeout(
            Duration::from_secs(5),
            AnalysisStream::new(queue.clone(), id, rx, "a.pdf", fast_stream_config())
                .into_stream()
                .collect(),
        )
        .await
        .unwrap();

        let fake = events.iter().find(|e| e.message == "fake finish").unwrap();
        assert_eq!(fake.status, EventStatus::Progress);
        assert_single_terminal(&events);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_gated_job_reports_processing_once() {
        let queue = make_queue();
        queue.start();
        let gate = Arc::new(Semaphore::new(0));
        let (id, rx) = queue.submit_with_progress(ScriptedJob {
            gate: Some(gate.clone()),
            ..ScriptedJob::ok(serde_json::json!({}))
        });
        let stream = AnalysisStream::new(queue.clone(), id, rx, "c.pdf", fast_stream_config());

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            gate.add_permits(1);
        });
        let events: Vec<_> =
            tokio::time::timeout(Duration::from_secs(5), stream.into_stream().collect())
                .await
                .unwrap();
        release.await.unwrap();

        let announcements = events
            .iter()
            .filter(|e| e.message.starts_with("Processing PDF"))
            .count();
        assert_eq!(announcements, 1);
        assert_eq!(events.last().unwrap().status, EventStatus::Completed);
        queue.stop().await;
    }
}
