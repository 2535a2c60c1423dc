//! In-memory task queue with a FIFO dispatcher and a hard concurrency ceiling
//!
//! Every task lives in exactly one of four buckets: pending, processing,
//! completed (which also holds cancelled tasks) or failed. A single mutex
//! guards all four and is only ever held for bookkeeping; job bodies run on
//! their own tokio tasks with the lock released.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::error::{Error, Result};

use super::executor::{JobError, JobExecutor};
use super::progress::{progress_channel, ProgressReceiver, ProgressSender};
use super::task::{FailureKind, Task, TaskId, TaskStatus};

/// Floor for the sweep interval so a zero setting cannot spin
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Deferred work attached to a pending task
struct Job<R> {
    request: R,
    progress: ProgressSender,
}

struct PendingEntry<R> {
    task: Task,
    /// Insertion order, breaks `created_at` ties
    seq: u64,
    job: Option<Job<R>>,
}

impl<R> PendingEntry<R> {
    fn order_key(&self) -> (chrono::DateTime<Utc>, u64) {
        (self.task.created_at, self.seq)
    }
}

struct QueueState<R> {
    pending: HashMap<TaskId, PendingEntry<R>>,
    processing: HashMap<TaskId, Task>,
    completed: HashMap<TaskId, Task>,
    failed: HashMap<TaskId, Task>,
    next_seq: u64,
}

impl<R> QueueState<R> {
    fn new() -> Self {
        Self {
            pending: HashMap::new(),
            processing: HashMap::new(),
            completed: HashMap::new(),
            failed: HashMap::new(),
            next_seq: 0,
        }
    }

    fn oldest_pending(&self) -> Option<TaskId> {
        self.pending
            .iter()
            .min_by_key(|(_, entry)| entry.order_key())
            .map(|(id, _)| *id)
    }

    fn lookup(&self, id: &TaskId) -> Option<&Task> {
        self.pending
            .get(id)
            .map(|entry| &entry.task)
            .or_else(|| self.processing.get(id))
            .or_else(|| self.completed.get(id))
            .or_else(|| self.failed.get(id))
    }

    /// Park a task whose record refused a legal-looking transition
    fn quarantine(&mut self, mut task: Task, reason: String) {
        task.status = TaskStatus::Failed;
        task.updated_at = Some(Utc::now());
        task.result = None;
        task.failure_kind = Some(FailureKind::Internal);
        task.error_message = Some(reason);
        self.failed.insert(task.id, task);
    }
}

/// Bucket sizes at one instant
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

struct QueueInner<R> {
    state: Mutex<QueueState<R>>,
    executor: Arc<dyn JobExecutor<Request = R>>,
    config: QueueConfig,
    /// Nudges the dispatcher on submit and on job completion
    wake: Notify,
    running: AtomicBool,
}

/// Handles owned while the dispatcher is running
struct Runtime {
    shutdown: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

/// Task queue serializing jobs behind a concurrency ceiling
pub struct TaskQueue<R: Send + 'static> {
    inner: Arc<QueueInner<R>>,
    runtime: Mutex<Option<Runtime>>,
}

impl<R: Send + 'static> TaskQueue<R> {
    /// Create a stopped queue; call [`TaskQueue::start`] to begin dispatching
    pub fn new(executor: Arc<dyn JobExecutor<Request = R>>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::new()),
                executor,
                config,
                wake: Notify::new(),
                running: AtomicBool::new(false),
            }),
            runtime: Mutex::new(None),
        }
    }

    /// Enqueue a job. Always succeeds; admission happens at dispatch time.
    pub fn submit(&self, request: R) -> TaskId {
        self.enqueue(request, ProgressSender::disconnected())
    }

    /// Enqueue a job and get the consumer end of its progress mailbox
    pub fn submit_with_progress(&self, request: R) -> (TaskId, ProgressReceiver) {
        let (tx, rx) = progress_channel(self.inner.config.progress_capacity);
        (self.enqueue(request, tx), rx)
    }

    fn enqueue(&self, request: R, progress: ProgressSender) -> TaskId {
        let id = TaskId::new();
        {
            let mut state = self.inner.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.insert(
                id,
                PendingEntry {
                    task: Task::new(id),
                    seq,
                    job: Some(Job { request, progress }),
                },
            );
        }
        tracing::info!("Task {} submitted to queue", id);
        self.inner.wake.notify_one();
        id
    }

    /// Snapshot of a task from whichever bucket holds it
    pub fn get_status(&self, id: &TaskId) -> Option<Task> {
        self.inner.state.lock().lookup(id).cloned()
    }

    /// 1-based rank among pending tasks, `None` once the task left pending
    pub fn get_queue_position(&self, id: &TaskId) -> Option<usize> {
        let state = self.inner.state.lock();
        let key = state.pending.get(id)?.order_key();
        let ahead = state
            .pending
            .values()
            .filter(|entry| entry.order_key() < key)
            .count();
        Some(ahead + 1)
    }

    /// Pull a pending task before it runs. False for anything not pending.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let mut state = self.inner.state.lock();
        let Some(entry) = state.pending.remove(id) else {
            return false;
        };
        let mut task = entry.task;
        match task.mark_cancelled() {
            Ok(()) => {
                state.completed.insert(*id, task);
            }
            Err(e) => {
                tracing::error!("Cancel of task {} hit a bad record: {}", id, e);
                state.quarantine(task, e.to_string());
            }
        }
        drop(state);
        tracing::info!("Task {} cancelled", id);
        true
    }

    /// Evict completed/failed tasks whose last transition is at least `max_age` old
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let removed = self.inner.evict_older_than(max_age);
        if removed > 0 {
            tracing::info!("Cleaned up {} old tasks", removed);
        }
        removed
    }

    pub fn get_queue_status(&self) -> QueueCounts {
        let state = self.inner.state.lock();
        QueueCounts {
            pending: state.pending.len(),
            processing: state.processing.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.config.max_concurrent_tasks
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Spawn the dispatcher and the cleanup sweeper on the current tokio
    /// runtime. Returns false if already running.
    pub fn start(&self) -> bool {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        self.inner.running.store(true, Ordering::SeqCst);

        let dispatcher = tokio::spawn(run_dispatcher(self.inner.clone(), shutdown_rx.clone()));
        let sweeper = tokio::spawn(run_sweeper(self.inner.clone(), shutdown_rx));

        *runtime = Some(Runtime {
            shutdown,
            dispatcher,
            sweeper,
        });

        tracing::info!(
            "Task queue started (max {} concurrent)",
            self.inner.config.max_concurrent_tasks
        );
        true
    }

    /// Signal the dispatcher to exit and wait for it, bounded by the
    /// configured stop timeout. Jobs already processing run to completion.
    pub async fn stop(&self) {
        let Some(mut runtime) = self.runtime.lock().take() else {
            return;
        };

        self.inner.running.store(false, Ordering::SeqCst);
        let _ = runtime.shutdown.send(true);
        runtime.sweeper.abort();

        let stop_timeout = self.inner.config.stop_timeout();
        if tokio::time::timeout(stop_timeout, &mut runtime.dispatcher)
            .await
            .is_err()
        {
            tracing::warn!(
                "Dispatcher did not exit within {}s, aborting",
                stop_timeout.as_secs()
            );
            runtime.dispatcher.abort();
        }

        tracing::info!("Task queue stopped");
    }
}

impl<R: Send + 'static> Drop for TaskQueue<R> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            let _ = runtime.shutdown.send(true);
            runtime.sweeper.abort();
        }
    }
}

impl<R: Send + 'static> QueueInner<R> {
    fn evict_older_than(&self, max_age: Duration) -> usize {
        let age = chrono::Duration::from_std(max_age)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };

        let mut state = self.state.lock();
        let before = state.completed.len() + state.failed.len();
        state.completed.retain(|_, task| task.last_touched() > cutoff);
        state.failed.retain(|_, task| task.last_touched() > cutoff);
        before - (state.completed.len() + state.failed.len())
    }

    /// Promote the oldest pending task if there is capacity
    fn dispatch_next(&self) -> Result<Option<(TaskId, Job<R>)>> {
        let mut state = self.state.lock();
        if state.processing.len() >= self.config.max_concurrent_tasks {
            return Ok(None);
        }
        let Some(id) = state.oldest_pending() else {
            return Ok(None);
        };
        let Some(mut entry) = state.pending.remove(&id) else {
            return Ok(None);
        };

        let Some(job) = entry.job.take() else {
            state.quarantine(entry.task, "Task had no job payload".to_string());
            return Err(Error::Internal(format!("pending task {} had no job payload", id)));
        };

        if let Err(e) = entry.task.mark_processing() {
            let reason = e.to_string();
            state.quarantine(entry.task, reason);
            return Err(e);
        }

        state.processing.insert(id, entry.task);
        Ok(Some((id, job)))
    }

    /// Move a task out of processing once its job returned
    fn finish(&self, id: TaskId, outcome: std::result::Result<serde_json::Value, JobError>) {
        let mut state = self.state.lock();
        let Some(mut task) = state.processing.remove(&id) else {
            tracing::error!("Task {} finished but was no longer processing", id);
            return;
        };

        match outcome {
            Ok(result) => match task.mark_completed(result) {
                Ok(()) => {
                    state.completed.insert(id, task);
                    drop(state);
                    tracing::info!("Task {} completed successfully", id);
                }
                Err(e) => state.quarantine(task, e.to_string()),
            },
            Err(err) => {
                let message = err.message.clone();
                match task.mark_failed(err.kind, err.message) {
                    Ok(()) => {
                        state.failed.insert(id, task);
                        drop(state);
                        tracing::error!("Task {} failed: {}", id, message);
                    }
                    Err(e) => state.quarantine(task, e.to_string()),
                }
            }
        }
    }
}

/// Run one job on its own tokio task so a panic stays inside that task
fn spawn_execution<R: Send + 'static>(inner: Arc<QueueInner<R>>, id: TaskId, job: Job<R>) {
    tokio::spawn(async move {
        tracing::info!("Starting task {}", id);
        let executor = inner.executor.clone();
        let handle =
            tokio::spawn(async move { executor.execute(job.request, job.progress).await });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "job panicked".to_string());
                Err(JobError::internal(message))
            }
            Err(join_error) => Err(JobError::internal(join_error.to_string())),
        };

        inner.finish(id, outcome);
        inner.wake.notify_one();
    });
}

async fn run_dispatcher<R: Send + 'static>(
    inner: Arc<QueueInner<R>>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Task queue dispatcher started");
    let tick = inner.config.tick();
    let backoff = inner.config.error_backoff();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let wait = match inner.dispatch_next() {
            Ok(Some((id, job))) => {
                spawn_execution(inner.clone(), id, job);
                // More capacity may remain
                continue;
            }
            Ok(None) => tick,
            Err(e) => {
                tracing::error!("Dispatcher loop error: {}", e);
                backoff
            }
        };

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    tracing::info!("Task queue dispatcher exited");
}

async fn run_sweeper<R: Send + 'static>(
    inner: Arc<QueueInner<R>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = inner.config.cleanup_interval().max(MIN_SWEEP_INTERVAL);
    let retention = inner.config.retention();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {
                let removed = inner.evict_older_than(retention);
                if removed > 0 {
                    tracing::info!("Periodic sweep evicted {} tasks", removed);
                }
            }
        }
    }
}
