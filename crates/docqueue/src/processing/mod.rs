//! Background processing: task queue, dispatcher and progress relay

mod executor;
mod progress;
mod stream;
mod task;
mod task_queue;

pub use executor::{JobError, JobExecutor};
pub use progress::{
    progress_channel, stage_event, EventStatus, ProgressEvent, ProgressReceiver, ProgressSender,
    StageInfo, StageStatus,
};
pub use stream::AnalysisStream;
pub use task::{FailureKind, Task, TaskId, TaskStatus};
pub use task_queue::{QueueCounts, TaskQueue};
