//! docqueue: serialized document analysis with live progress
//!
//! Uploaded PDFs become tasks in an in-memory FIFO queue that runs at most
//! `max_concurrent_tasks` jobs at once. Each upload is answered with a
//! Server-Sent-Events stream that reports queue position, forwards the job's
//! stage progress, and ends with exactly one `completed` or `error` event.

pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod server;
pub mod types;

pub use config::DocQueueConfig;
pub use error::{Error, Result};
pub use ingestion::{AnalysisRequest, DocumentAnalyzer};
pub use processing::{JobError, JobExecutor, TaskId, TaskQueue, TaskStatus};
pub use server::DocQueueServer;
