//! Application state for the HTTP server

use std::sync::Arc;

use crate::config::DocQueueConfig;
use crate::ingestion::AnalysisRequest;
use crate::processing::TaskQueue;

/// Queue of document-analysis jobs served over HTTP
pub type AnalysisQueue = TaskQueue<AnalysisRequest>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: DocQueueConfig,
    queue: Arc<AnalysisQueue>,
}

impl AppState {
    /// Wrap an already constructed queue; the caller owns its lifecycle
    pub fn new(config: DocQueueConfig, queue: Arc<AnalysisQueue>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, queue }),
        }
    }

    pub fn config(&self) -> &DocQueueConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> &Arc<AnalysisQueue> {
        &self.inner.queue
    }

    /// Ready once the dispatcher is running
    pub fn is_ready(&self) -> bool {
        self.inner.queue.is_running()
    }
}
