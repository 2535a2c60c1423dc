//! Configuration for the document queue service

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocQueueConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Task queue / dispatcher configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Progress stream configuration
    #[serde(default)]
    pub stream: StreamConfig,
    /// Document analysis configuration
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl DocQueueConfig {
    /// Read configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Load from an optional file, apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DOCQUEUE_*` environment variables on top of the loaded values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("DOCQUEUE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("DOCQUEUE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid DOCQUEUE_PORT '{}': {}", port, e)))?;
        }
        if let Ok(n) = std::env::var("DOCQUEUE_MAX_CONCURRENT") {
            self.queue.max_concurrent_tasks = n.parse().map_err(|e| {
                Error::Config(format!("Invalid DOCQUEUE_MAX_CONCURRENT '{}': {}", n, e))
            })?;
        }
        Ok(())
    }

    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_concurrent_tasks == 0 {
            return Err(Error::Config(
                "queue.max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.queue.progress_capacity == 0 {
            return Err(Error::Config(
                "queue.progress_capacity must be at least 1".to_string(),
            ));
        }
        if self.analysis.allowed_extensions.is_empty() {
            return Err(Error::Config(
                "analysis.allowed_extensions must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 50MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            enable_cors: true,
            max_upload_size: 50 * 1024 * 1024, // 50MB
        }
    }
}

/// Task queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Concurrency ceiling (default: 1, strictly serialized)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    /// Dispatcher idle tick in milliseconds (default: 100)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Backoff after a dispatcher-loop error in milliseconds (default: 1000)
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Per-task progress mailbox size (default: 100)
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
    /// How long `stop` waits for the dispatcher in seconds (default: 5)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    /// Terminal tasks older than this are evicted (default: 24h)
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    /// Interval between cleanup sweeps in milliseconds (default: 1h)
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

fn default_max_concurrent() -> usize { 1 }
fn default_tick_ms() -> u64 { 100 }
fn default_error_backoff_ms() -> u64 { 1000 }
fn default_progress_capacity() -> usize { 100 }
fn default_stop_timeout() -> u64 { 5 }
fn default_retention() -> u64 { 24 * 3600 }
fn default_cleanup_interval_ms() -> u64 { 3600 * 1000 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 1,
            tick_ms: 100,
            error_backoff_ms: 1000,
            progress_capacity: 100,
            stop_timeout_secs: 5,
            retention_secs: 24 * 3600,
            cleanup_interval_ms: 3600 * 1000,
        }
    }
}

impl QueueConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// Progress stream polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Poll interval while processing or terminal (default: 100ms)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Poll interval while the task is still pending (default: 1s)
    #[serde(default = "default_pending_interval")]
    pub pending_interval_ms: u64,
    /// Blocking read on the progress mailbox per iteration (default: 500ms)
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

fn default_poll_interval() -> u64 { 100 }
fn default_pending_interval() -> u64 { 1000 }
fn default_drain_timeout() -> u64 { 500 }

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            pending_interval_ms: 1000,
            drain_timeout_ms: 500,
        }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pending_interval(&self) -> Duration {
        Duration::from_millis(self.pending_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Document analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Accepted file extensions, lowercase (default: pdf)
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Timeout for the text extraction stage in seconds (default: 60)
    #[serde(default = "default_extraction_timeout")]
    pub extraction_timeout_secs: u64,
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["pdf".to_string()]
}

fn default_extraction_timeout() -> u64 { 60 }

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
            extraction_timeout_secs: 60,
        }
    }
}

impl AnalysisConfig {
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_serialized_execution() {
        let config = DocQueueConfig::default();
        assert_eq!(config.queue.max_concurrent_tasks, 1);
        assert_eq!(config.queue.progress_capacity, 100);
        assert_eq!(config.stream.pending_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            [queue]
            max_concurrent_tasks = 2

            [server]
            host = "127.0.0.1"
            port = 9000
            enable_cors = false
            max_upload_size = 1024
        "#;
        let config: DocQueueConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.queue.max_concurrent_tasks, 2);
        assert_eq!(config.queue.tick_ms, 100);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.analysis.allowed_extensions, vec!["pdf".to_string()]);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = DocQueueConfig::default();
        config.queue.max_concurrent_tasks = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
