//! HTTP server for the document queue

pub mod routes;
pub mod state;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::DocQueueConfig;
use crate::error::{Error, Result};
use crate::types::response::HealthResponse;
use state::{AnalysisQueue, AppState};

/// Document queue HTTP server
pub struct DocQueueServer {
    config: DocQueueConfig,
    state: AppState,
}

impl DocQueueServer {
    /// Serve an injected queue. The server stops the queue on shutdown but
    /// does not start it.
    pub fn new(config: DocQueueConfig, queue: Arc<AnalysisQueue>) -> Self {
        let state = AppState::new(config.clone(), queue);
        Self { config, state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness))
            .merge(routes::api_routes(self.config.server.max_upload_size))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.server.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router.layer(cors)
        } else {
            router
        }
    }

    /// Serve until Ctrl+C, then stop the queue's dispatcher
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();

        tracing::info!("Starting document queue server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        tracing::info!("Server stopped, shutting down task queue");
        self.state.queue().stop().await;
        Ok(())
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue = state.queue();
    let running = queue.is_running();

    let mut services = HashMap::new();
    services.insert("task_queue".to_string(), running);
    services.insert("document_analyzer".to_string(), true);

    Json(HealthResponse {
        status: "healthy".to_string(),
        system_info: serde_json::json!({
            "cpu_count": num_cpus::get(),
            "max_concurrent_tasks": queue.max_concurrent(),
            "dispatcher_running": running,
            "queue": queue.get_queue_status(),
        }),
        services,
    })
}

/// Readiness check endpoint
async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
