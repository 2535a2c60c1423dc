//! HTTP routes

pub mod analyze;
pub mod queue;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Build the analysis and queue routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Upload with a larger body limit, answered as an event stream
        .route(
            "/analyze",
            post(analyze::analyze).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/queue/status", get(queue::queue_status))
        .route(
            "/queue/task/:id",
            get(queue::task_status).delete(queue::cancel_task),
        )
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "docqueue",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Serialized PDF analysis with live progress streaming",
        "endpoints": {
            "POST /analyze": "Upload a PDF (multipart field 'file'); responds with an event stream",
            "GET /queue/status": "Pending, processing, completed and failed task counts",
            "GET /queue/task/:id": "Status of one task",
            "DELETE /queue/task/:id": "Cancel a task that has not started",
            "GET /health": "Service health",
            "GET /ready": "Dispatcher readiness"
        }
    }))
}
