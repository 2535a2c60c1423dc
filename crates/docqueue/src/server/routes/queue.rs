//! Queue inspection and cancellation endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::{Error, Result};
use crate::processing::TaskId;
use crate::server::state::AppState;
use crate::types::response::{
    unix_timestamp, CancelResponse, QueueStatusResponse, TaskStatusResponse,
};

/// GET /queue/status - Bucket counts
pub async fn queue_status(State(state): State<AppState>) -> Json<QueueStatusResponse> {
    Json(QueueStatusResponse {
        queue_status: state.queue().get_queue_status(),
        timestamp: unix_timestamp(),
    })
}

/// GET /queue/task/:id - One task's status and position
pub async fn task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusResponse>> {
    let task_id: TaskId = id.parse()?;
    let queue = state.queue();
    let task = queue
        .get_status(&task_id)
        .ok_or_else(|| Error::TaskNotFound(id))?;

    Ok(Json(TaskStatusResponse::from_task(
        &task,
        queue.get_queue_position(&task_id),
    )))
}

/// DELETE /queue/task/:id - Cancel a task still waiting in line
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>> {
    let task_id: TaskId = id.parse().map_err(|_| Error::NotCancellable(id.clone()))?;

    if state.queue().cancel(&task_id) {
        Ok(Json(CancelResponse {
            message: format!("Task {} cancelled successfully", task_id),
        }))
    } else {
        Err(Error::NotCancellable(id))
    }
}
