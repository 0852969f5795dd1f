// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use syncarr_scheduler::{EnqueueOptions, TaskId, TaskRecord};
use tracing::debug;
use utoipa::ToSchema;

use super::{error_response, internal_error, ErrorResponse};
use crate::ApiState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskResponse {
    pub id: String,
    pub queue: String,
    pub task_name: String,
    pub verbose_name: Option<String>,
    pub state: String,
    pub priority: i64,
    pub attempts: u32,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    #[schema(value_type = String, format = DateTime)]
    pub run_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<TaskRecord> for TaskResponse {
    fn from(task: TaskRecord) -> Self {
        Self {
            id: task.id.to_string(),
            queue: task.queue,
            task_name: task.task_name,
            verbose_name: task.verbose_name,
            state: task.state.to_string(),
            priority: task.priority,
            attempts: task.attempts,
            max_attempts: task.max_attempts,
            retry_delay_secs: task.retry_delay_secs,
            run_at: task.run_at,
            finished_at: task.finished_at,
            last_error: task.last_error,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    /// Registered job name, e.g. `index_source`
    pub job: String,
    #[schema(value_type = Option<Vec<Object>>)]
    pub args: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub kwargs: Option<Value>,
    pub priority: Option<i64>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub eta: Option<DateTime<Utc>>,
    pub verbose_name: Option<String>,
    #[serde(default)]
    pub replace_existing: bool,
}

/// Put a job on its queue
#[utoipa::path(
    post,
    path = "/api/v1/tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task enqueued", body = TaskResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "tasks"
)]
pub async fn create_task(
    State(state): State<ApiState>,
    Json(request): Json<CreateTaskRequest>,
) -> impl IntoResponse {
    debug!(target: "api", ?request, "creating task");
    let handle = state.scheduler.handle();
    if handle.registry().job(&request.job).is_none() {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Unknown job {}", request.job),
        );
    }
    let args = request.args.unwrap_or_else(|| json!([]));
    if !args.is_array() {
        return error_response(StatusCode::BAD_REQUEST, "args must be an array");
    }
    let kwargs = request.kwargs.unwrap_or_else(|| json!({}));
    if !kwargs.is_object() {
        return error_response(StatusCode::BAD_REQUEST, "kwargs must be an object");
    }

    let options = EnqueueOptions {
        args,
        kwargs,
        priority: request.priority.unwrap_or(0),
        eta: request.eta,
        verbose_name: request.verbose_name,
        replace_existing: request.replace_existing,
        ..EnqueueOptions::default()
    };
    let id = match handle.enqueue(&request.job, options).await {
        Ok(id) => id,
        Err(err) => return internal_error(err),
    };
    match handle.store().get(id).await {
        Ok(Some(task)) => (StatusCode::CREATED, Json(TaskResponse::from(task))).into_response(),
        Ok(None) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "task vanished after enqueue"),
        Err(err) => internal_error(err),
    }
}

/// Look up a task record
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}",
    params(
        ("id" = String, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task found", body = TaskResponse),
        (status = 400, description = "Malformed ID", body = ErrorResponse),
        (status = 404, description = "Task not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "tasks"
)]
pub async fn get_task(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let Ok(task_id) = id.parse::<TaskId>() else {
        return error_response(StatusCode::BAD_REQUEST, format!("Invalid task ID {}", id));
    };
    match state.scheduler.handle().store().get(task_id).await {
        Ok(Some(task)) => Json(TaskResponse::from(task)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Task {} not found", id)),
        Err(err) => internal_error(err),
    }
}
