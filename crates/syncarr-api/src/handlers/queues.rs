// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use syncarr_scheduler::maintenance::{self, ResetStatus};
use syncarr_scheduler::QueueStats;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use super::tasks::TaskResponse;
use super::{error_response, internal_error, ErrorResponse};
use crate::ApiState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, IntoParams)]
pub struct FailedQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueResponse {
    pub name: String,
    pub workers: usize,
    pub worker_model: String,
    pub priority_ordering: String,
    pub max_attempts: u32,
    pub max_run_time_secs: u64,
    pub pending: u64,
    pub scheduled: u64,
    pub running: u64,
    pub retrying: u64,
    pub revoked: u64,
    pub complete: u64,
    pub failed: u64,
    pub expired: u64,
    pub result_keys: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResetResponse {
    pub queue: String,
    pub status: String,
}

fn enum_label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

// ============================================================================
// Handlers
// ============================================================================

/// Statistics for every configured queue
#[utoipa::path(
    get,
    path = "/api/v1/queues",
    responses(
        (status = 200, description = "Queue statistics", body = Vec<QueueResponse>),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "queues"
)]
pub async fn list_queues(State(state): State<ApiState>) -> impl IntoResponse {
    let handle = state.scheduler.handle();
    let now = Utc::now();
    let mut queues = Vec::new();
    for queue in handle.registry().queues() {
        let stats: QueueStats = match handle.store().stats(&queue.name, now).await {
            Ok(stats) => stats,
            Err(err) => return internal_error(err),
        };
        queues.push(QueueResponse {
            name: queue.name.clone(),
            workers: queue.workers,
            worker_model: enum_label(&queue.worker_model),
            priority_ordering: enum_label(&queue.priority_ordering),
            max_attempts: queue.max_attempts,
            max_run_time_secs: queue.max_run_time.as_secs(),
            pending: stats.pending,
            scheduled: stats.scheduled,
            running: stats.running,
            retrying: stats.retrying,
            revoked: stats.revoked,
            complete: stats.complete,
            failed: stats.failed,
            expired: stats.expired,
            result_keys: stats.result_keys,
        });
    }
    Json(queues).into_response()
}

/// Permanently failed tasks of a queue, newest first
#[utoipa::path(
    get,
    path = "/api/v1/queues/{name}/failed",
    params(
        ("name" = String, Path, description = "Queue name"),
        FailedQuery
    ),
    responses(
        (status = 200, description = "Failed tasks", body = Vec<TaskResponse>),
        (status = 404, description = "Queue not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "queues"
)]
pub async fn list_failed(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<FailedQuery>,
) -> impl IntoResponse {
    debug!(target: "api", %name, ?query, "listing failed tasks");
    let handle = state.scheduler.handle();
    if handle.registry().queue(&name).is_none() {
        return error_response(StatusCode::NOT_FOUND, format!("Queue {} not found", name));
    }

    let limit = query.limit.clamp(1, 500);
    match handle.store().list_failed(&name, limit).await {
        Ok(tasks) => {
            let tasks: Vec<TaskResponse> = tasks.into_iter().map(TaskResponse::from).collect();
            Json(tasks).into_response()
        }
        Err(err) => internal_error(err),
    }
}

/// Drop every task, result and revocation of a queue
#[utoipa::path(
    post,
    path = "/api/v1/queues/{name}/reset",
    params(
        ("name" = String, Path, description = "Queue name")
    ),
    responses(
        (status = 200, description = "Queue reset", body = ResetResponse),
        (status = 404, description = "Queue not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "queues"
)]
pub async fn reset_queue(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let handle = state.scheduler.handle();
    if handle.registry().queue(&name).is_none() {
        return error_response(StatusCode::NOT_FOUND, format!("Queue {} not found", name));
    }

    let mut status = None;
    let result = maintenance::reset_queue(handle.store().as_ref(), &name, |s| status = Some(s)).await;
    if let Err(err) = result {
        return internal_error(err);
    }

    info!(target: "api", queue = %name, "queue reset requested over http");
    let status = match status {
        Some(ResetStatus::Finished) => "finished",
        None => "unknown",
    };
    Json(ResetResponse {
        queue: name,
        status: status.to_string(),
    })
    .into_response()
}
