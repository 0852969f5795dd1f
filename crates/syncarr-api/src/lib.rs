// SPDX-License-Identifier: GPL-3.0-or-later
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Json, Router,
};
use handlers::queues::{
    list_failed, list_queues, reset_queue, QueueResponse, ResetResponse, __path_list_failed,
    __path_list_queues, __path_reset_queue,
};
use handlers::sources::{delete_source, DeleteSourceResponse, __path_delete_source};
use handlers::tasks::{
    create_task, get_task, CreateTaskRequest, TaskResponse, __path_create_task, __path_get_task,
};
use handlers::ErrorResponse;
use serde::Serialize;
use syncarr_scheduler::Scheduler;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Shared state of every handler.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
}

impl ApiState {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
#[allow(dead_code)]
async fn health() -> Json<HealthResponse> {
    health_handler().await
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        list_queues,
        list_failed,
        reset_queue,
        create_task,
        get_task,
        delete_source,
    ),
    components(
        schemas(
            HealthResponse,
            QueueResponse,
            ResetResponse,
            CreateTaskRequest,
            TaskResponse,
            DeleteSourceResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "system", description = "System health and status endpoints"),
        (name = "queues", description = "Queue statistics and maintenance"),
        (name = "tasks", description = "Task submission and lookup"),
        (name = "sources", description = "Source removal")
    ),
    info(
        title = "Syncarr API",
        version = "0.1.0",
        description = "Operational introspection for the Syncarr task scheduler",
    )
)]
struct ApiDoc;

pub fn router(state: ApiState) -> Router {
    info!(target: "api", "building router");

    let api_v1 = Router::new()
        .route("/queues", get(list_queues))
        .route("/queues/:name/failed", get(list_failed))
        .route("/queues/:name/reset", post(reset_queue))
        .route("/tasks", post(create_task))
        .route("/tasks/:id", get(get_task))
        .route("/sources/:id", delete(delete_source));

    let openapi = ApiDoc::openapi();

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1", api_v1)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", openapi))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/health",
            "/api/v1/queues",
            "/api/v1/queues/{name}/failed",
            "/api/v1/queues/{name}/reset",
            "/api/v1/tasks",
            "/api/v1/tasks/{id}",
            "/api/v1/sources/{id}",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }
}
