// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use syncarr_domain::SourceId;
use syncarr_scheduler::maintenance;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{error_response, internal_error, ErrorResponse};
use crate::ApiState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteSourceResponse {
    pub source_id: String,
    /// IDs of the tasks revoked along with the source
    pub revoked_tasks: Vec<String>,
}

/// Delete a source, its media and every task it owns
#[utoipa::path(
    delete,
    path = "/api/v1/sources/{id}",
    params(
        ("id" = String, Path, description = "Source ID")
    ),
    responses(
        (status = 200, description = "Source deleted", body = DeleteSourceResponse),
        (status = 400, description = "Malformed ID", body = ErrorResponse),
        (status = 404, description = "Source not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "sources"
)]
pub async fn delete_source(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return error_response(StatusCode::BAD_REQUEST, format!("Invalid source ID {}", id));
    };
    let scheduler = &state.scheduler;
    let result = maintenance::delete_source(
        scheduler.pool(),
        scheduler.sources().as_ref(),
        scheduler.media().as_ref(),
        scheduler.handle(),
        scheduler.media_server_names(),
        SourceId::from_uuid(uuid),
    )
    .await;

    match result {
        Ok(Some(revoked)) => {
            info!(target: "api", source_id = %id, revoked = revoked.len(), "source deleted");
            Json(DeleteSourceResponse {
                source_id: id,
                revoked_tasks: revoked.iter().map(|t| t.id.to_string()).collect(),
            })
            .into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Source {} not found", id)),
        Err(err) => internal_error(err),
    }
}
