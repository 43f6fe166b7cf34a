//! Alert webhook route.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::services::alerts::{self, AlertIngestResult, DbAlertProcessor};
use crate::AppState;

/// POST /api/v1/projects/{project_id}/alerts/notify — Alertmanager webhook.
///
/// Responds 200 on accepted dispatch, 400 when oversized, 401 on a bad token,
/// 422 on an unprocessable shape or version.
pub async fn notify(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<AlertIngestResult>>, AppError> {
    let bearer = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let tokens = alerts::load_tokens(&state.db, project_id).await?;
    let processor = DbAlertProcessor::new(state.db.clone());

    let result = alerts::ingest(
        &body,
        bearer,
        &tokens,
        state.config.alert_max_payload_bytes,
        project_id,
        &processor,
    )
    .await?;

    Ok(ApiResponse::success(result))
}
