//! Feedback routes: record and list triage decisions.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::models::feedback::{CreateFeedback, Feedback};
use crate::services::feedback;
use crate::AppState;

/// Feedback creation response, flagging whether the row already existed.
#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub feedback: Feedback,
    pub created: bool,
}

/// POST /api/v1/projects/{project_id}/feedback — record a triage action.
///
/// Idempotent per (project, fingerprint, type): a repeated dismissal returns
/// the original row with `created: false`.
pub async fn create(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(input): Json<CreateFeedback>,
) -> Result<Json<ApiResponse<FeedbackResponse>>, AppError> {
    let mut conn = state.db.acquire().await?;
    let outcome = feedback::find_or_create(&mut *conn, project_id, &input).await?;
    let created = outcome.was_created();
    Ok(ApiResponse::success(FeedbackResponse {
        feedback: outcome.into_inner(),
        created,
    }))
}

/// GET /api/v1/projects/{project_id}/feedback — list a project's feedback.
pub async fn list(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Feedback>>>, AppError> {
    let rows = feedback::list(&state.db, project_id).await?;
    Ok(ApiResponse::success(rows))
}
