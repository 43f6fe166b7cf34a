//! Vulnerability listing and triage routes.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::models::pagination::{Page, Pagination};
use crate::models::vulnerability::Vulnerability;
use crate::services::vulnerabilities::{
    self, TransitionRequest, VulnerabilityDetail, VulnerabilityFilters,
};
use crate::AppState;

/// GET /api/v1/projects/{project_id}/vulnerabilities — paginated, filterable
/// list of a project's vulnerabilities.
pub async fn list(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(filters): Query<VulnerabilityFilters>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<ApiResponse<Page<Vulnerability>>>, AppError> {
    let page = vulnerabilities::list(&state.db, project_id, &filters, &pagination).await?;
    Ok(ApiResponse::success(page))
}

/// GET /api/v1/projects/{project_id}/vulnerabilities/{vulnerability_id} —
/// one vulnerability with its primary finding.
pub async fn get(
    State(state): State<AppState>,
    Path((project_id, vulnerability_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<VulnerabilityDetail>>, AppError> {
    let detail = vulnerabilities::get(&state.db, project_id, vulnerability_id).await?;
    Ok(ApiResponse::success(detail))
}

/// POST /api/v1/projects/{project_id}/vulnerabilities/{vulnerability_id}/state
/// — apply a triage state transition.
pub async fn transition(
    State(state): State<AppState>,
    Path((project_id, vulnerability_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<ApiResponse<Vulnerability>>, AppError> {
    let updated =
        vulnerabilities::transition(&state.db, project_id, vulnerability_id, &request).await?;
    Ok(ApiResponse::success(updated))
}
