//! Pipeline findings listing route.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::models::pagination::{Page, Pagination};
use crate::models::security_finding::SecurityFindingEntry;
use crate::services::findings_finder::{self, FindingFilters};
use crate::AppState;

/// GET /api/v1/pipelines/{pipeline_id}/findings — paginated, filterable list
/// of a pipeline's security findings.
pub async fn list(
    State(state): State<AppState>,
    Path(pipeline_id): Path<Uuid>,
    Query(filters): Query<FindingFilters>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<ApiResponse<Page<SecurityFindingEntry>>>, AppError> {
    let page = findings_finder::list(&state.db, pipeline_id, &filters, &pagination).await?;
    Ok(ApiResponse::success(page))
}
