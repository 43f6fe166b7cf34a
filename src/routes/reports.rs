//! Report storage and auto-fix routes, invoked by the surrounding job system.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::models::report::ReportArtifact;
use crate::services::autofix::{self, AutoFixResult, PgMergeRequestBackend};
use crate::services::store_reports::{self, StoreReportsResult};
use crate::AppState;

/// POST /api/v1/projects/{project_id}/pipelines/{pipeline_id}/reports —
/// store all security report artifacts of a pipeline.
pub async fn store(
    State(state): State<AppState>,
    Path((project_id, pipeline_id)): Path<(Uuid, Uuid)>,
    Json(artifacts): Json<Vec<ReportArtifact>>,
) -> Result<Json<ApiResponse<StoreReportsResult>>, AppError> {
    let result = store_reports::store_reports(
        &state.db,
        project_id,
        pipeline_id,
        &artifacts,
        state.config.reconcile_batch_size,
    )
    .await?;
    Ok(ApiResponse::success(result))
}

/// POST /api/v1/projects/{project_id}/pipelines/{pipeline_id}/auto_fix —
/// open merge requests for remediable vulnerabilities in the pipeline's scope.
pub async fn auto_fix(
    State(state): State<AppState>,
    Path((project_id, pipeline_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<AutoFixResult>>, AppError> {
    let settings = autofix::load_settings(&state.db, project_id).await?;
    let backend = PgMergeRequestBackend;
    let result =
        autofix::auto_fix(&state.db, &backend, project_id, pipeline_id, &settings).await?;
    Ok(ApiResponse::success(result))
}
