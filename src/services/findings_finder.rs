//! Paginated listing of pipeline-scoped security findings.
//!
//! Serves the pre-reconciliation index written at store time, so callers can
//! page through a pipeline's raw findings without touching the durable
//! vulnerability store.

use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::pagination::{Page, Pagination};
use crate::models::report::{ReportType, Severity};
use crate::models::security_finding::SecurityFindingEntry;

/// Filters for listing a pipeline's findings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindingFilters {
    pub report_type: Option<ReportType>,
    pub severity: Option<Severity>,
}

/// List security findings for a pipeline, worst severity first, stable within
/// a scan by report position.
pub async fn list(
    pool: &PgPool,
    pipeline_id: Uuid,
    filters: &FindingFilters,
    pagination: &Pagination,
) -> Result<Page<SecurityFindingEntry>, AppError> {
    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM security_findings sf
        JOIN scans s ON s.id = sf.scan_id
        WHERE s.pipeline_id = $1
          AND ($2::report_type IS NULL OR s.report_type = $2)
          AND ($3::severity_level IS NULL OR sf.severity = $3)
        "#,
    )
    .bind(pipeline_id)
    .bind(filters.report_type)
    .bind(filters.severity)
    .fetch_one(pool)
    .await?;

    let items = sqlx::query_as::<_, SecurityFindingEntry>(
        r#"
        SELECT sf.id, sf.scan_id, s.report_type, sf.position, sf.title,
               sf.severity, sf.confidence, sf.project_fingerprint
        FROM security_findings sf
        JOIN scans s ON s.id = sf.scan_id
        WHERE s.pipeline_id = $1
          AND ($2::report_type IS NULL OR s.report_type = $2)
          AND ($3::severity_level IS NULL OR sf.severity = $3)
        ORDER BY sf.severity DESC, s.report_type, sf.position
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(pipeline_id)
    .bind(filters.report_type)
    .bind(filters.severity)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    Ok(Page::new(items, total, pagination))
}
