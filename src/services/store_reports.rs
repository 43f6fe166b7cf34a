//! Store orchestration: drives parse -> fingerprint -> reconcile -> feedback
//! for every report type attached to a pipeline, with per-report isolation.
//!
//! One report type failing (parse error, storage error) is recorded in the
//! per-report error map and never blocks the siblings. The project-level
//! `has_vulnerabilities` flag is flipped once after the fan-in, monotonically.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::report::{ReportArtifact, ReportType};
use crate::services::reconciler::{self, ReconcileResult};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    Success,
    Error,
}

/// Aggregated outcome of one store run. Callers get the full per-report error
/// map, not just the last error.
#[derive(Debug, Serialize)]
pub struct StoreReportsResult {
    pub status: StoreStatus,
    pub results: BTreeMap<ReportType, ReconcileResult>,
    pub errors: BTreeMap<ReportType, String>,
    pub project_flagged: bool,
}

/// Store all report artifacts of a pipeline.
pub async fn store_reports(
    pool: &PgPool,
    project_id: Uuid,
    pipeline_id: Uuid,
    artifacts: &[ReportArtifact],
    batch_size: usize,
) -> Result<StoreReportsResult, AppError> {
    let pipeline_exists: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM pipelines WHERE id = $1 AND project_id = $2",
    )
    .bind(pipeline_id)
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    if pipeline_exists.is_none() {
        return Err(AppError::NotFound(format!(
            "pipeline {pipeline_id} not found for project {project_id}"
        )));
    }

    let mut results = BTreeMap::new();
    let mut errors = BTreeMap::new();

    for artifact in artifacts {
        match store_one_report(pool, project_id, pipeline_id, artifact, batch_size).await {
            Ok(result) => {
                results.insert(artifact.report_type, result);
            }
            Err(e) => {
                tracing::warn!(
                    project_id = %project_id,
                    pipeline_id = %pipeline_id,
                    report_type = %artifact.report_type,
                    error = %e,
                    "Report storage failed"
                );
                errors.insert(artifact.report_type, e.to_string());
            }
        }
    }

    // Monotonic and idempotent under concurrent completion of racing
    // pipelines; never reset to false here.
    let mut project_flagged = false;
    if !results.is_empty() {
        project_flagged = mark_project_vulnerable(pool, project_id).await?;
    }

    let status = if errors.is_empty() {
        StoreStatus::Success
    } else {
        StoreStatus::Error
    };

    Ok(StoreReportsResult {
        status,
        results,
        errors,
        project_flagged,
    })
}

/// Process a single report type end to end: parse, index for pipeline-scoped
/// listing, then reconcile (which re-applies dismissals in its transactions).
async fn store_one_report(
    pool: &PgPool,
    project_id: Uuid,
    pipeline_id: Uuid,
    artifact: &ReportArtifact,
    batch_size: usize,
) -> Result<ReconcileResult, AppError> {
    let findings = artifact.parse()?;

    register_scan(pool, project_id, pipeline_id, artifact.report_type, &findings).await?;

    reconciler::reconcile(pool, project_id, artifact.report_type, &findings, batch_size).await
}

/// Record the scan and its positioned security findings, replacing any prior
/// index for the same (pipeline, report type) so a re-run leaves no extras.
async fn register_scan(
    pool: &PgPool,
    project_id: Uuid,
    pipeline_id: Uuid,
    report_type: ReportType,
    findings: &[crate::models::report::ReportFinding],
) -> Result<(), AppError> {
    let (keyed, _) = reconciler::key_findings(report_type, findings);

    let mut tx = pool.begin().await?;

    let scan_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO scans (pipeline_id, project_id, report_type)
        VALUES ($1, $2, $3)
        ON CONFLICT ON CONSTRAINT uq_scan_per_report DO UPDATE SET project_id = EXCLUDED.project_id
        RETURNING id
        "#,
    )
    .bind(pipeline_id)
    .bind(project_id)
    .bind(report_type)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM security_findings WHERE scan_id = $1")
        .bind(scan_id)
        .execute(&mut *tx)
        .await?;

    if !keyed.is_empty() {
        let positions: Vec<i32> = (0..keyed.len() as i32).collect();
        let titles: Vec<&str> = keyed.iter().map(|k| k.finding.title.as_str()).collect();
        let severities: Vec<_> = keyed.iter().map(|k| k.finding.severity).collect();
        let confidences: Vec<_> = keyed.iter().map(|k| k.finding.confidence).collect();
        let fingerprints: Vec<&str> = keyed
            .iter()
            .map(|k| k.project_fingerprint.as_str())
            .collect();

        // One statement for the whole report, mirroring the reconciler's
        // bulk read discipline.
        sqlx::query(
            r#"
            INSERT INTO security_findings
                (scan_id, position, title, severity, confidence, project_fingerprint)
            SELECT $1, t.position, t.title, t.severity, t.confidence, t.fingerprint
            FROM UNNEST($2::int4[], $3::text[], $4::severity_level[], $5::confidence_level[], $6::text[])
                AS t(position, title, severity, confidence, fingerprint)
            "#,
        )
        .bind(scan_id)
        .bind(&positions)
        .bind(&titles)
        .bind(&severities)
        .bind(&confidences)
        .bind(&fingerprints)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Flip the project's vulnerability flag; returns whether this call flipped it.
async fn mark_project_vulnerable(pool: &PgPool, project_id: Uuid) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE projects
        SET has_vulnerabilities = TRUE, updated_at = NOW()
        WHERE id = $1 AND NOT has_vulnerabilities
        "#,
    )
    .bind(project_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serializes_report_types_as_keys() {
        let mut errors = BTreeMap::new();
        errors.insert(ReportType::Sast, "boom".to_string());
        let result = StoreReportsResult {
            status: StoreStatus::Error,
            results: BTreeMap::new(),
            errors,
            project_flagged: false,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["errors"]["sast"], "boom");
    }

    #[test]
    fn status_serialization() {
        assert_eq!(
            serde_json::to_value(StoreStatus::Success).unwrap(),
            "success"
        );
    }
}
