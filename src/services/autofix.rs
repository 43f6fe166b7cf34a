//! Auto-fix engine: opens at most one merge request per logical vulnerability
//! from scanner-supplied remediation diffs.
//!
//! Idempotence rests on the `merge_request` feedback row and its unique
//! constraint: the feedback insert and the backend writes share one
//! transaction's connection, so a failed MR or a failed commit discards both
//! rows together and a second run (or a racing pipeline) finds the row and
//! skips.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::feedback::{CreateFeedback, FeedbackType};
use crate::models::report::{Remediation, ReportType};
use crate::services::{feedback, patch};

/// Auto-fix author recorded on generated feedback rows.
const AUTO_FIX_AUTHOR: &str = "auto-fix";

/// Report types auto-fix can currently remediate.
const SUPPORTED_REPORT_TYPES: &[ReportType] = &[ReportType::DependencyScanning];

/// Resolved policy snapshot for one project, passed in at call time instead of
/// queried from inside the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoFixSettings {
    pub dependency_scanning: bool,
    pub container_scanning: bool,
}

impl AutoFixSettings {
    pub fn enabled_for(&self, report_type: ReportType) -> bool {
        match report_type {
            ReportType::DependencyScanning => self.dependency_scanning,
            ReportType::ContainerScanning => self.container_scanning,
            _ => false,
        }
    }

    pub fn any_enabled(&self) -> bool {
        SUPPORTED_REPORT_TYPES.iter().any(|rt| self.enabled_for(*rt))
    }
}

/// Load the project's auto-fix policy flags.
pub async fn load_settings(pool: &PgPool, project_id: Uuid) -> Result<AutoFixSettings, AppError> {
    let row: Option<(bool, bool)> = sqlx::query_as(
        "SELECT auto_fix_dependency_scanning, auto_fix_container_scanning FROM projects WHERE id = $1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    let (dependency_scanning, container_scanning) = row.ok_or_else(|| {
        AppError::NotFound(format!("project {project_id} not found"))
    })?;
    Ok(AutoFixSettings {
        dependency_scanning,
        container_scanning,
    })
}

/// Reference to a created merge request.
#[derive(Debug, Clone, Serialize)]
pub struct MergeRequestRef {
    pub id: Uuid,
    pub source_branch: String,
    pub title: String,
}

/// Parameters handed to the merge-request collaborator.
#[derive(Debug)]
pub struct MergeRequestParams<'a> {
    pub project_id: Uuid,
    pub source_branch: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub path: &'a str,
    pub patched_content: &'a str,
}

/// The surrounding application's merge-request surface.
///
/// Both methods run on the caller's connection, which during an auto-fix is
/// the feedback claim's transaction: a rollback discards the backend's writes
/// together with the claim.
pub trait MergeRequestBackend {
    /// Fetch current file content at the repository head.
    fn fetch_file(
        &self,
        conn: &mut PgConnection,
        project_id: Uuid,
        path: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, AppError>> + Send;

    /// Open a merge request carrying the patched file.
    fn create_merge_request(
        &self,
        conn: &mut PgConnection,
        params: &MergeRequestParams<'_>,
    ) -> impl std::future::Future<Output = Result<MergeRequestRef, AppError>> + Send;
}

/// Per-vulnerability auto-fix failure, contained so siblings continue.
#[derive(Debug, Serialize)]
pub struct AutoFixError {
    pub project_fingerprint: String,
    pub title: String,
    pub error: String,
}

/// Outcome of one auto-fix run.
#[derive(Debug, Default, Serialize)]
pub struct AutoFixResult {
    pub created: Vec<MergeRequestRef>,
    pub skipped_existing: usize,
    pub errors: Vec<AutoFixError>,
}

#[derive(Debug, sqlx::FromRow)]
struct RemediationCandidate {
    project_fingerprint: String,
    title: String,
    remediation: serde_json::Value,
}

/// Open merge requests for remediable vulnerabilities in a pipeline's scope.
pub async fn auto_fix<B: MergeRequestBackend>(
    pool: &PgPool,
    backend: &B,
    project_id: Uuid,
    pipeline_id: Uuid,
    settings: &AutoFixSettings,
) -> Result<AutoFixResult, AppError> {
    let mut result = AutoFixResult::default();
    if !settings.any_enabled() {
        return Ok(result);
    }

    let enabled: Vec<ReportType> = SUPPORTED_REPORT_TYPES
        .iter()
        .copied()
        .filter(|rt| settings.enabled_for(*rt))
        .collect();

    let candidates: Vec<RemediationCandidate> = sqlx::query_as(
        r#"
        SELECT vf.project_fingerprint, vf.title, vf.remediation
        FROM vulnerability_findings vf
        WHERE vf.project_id = $1
          AND vf.report_type = ANY($2)
          AND vf.remediation IS NOT NULL
          AND vf.project_fingerprint IN (
              SELECT sf.project_fingerprint
              FROM security_findings sf
              JOIN scans s ON s.id = sf.scan_id
              WHERE s.pipeline_id = $3
          )
        ORDER BY vf.created_at
        "#,
    )
    .bind(project_id)
    .bind(&enabled)
    .bind(pipeline_id)
    .fetch_all(pool)
    .await?;

    for candidate in candidates {
        match fix_one(pool, backend, project_id, &candidate).await {
            Ok(Some(mr)) => result.created.push(mr),
            Ok(None) => result.skipped_existing += 1,
            Err(e) => {
                tracing::warn!(
                    project_id = %project_id,
                    fingerprint = %candidate.project_fingerprint,
                    error = %e,
                    "Auto-fix skipped vulnerability"
                );
                result.errors.push(AutoFixError {
                    project_fingerprint: candidate.project_fingerprint,
                    title: candidate.title,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(result)
}

/// Attempt one merge request. Returns `None` when a merge_request feedback row
/// already exists for the fingerprint.
async fn fix_one<B: MergeRequestBackend>(
    pool: &PgPool,
    backend: &B,
    project_id: Uuid,
    candidate: &RemediationCandidate,
) -> Result<Option<MergeRequestRef>, AppError> {
    let remediation: Remediation = serde_json::from_value(candidate.remediation.clone())
        .map_err(|e| AppError::InvalidFinding(format!("unreadable remediation: {e}")))?;

    let path = patch::target_path(&remediation.diff).ok_or_else(|| {
        AppError::PatchConflict("remediation diff names no target file".to_string())
    })?;

    let mut tx = pool.begin().await?;

    // Claim the fingerprint first; the unique constraint serializes racing
    // pipelines and the row is discarded on rollback if the MR never opens.
    let claim = feedback::find_or_create(
        &mut *tx,
        project_id,
        &CreateFeedback {
            project_fingerprint: candidate.project_fingerprint.clone(),
            feedback_type: FeedbackType::MergeRequest,
            author: AUTO_FIX_AUTHOR.to_string(),
            comment: Some(remediation.summary.clone()),
            issue_ref: None,
            merge_request_ref: None,
        },
    )
    .await?;

    let created = match claim {
        feedback::FindOrCreate::Found(_) => {
            tx.rollback().await?;
            return Ok(None);
        }
        feedback::FindOrCreate::Created(row) => row,
    };

    let original = backend
        .fetch_file(&mut *tx, project_id, &path)
        .await?
        .ok_or_else(|| AppError::PatchConflict(format!("target file {path} not found")))?;
    let patched = patch::apply(&original, &remediation.diff)?;

    let source_branch = branch_name(&candidate.project_fingerprint);
    let mr = backend
        .create_merge_request(&mut *tx, &MergeRequestParams {
            project_id,
            source_branch: &source_branch,
            title: &format!("Auto-fix: {}", candidate.title),
            description: &remediation.summary,
            path: &path,
            patched_content: &patched,
        })
        .await?;

    sqlx::query("UPDATE feedback SET merge_request_ref = $1 WHERE id = $2")
        .bind(mr.id.to_string())
        .bind(created.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(mr))
}

fn branch_name(fingerprint: &str) -> String {
    format!("auto-fix/{}", &fingerprint[..fingerprint.len().min(12)])
}

/// Merge-request backend persisted alongside the vulnerability store. Stands
/// in for the surrounding application's repository service; writes land on
/// whatever connection the caller hands over.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgMergeRequestBackend;

impl MergeRequestBackend for PgMergeRequestBackend {
    async fn fetch_file(
        &self,
        conn: &mut PgConnection,
        project_id: Uuid,
        path: &str,
    ) -> Result<Option<String>, AppError> {
        let content: Option<String> = sqlx::query_scalar(
            "SELECT content FROM repository_files WHERE project_id = $1 AND path = $2",
        )
        .bind(project_id)
        .bind(path)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(content)
    }

    async fn create_merge_request(
        &self,
        conn: &mut PgConnection,
        params: &MergeRequestParams<'_>,
    ) -> Result<MergeRequestRef, AppError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO merge_requests
                (project_id, source_branch, title, description, patched_path, patched_content)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(params.project_id)
        .bind(params.source_branch)
        .bind(params.title)
        .bind(params.description)
        .bind(params.path)
        .bind(params.patched_content)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| AppError::MergeRequestCreation(e.to_string()))?;

        Ok(MergeRequestRef {
            id,
            source_branch: params.source_branch.to_string(),
            title: params.title.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_gate_report_types() {
        let settings = AutoFixSettings {
            dependency_scanning: true,
            container_scanning: false,
        };
        assert!(settings.enabled_for(ReportType::DependencyScanning));
        assert!(!settings.enabled_for(ReportType::ContainerScanning));
        assert!(!settings.enabled_for(ReportType::Sast));
        assert!(settings.any_enabled());
    }

    #[test]
    fn disabled_settings_mean_noop() {
        let settings = AutoFixSettings::default();
        assert!(!settings.any_enabled());
    }

    #[test]
    fn container_scanning_flag_alone_enables_nothing_supported() {
        // container_scanning is a policy flag but not yet a supported type.
        let settings = AutoFixSettings {
            dependency_scanning: false,
            container_scanning: true,
        };
        assert!(!settings.any_enabled());
    }

    #[test]
    fn branch_name_truncates_fingerprint() {
        let name = branch_name("abcdef0123456789abcdef");
        assert_eq!(name, "auto-fix/abcdef012345");
        assert_eq!(branch_name("short"), "auto-fix/short");
    }
}
