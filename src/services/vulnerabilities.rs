//! Vulnerability listing and triage.
//!
//! Triage transitions go through the state machine in
//! `models::vulnerability`; a dismissal additionally writes the durable
//! feedback row so the decision survives the next reconcile.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::feedback::{CreateFeedback, FeedbackType};
use crate::models::pagination::{Page, Pagination};
use crate::models::report::{ReportType, Severity};
use crate::models::vulnerability::{Vulnerability, VulnerabilityFinding, VulnerabilityState};
use crate::services::feedback;

/// Filters for listing a project's vulnerabilities.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VulnerabilityFilters {
    pub state: Option<VulnerabilityState>,
    pub report_type: Option<ReportType>,
    pub severity: Option<Severity>,
}

/// A vulnerability together with its primary finding detail.
#[derive(Debug, Serialize)]
pub struct VulnerabilityDetail {
    pub vulnerability: Vulnerability,
    pub finding: Option<VulnerabilityFinding>,
}

/// Triage input: the target state plus attribution.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionRequest {
    pub state: VulnerabilityState,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_author() -> String {
    "system".to_string()
}

/// List a project's vulnerabilities, worst severity first.
pub async fn list(
    pool: &PgPool,
    project_id: Uuid,
    filters: &VulnerabilityFilters,
    pagination: &Pagination,
) -> Result<Page<Vulnerability>, AppError> {
    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM vulnerabilities
        WHERE project_id = $1
          AND ($2::vulnerability_state IS NULL OR state = $2)
          AND ($3::report_type IS NULL OR report_type = $3)
          AND ($4::severity_level IS NULL OR severity = $4)
        "#,
    )
    .bind(project_id)
    .bind(filters.state)
    .bind(filters.report_type)
    .bind(filters.severity)
    .fetch_one(pool)
    .await?;

    let items = sqlx::query_as::<_, Vulnerability>(
        r#"
        SELECT * FROM vulnerabilities
        WHERE project_id = $1
          AND ($2::vulnerability_state IS NULL OR state = $2)
          AND ($3::report_type IS NULL OR report_type = $3)
          AND ($4::severity_level IS NULL OR severity = $4)
        ORDER BY severity DESC, created_at
        LIMIT $5 OFFSET $6
        "#,
    )
    .bind(project_id)
    .bind(filters.state)
    .bind(filters.report_type)
    .bind(filters.severity)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    Ok(Page::new(items, total, pagination))
}

/// Fetch one vulnerability with its primary finding.
pub async fn get(
    pool: &PgPool,
    project_id: Uuid,
    vulnerability_id: Uuid,
) -> Result<VulnerabilityDetail, AppError> {
    let vulnerability = sqlx::query_as::<_, Vulnerability>(
        "SELECT * FROM vulnerabilities WHERE id = $1 AND project_id = $2",
    )
    .bind(vulnerability_id)
    .bind(project_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("vulnerability {vulnerability_id} not found")))?;

    let finding = sqlx::query_as::<_, VulnerabilityFinding>(
        "SELECT * FROM vulnerability_findings WHERE vulnerability_id = $1",
    )
    .bind(vulnerability_id)
    .fetch_optional(pool)
    .await?;

    Ok(VulnerabilityDetail {
        vulnerability,
        finding,
    })
}

/// Apply a triage state transition.
///
/// The row is locked for the duration so concurrent triage serializes; an
/// off-graph transition is a validation error. Dismissing also records the
/// dismissal feedback row inside the same transaction, so the state survives
/// the next reconcile of the finding.
pub async fn transition(
    pool: &PgPool,
    project_id: Uuid,
    vulnerability_id: Uuid,
    request: &TransitionRequest,
) -> Result<Vulnerability, AppError> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, Vulnerability>(
        "SELECT * FROM vulnerabilities WHERE id = $1 AND project_id = $2 FOR UPDATE",
    )
    .bind(vulnerability_id)
    .bind(project_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("vulnerability {vulnerability_id} not found")))?;

    if !current.state.can_transition_to(request.state) {
        return Err(AppError::Validation(format!(
            "cannot transition vulnerability from {:?} to {:?}",
            current.state, request.state
        )));
    }

    let updated = sqlx::query_as::<_, Vulnerability>(
        r#"
        UPDATE vulnerabilities SET state = $1, updated_at = NOW()
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(request.state)
    .bind(vulnerability_id)
    .fetch_one(&mut *tx)
    .await?;

    if request.state == VulnerabilityState::Dismissed {
        feedback::find_or_create(
            &mut *tx,
            project_id,
            &CreateFeedback {
                project_fingerprint: updated.project_fingerprint.clone(),
                feedback_type: FeedbackType::Dismissal,
                author: request.author.clone(),
                comment: request.comment.clone(),
                issue_ref: None,
                merge_request_ref: None,
            },
        )
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        project_id = %project_id,
        vulnerability_id = %vulnerability_id,
        from = ?current.state,
        to = ?request.state,
        "Vulnerability state transitioned"
    );

    Ok(updated)
}
