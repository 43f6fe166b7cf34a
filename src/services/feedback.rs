//! Feedback persistence and re-application.
//!
//! Feedback rows are the durable source of truth for triage: a vulnerability's
//! `dismissed` state is a projection re-applied from its dismissal feedback on
//! every reconcile, so human decisions survive churn in scanner output.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::feedback::{CreateFeedback, Feedback, FeedbackType};

/// Outcome of an idempotent feedback upsert, distinguishing a fresh insert
/// from an already-existing row.
#[derive(Debug)]
pub enum FindOrCreate {
    Created(Feedback),
    Found(Feedback),
}

impl FindOrCreate {
    pub fn into_inner(self) -> Feedback {
        match self {
            Self::Created(f) | Self::Found(f) => f,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Re-apply dismissal feedback onto reconciled vulnerabilities.
///
/// Transitions `detected -> dismissed` for every fingerprint in the set that
/// has a dismissal feedback row. Runs on the reconciler's transaction so a
/// newly created vulnerability is never visible in a briefly un-dismissed
/// window. Returns the number of vulnerabilities transitioned.
pub async fn apply_dismissals(
    conn: &mut PgConnection,
    project_id: Uuid,
    fingerprints: &[String],
) -> Result<u64, AppError> {
    if fingerprints.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        r#"
        UPDATE vulnerabilities v
        SET state = 'dismissed', updated_at = NOW()
        FROM feedback f
        WHERE v.project_id = $1
          AND v.project_fingerprint = ANY($2)
          AND v.state = 'detected'
          AND f.project_id = v.project_id
          AND f.project_fingerprint = v.project_fingerprint
          AND f.feedback_type = 'dismissal'
        "#,
    )
    .bind(project_id)
    .bind(fingerprints)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Idempotent upsert by natural key (project, fingerprint, type).
///
/// A concurrent insert of the same key loses the `ON CONFLICT` race and comes
/// back as `Found`, never as an error.
pub async fn find_or_create(
    conn: &mut PgConnection,
    project_id: Uuid,
    input: &CreateFeedback,
) -> Result<FindOrCreate, AppError> {
    let inserted = sqlx::query_as::<_, Feedback>(
        r#"
        INSERT INTO feedback
            (project_id, project_fingerprint, feedback_type, author, comment, issue_ref, merge_request_ref)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT ON CONSTRAINT uq_feedback_identity DO NOTHING
        RETURNING *
        "#,
    )
    .bind(project_id)
    .bind(&input.project_fingerprint)
    .bind(input.feedback_type)
    .bind(&input.author)
    .bind(&input.comment)
    .bind(&input.issue_ref)
    .bind(&input.merge_request_ref)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(feedback) = inserted {
        return Ok(FindOrCreate::Created(feedback));
    }

    let existing = find(&mut *conn, project_id, &input.project_fingerprint, input.feedback_type)
        .await?
        .ok_or_else(|| {
            AppError::Internal("feedback vanished between conflict and reload".to_string())
        })?;
    Ok(FindOrCreate::Found(existing))
}

/// Look up a feedback row by its natural key.
pub async fn find(
    conn: &mut PgConnection,
    project_id: Uuid,
    fingerprint: &str,
    feedback_type: FeedbackType,
) -> Result<Option<Feedback>, AppError> {
    let feedback = sqlx::query_as::<_, Feedback>(
        r#"
        SELECT * FROM feedback
        WHERE project_id = $1 AND project_fingerprint = $2 AND feedback_type = $3
        "#,
    )
    .bind(project_id)
    .bind(fingerprint)
    .bind(feedback_type)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(feedback)
}

/// List feedback for a project, newest first.
pub async fn list(pool: &PgPool, project_id: Uuid) -> Result<Vec<Feedback>, AppError> {
    let rows = sqlx::query_as::<_, Feedback>(
        "SELECT * FROM feedback WHERE project_id = $1 ORDER BY created_at DESC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample(feedback_type: FeedbackType) -> Feedback {
        Feedback {
            id: Uuid::nil(),
            project_id: Uuid::nil(),
            project_fingerprint: "fp".to_string(),
            feedback_type,
            author: "system".to_string(),
            comment: None,
            issue_ref: None,
            merge_request_ref: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn find_or_create_unwraps_both_arms() {
        let created = FindOrCreate::Created(sample(FeedbackType::MergeRequest));
        assert!(created.was_created());
        assert_eq!(
            created.into_inner().feedback_type,
            FeedbackType::MergeRequest
        );

        let found = FindOrCreate::Found(sample(FeedbackType::Dismissal));
        assert!(!found.was_created());
        assert_eq!(found.into_inner().feedback_type, FeedbackType::Dismissal);
    }
}
