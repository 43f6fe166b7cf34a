//! Feedback: durable record of human or automated triage action, keyed by
//! project fingerprint so it survives re-scans of the underlying finding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "feedback_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Dismissal,
    Issue,
    MergeRequest,
}

/// A feedback row. Never overwritten once created; re-application checks for
/// an existing row of the same type before creating another.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Feedback {
    pub id: Uuid,
    pub project_id: Uuid,
    pub project_fingerprint: String,
    pub feedback_type: FeedbackType,
    pub author: String,
    pub comment: Option<String>,
    pub issue_ref: Option<String>,
    pub merge_request_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a feedback row.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFeedback {
    pub project_fingerprint: String,
    pub feedback_type: FeedbackType,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub issue_ref: Option<String>,
    #[serde(default)]
    pub merge_request_ref: Option<String>,
}

fn default_author() -> String {
    "system".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_type_serialization() {
        assert_eq!(
            serde_json::to_string(&FeedbackType::MergeRequest).unwrap(),
            "\"merge_request\""
        );
        let ft: FeedbackType = serde_json::from_str("\"dismissal\"").unwrap();
        assert_eq!(ft, FeedbackType::Dismissal);
    }

    #[test]
    fn create_feedback_defaults_author() {
        let cf: CreateFeedback = serde_json::from_value(serde_json::json!({
            "project_fingerprint": "abc",
            "feedback_type": "dismissal"
        }))
        .unwrap();
        assert_eq!(cf.author, "system");
        assert!(cf.comment.is_none());
    }
}
