//! Pipeline-scoped security findings: a transient index into one report
//! artifact, used for paginated listing before or without reconciliation.
//! Rows are owned by their pipeline and garbage-collected with it.

use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::report::{Confidence, ReportType, Severity};

/// Security finding joined with its scan's report type for list views.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SecurityFindingEntry {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub report_type: ReportType,
    pub position: i32,
    pub title: String,
    pub severity: Severity,
    pub confidence: Confidence,
    pub project_fingerprint: String,
}
