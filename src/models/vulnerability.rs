//! Durable vulnerability model and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::report::{Confidence, ReportType, Severity};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "vulnerability_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilityState {
    Detected,
    Confirmed,
    Dismissed,
    Resolved,
}

impl VulnerabilityState {
    /// Check whether a state transition follows the allowed graph.
    ///
    /// `Resolved` and `Dismissed` are reachable from any prior state;
    /// `Confirmed` only from `Detected`. Reconciliation itself never
    /// transitions state; only feedback re-application and explicit triage do.
    pub fn can_transition_to(&self, to: VulnerabilityState) -> bool {
        match to {
            VulnerabilityState::Dismissed | VulnerabilityState::Resolved => *self != to,
            VulnerabilityState::Confirmed => *self == VulnerabilityState::Detected,
            VulnerabilityState::Detected => false,
        }
    }
}

/// The durable, deduplicated entity representing a logical security issue
/// across scans. Created the first time a
/// (project, report_type, project_fingerprint) tuple is seen, never deleted
/// automatically.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Vulnerability {
    pub id: Uuid,
    pub project_id: Uuid,
    pub report_type: ReportType,
    pub state: VulnerabilityState,
    pub title: String,
    pub severity: Severity,
    pub confidence: Confidence,
    pub project_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The persisted finding backing a vulnerability.
///
/// `location_fingerprint` is recomputed every scan and may drift as code
/// moves; `project_fingerprint` must stay stable for the same logical issue.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VulnerabilityFinding {
    pub id: Uuid,
    pub vulnerability_id: Option<Uuid>,
    pub project_id: Uuid,
    pub report_type: ReportType,
    pub project_fingerprint: String,
    pub location_fingerprint: String,
    pub title: String,
    pub severity: Severity,
    pub confidence: Confidence,
    pub scanner_name: String,
    pub scanner_vendor: String,
    pub identifiers: serde_json::Value,
    pub location: serde_json::Value,
    pub raw_metadata: serde_json::Value,
    pub remediation: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dismissed_reachable_from_any_state() {
        for from in [
            VulnerabilityState::Detected,
            VulnerabilityState::Confirmed,
            VulnerabilityState::Resolved,
        ] {
            assert!(
                from.can_transition_to(VulnerabilityState::Dismissed),
                "expected {from:?} -> Dismissed to be valid"
            );
        }
    }

    #[test]
    fn resolved_reachable_from_any_state() {
        for from in [
            VulnerabilityState::Detected,
            VulnerabilityState::Confirmed,
            VulnerabilityState::Dismissed,
        ] {
            assert!(from.can_transition_to(VulnerabilityState::Resolved));
        }
    }

    #[test]
    fn confirmed_only_from_detected() {
        assert!(VulnerabilityState::Detected.can_transition_to(VulnerabilityState::Confirmed));
        assert!(!VulnerabilityState::Dismissed.can_transition_to(VulnerabilityState::Confirmed));
        assert!(!VulnerabilityState::Resolved.can_transition_to(VulnerabilityState::Confirmed));
    }

    #[test]
    fn no_transition_back_to_detected() {
        for from in [
            VulnerabilityState::Confirmed,
            VulnerabilityState::Dismissed,
            VulnerabilityState::Resolved,
        ] {
            assert!(!from.can_transition_to(VulnerabilityState::Detected));
        }
    }

    #[test]
    fn self_transitions_rejected() {
        assert!(!VulnerabilityState::Dismissed.can_transition_to(VulnerabilityState::Dismissed));
        assert!(!VulnerabilityState::Resolved.can_transition_to(VulnerabilityState::Resolved));
    }

    #[test]
    fn state_serialization() {
        let json = serde_json::to_string(&VulnerabilityState::Detected).unwrap();
        assert_eq!(json, "\"detected\"");
        let state: VulnerabilityState = serde_json::from_str("\"dismissed\"").unwrap();
        assert_eq!(state, VulnerabilityState::Dismissed);
    }
}
