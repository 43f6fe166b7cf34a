//! Ephemeral scanner-report types shared across all report categories.
//!
//! A `ReportFinding` is produced fresh on every scan and is never persisted
//! directly; reconciliation maps it into a durable vulnerability + finding
//! pair or skips it when invalid.

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

// -- Enums matching PostgreSQL --

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[sqlx(type_name = "report_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Sast,
    Dast,
    DependencyScanning,
    ContainerScanning,
    SecretDetection,
    CoverageFuzzing,
    ApiFuzzing,
}

impl ReportType {
    /// Stable string form used in fingerprint input and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sast => "sast",
            Self::Dast => "dast",
            Self::DependencyScanning => "dependency_scanning",
            Self::ContainerScanning => "container_scanning",
            Self::SecretDetection => "secret_detection",
            Self::CoverageFuzzing => "coverage_fuzzing",
            Self::ApiFuzzing => "api_fuzzing",
        }
    }
}

impl std::fmt::Display for ReportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity reported by the scanner, normalized to a fixed scale.
///
/// Variant order is the comparison order: `Critical` compares greatest, so
/// duplicate-fingerprint collapse can keep the worst instance with `max_by`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[sqlx(type_name = "severity_level", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[sqlx(type_name = "confidence_level", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Ignore,
    Unknown,
    Experimental,
    Low,
    Medium,
    High,
    Confirmed,
}

impl Default for Confidence {
    fn default() -> Self {
        Self::Unknown
    }
}

// -- Finding components --

/// A scanner-assigned identifier (CWE, CVE, rule id, ...).
///
/// The first identifier in a finding is the primary one and anchors the
/// project fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub id_type: String,
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub external_id: Option<String>,
}

/// The scanner that produced a finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scanner {
    pub name: String,
    #[serde(default)]
    pub vendor: String,
}

/// Where a finding sits, per report category.
///
/// Each variant carries the fields its category needs for a stable location
/// fingerprint. Unknown shapes fail deserialization and surface as a parse
/// error for the whole report, not a panic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    /// SAST and secret-detection: file plus line span.
    File {
        file: String,
        #[serde(default)]
        start_line: Option<u32>,
        #[serde(default)]
        end_line: Option<u32>,
    },
    /// Dependency scanning: package coordinates within a lockfile.
    Dependency {
        #[serde(default)]
        file: Option<String>,
        package: String,
        version: String,
    },
    /// Container scanning: image plus affected OS package.
    Image {
        image: String,
        #[serde(default)]
        operating_system: Option<String>,
        #[serde(default)]
        package: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    /// DAST and API fuzzing: request coordinates.
    Url {
        #[serde(default)]
        hostname: Option<String>,
        path: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        param: Option<String>,
    },
    /// Coverage fuzzing: crash classification.
    Crash {
        crash_type: String,
        #[serde(default)]
        crash_state: Option<String>,
    },
}

/// A machine-applicable fix attached by the scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Remediation {
    pub summary: String,
    /// Unified diff against the affected file.
    pub diff: String,
}

/// One reported issue instance from one scan of one report type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFinding {
    pub title: String,
    pub severity: Severity,
    #[serde(default)]
    pub confidence: Confidence,
    pub identifiers: Vec<Identifier>,
    pub location: Location,
    pub scanner: Scanner,
    #[serde(default)]
    pub raw_metadata: serde_json::Value,
    #[serde(default)]
    pub remediation: Option<Remediation>,
}

impl ReportFinding {
    /// The primary identifier, when the scanner supplied any.
    pub fn primary_identifier(&self) -> Option<&Identifier> {
        self.identifiers.first()
    }
}

/// A single report artifact attached to a pipeline, one per report type.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportArtifact {
    pub report_type: ReportType,
    /// Raw artifact body; parsed per report type so one malformed artifact
    /// cannot block sibling report types.
    pub findings: serde_json::Value,
}

impl ReportArtifact {
    /// Parse the artifact body into findings.
    pub fn parse(&self) -> Result<Vec<ReportFinding>, AppError> {
        serde_json::from_value(self.findings.clone()).map_err(|e| {
            AppError::ReportParse(format!("{} report: {e}", self.report_type))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_type_round_trip() {
        let rt: ReportType = serde_json::from_str("\"dependency_scanning\"").unwrap();
        assert_eq!(rt, ReportType::DependencyScanning);
        assert_eq!(rt.to_string(), "dependency_scanning");
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Unknown);
        assert!(Severity::Unknown > Severity::Info);
    }

    #[test]
    fn location_deserializes_tagged_variants() {
        let loc: Location = serde_json::from_value(serde_json::json!({
            "type": "file", "file": "app.rb", "start_line": 10
        }))
        .unwrap();
        assert_eq!(
            loc,
            Location::File {
                file: "app.rb".to_string(),
                start_line: Some(10),
                end_line: None,
            }
        );

        let loc: Location = serde_json::from_value(serde_json::json!({
            "type": "dependency", "package": "lodash", "version": "4.17.20"
        }))
        .unwrap();
        assert!(matches!(loc, Location::Dependency { .. }));
    }

    #[test]
    fn location_rejects_unknown_shape() {
        let result: Result<Location, _> = serde_json::from_value(serde_json::json!({
            "type": "registry", "key": "x"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn finding_primary_identifier_is_first() {
        let finding: ReportFinding = serde_json::from_value(serde_json::json!({
            "title": "Weak hash",
            "severity": "high",
            "identifiers": [
                {"type": "cwe", "name": "CWE-327", "value": "327"},
                {"type": "semgrep_id", "name": "weak-hash", "value": "weak-hash"}
            ],
            "location": {"type": "file", "file": "app.rb", "start_line": 10},
            "scanner": {"name": "semgrep", "vendor": "returntocorp"}
        }))
        .unwrap();
        assert_eq!(finding.primary_identifier().unwrap().name, "CWE-327");
        assert_eq!(finding.confidence, Confidence::Unknown);
        assert!(finding.remediation.is_none());
    }

    #[test]
    fn artifact_parse_error_names_report_type() {
        let artifact = ReportArtifact {
            report_type: ReportType::Sast,
            findings: serde_json::json!({"not": "an array"}),
        };
        let err = artifact.parse().unwrap_err();
        assert!(err.to_string().contains("sast report"));
    }

    #[test]
    fn artifact_parses_finding_list() {
        let artifact = ReportArtifact {
            report_type: ReportType::DependencyScanning,
            findings: serde_json::json!([{
                "title": "Prototype pollution in lodash",
                "severity": "critical",
                "confidence": "high",
                "identifiers": [{"type": "cve", "name": "CVE-2021-23337", "value": "CVE-2021-23337"}],
                "location": {"type": "dependency", "file": "package-lock.json", "package": "lodash", "version": "4.17.20"},
                "scanner": {"name": "gemnasium", "vendor": "gitlab"},
                "remediation": {"summary": "Upgrade lodash", "diff": ""}
            }]),
        };
        let findings = artifact.parse().unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(findings[0].remediation.is_some());
    }
}
