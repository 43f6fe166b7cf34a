//! Finding reconciliation: maps ephemeral scan output onto durable
//! vulnerabilities by project fingerprint.
//!
//! Within one report the incoming findings are collapsed per fingerprint,
//! existing vulnerabilities are bulk-loaded in one query per chunk, and each
//! chunk is written in its own transaction together with dismissal
//! re-application. Reconciliation never transitions state on its own, and
//! findings missing from the new scan are left untouched.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::report::{ReportFinding, ReportType};
use crate::models::vulnerability::VulnerabilityState;
use crate::services::{feedback, fingerprint};

/// A finding that could not be fingerprinted; recorded and skipped so one bad
/// record cannot block the rest of the report.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFinding {
    pub index: usize,
    pub title: String,
    pub reason: String,
}

/// Summary of one reconcile call.
#[derive(Debug, Default, Serialize)]
pub struct ReconcileResult {
    pub created: usize,
    pub updated: usize,
    pub dismissals_reapplied: u64,
    pub skipped: Vec<SkippedFinding>,
}

/// A finding annotated with both fingerprints, ready for storage.
#[derive(Debug, Clone)]
pub struct KeyedFinding {
    pub project_fingerprint: String,
    pub location_fingerprint: String,
    pub finding: ReportFinding,
}

/// Reconcile one report's findings against the durable store.
pub async fn reconcile(
    pool: &PgPool,
    project_id: Uuid,
    report_type: ReportType,
    findings: &[ReportFinding],
    batch_size: usize,
) -> Result<ReconcileResult, AppError> {
    let (keyed, skipped) = key_findings(report_type, findings);
    let collapsed = collapse_duplicates(keyed);

    let mut result = ReconcileResult {
        skipped,
        ..Default::default()
    };

    // Bounded chunks keep transaction and lock spans short for pathologically
    // large reports.
    for chunk in collapsed.chunks(batch_size.max(1)) {
        let mut tx = pool.begin().await?;
        let fingerprints: Vec<String> = chunk
            .iter()
            .map(|k| k.project_fingerprint.clone())
            .collect();

        // One bulk lookup per chunk; per-finding lookups are forbidden.
        let existing: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, project_fingerprint FROM vulnerabilities
            WHERE project_id = $1 AND report_type = $2 AND project_fingerprint = ANY($3)
            "#,
        )
        .bind(project_id)
        .bind(report_type)
        .bind(&fingerprints)
        .fetch_all(&mut *tx)
        .await?;
        let existing: std::collections::HashMap<String, Uuid> = existing
            .into_iter()
            .map(|(id, fp)| (fp, id))
            .collect();

        for keyed in chunk {
            match existing.get(&keyed.project_fingerprint) {
                Some(&vulnerability_id) => {
                    update_vulnerability(&mut tx, vulnerability_id, keyed).await?;
                    result.updated += 1;
                }
                None => {
                    match create_vulnerability(&mut tx, project_id, report_type, keyed).await? {
                        Some(_) => result.created += 1,
                        None => {
                            // Lost a cross-pipeline race on the identity
                            // constraint: reload the winner and refresh it
                            // like any other update.
                            let winner: Uuid = sqlx::query_scalar(
                                r#"
                                SELECT id FROM vulnerabilities
                                WHERE project_id = $1 AND report_type = $2
                                  AND project_fingerprint = $3
                                "#,
                            )
                            .bind(project_id)
                            .bind(report_type)
                            .bind(&keyed.project_fingerprint)
                            .fetch_one(&mut *tx)
                            .await?;
                            update_vulnerability(&mut tx, winner, keyed).await?;
                            result.updated += 1;
                        }
                    }
                }
            }
            upsert_finding(&mut tx, project_id, report_type, keyed).await?;
        }

        result.dismissals_reapplied +=
            feedback::apply_dismissals(&mut *tx, project_id, &fingerprints).await?;

        tx.commit().await?;
    }

    tracing::debug!(
        project_id = %project_id,
        report_type = %report_type,
        created = result.created,
        updated = result.updated,
        skipped = result.skipped.len(),
        "Reconciled report"
    );

    Ok(result)
}

/// Compute both fingerprints for every incoming finding, collecting failures
/// as skips instead of aborting the batch.
pub fn key_findings(
    report_type: ReportType,
    findings: &[ReportFinding],
) -> (Vec<KeyedFinding>, Vec<SkippedFinding>) {
    let mut keyed = Vec::with_capacity(findings.len());
    let mut skipped = Vec::new();

    for (index, finding) in findings.iter().enumerate() {
        let fingerprints = fingerprint::project_fingerprint(
            report_type,
            &finding.identifiers,
            &finding.location,
        )
        .and_then(|project_fp| {
            fingerprint::location_fingerprint(&finding.location).map(|loc_fp| (project_fp, loc_fp))
        });

        match fingerprints {
            Ok((project_fingerprint, location_fingerprint)) => keyed.push(KeyedFinding {
                project_fingerprint,
                location_fingerprint,
                finding: finding.clone(),
            }),
            Err(e) => {
                tracing::warn!(
                    report_type = %report_type,
                    index,
                    title = %finding.title,
                    error = %e,
                    "Skipping invalid finding"
                );
                skipped.push(SkippedFinding {
                    index,
                    title: finding.title.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    (keyed, skipped)
}

/// Collapse duplicate fingerprints within one report, keeping the
/// highest-severity instance; ties keep the first-seen one.
pub fn collapse_duplicates(keyed: Vec<KeyedFinding>) -> Vec<KeyedFinding> {
    let mut out: Vec<KeyedFinding> = Vec::with_capacity(keyed.len());
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for candidate in keyed {
        match seen.get(&candidate.project_fingerprint) {
            Some(&slot) => {
                if candidate.finding.severity > out[slot].finding.severity {
                    out[slot] = candidate;
                }
            }
            None => {
                seen.insert(candidate.project_fingerprint.clone(), out.len());
                out.push(candidate);
            }
        }
    }

    out
}

/// Insert a new vulnerability in `detected` state. Returns the new id, or
/// `None` when a concurrent pipeline created the row first.
async fn create_vulnerability(
    tx: &mut Transaction<'_, Postgres>,
    project_id: Uuid,
    report_type: ReportType,
    keyed: &KeyedFinding,
) -> Result<Option<Uuid>, AppError> {
    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO vulnerabilities
            (project_id, report_type, state, title, severity, confidence, project_fingerprint)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT ON CONSTRAINT uq_vulnerability_identity DO NOTHING
        RETURNING id
        "#,
    )
    .bind(project_id)
    .bind(report_type)
    .bind(VulnerabilityState::Detected)
    .bind(&keyed.finding.title)
    .bind(keyed.finding.severity)
    .bind(keyed.finding.confidence)
    .bind(&keyed.project_fingerprint)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(inserted)
}

/// Refresh denormalized fields on an existing vulnerability. State is never
/// touched here.
async fn update_vulnerability(
    tx: &mut Transaction<'_, Postgres>,
    vulnerability_id: Uuid,
    keyed: &KeyedFinding,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE vulnerabilities
        SET severity = $1, confidence = $2, updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(keyed.finding.severity)
    .bind(keyed.finding.confidence)
    .bind(vulnerability_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Create or refresh the primary finding row behind a vulnerability. The
/// conflict path covers both the normal update flow and the lost-race create
/// flow with the same statement.
async fn upsert_finding(
    tx: &mut Transaction<'_, Postgres>,
    project_id: Uuid,
    report_type: ReportType,
    keyed: &KeyedFinding,
) -> Result<(), AppError> {
    let identifiers = serde_json::to_value(&keyed.finding.identifiers)
        .map_err(|e| AppError::Internal(format!("identifier serialization: {e}")))?;
    let location = serde_json::to_value(&keyed.finding.location)
        .map_err(|e| AppError::Internal(format!("location serialization: {e}")))?;
    let remediation = keyed
        .finding
        .remediation
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| AppError::Internal(format!("remediation serialization: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO vulnerability_findings
            (vulnerability_id, project_id, report_type, project_fingerprint,
             location_fingerprint, title, severity, confidence,
             scanner_name, scanner_vendor, identifiers, location, raw_metadata, remediation)
        SELECT v.id, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
        FROM vulnerabilities v
        WHERE v.project_id = $1 AND v.report_type = $2 AND v.project_fingerprint = $3
        ON CONFLICT ON CONSTRAINT uq_finding_identity DO UPDATE
        SET location_fingerprint = EXCLUDED.location_fingerprint,
            severity = EXCLUDED.severity,
            confidence = EXCLUDED.confidence,
            location = EXCLUDED.location,
            raw_metadata = EXCLUDED.raw_metadata,
            remediation = EXCLUDED.remediation,
            updated_at = NOW()
        "#,
    )
    .bind(project_id)
    .bind(report_type)
    .bind(&keyed.project_fingerprint)
    .bind(&keyed.location_fingerprint)
    .bind(&keyed.finding.title)
    .bind(keyed.finding.severity)
    .bind(keyed.finding.confidence)
    .bind(&keyed.finding.scanner.name)
    .bind(&keyed.finding.scanner.vendor)
    .bind(identifiers)
    .bind(location)
    .bind(&keyed.finding.raw_metadata)
    .bind(remediation)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::report::{Confidence, Identifier, Location, Scanner, Severity};

    fn finding(title: &str, identifier: &str, file: &str, line: u32, severity: Severity) -> ReportFinding {
        ReportFinding {
            title: title.to_string(),
            severity,
            confidence: Confidence::Unknown,
            identifiers: vec![Identifier {
                id_type: "cwe".to_string(),
                name: identifier.to_string(),
                value: identifier.to_string(),
                external_id: None,
            }],
            location: Location::File {
                file: file.to_string(),
                start_line: Some(line),
                end_line: None,
            },
            scanner: Scanner {
                name: "semgrep".to_string(),
                vendor: "returntocorp".to_string(),
            },
            raw_metadata: serde_json::Value::Null,
            remediation: None,
        }
    }

    #[test]
    fn keying_skips_invalid_findings_and_keeps_rest() {
        let mut bad = finding("bad", "CWE-1", "a.rb", 1, Severity::Low);
        bad.identifiers.clear();
        let findings = vec![
            finding("ok", "CWE-1", "a.rb", 1, Severity::Low),
            bad,
            finding("also ok", "CWE-2", "b.rb", 2, Severity::High),
        ];
        let (keyed, skipped) = key_findings(ReportType::Sast, &findings);
        assert_eq!(keyed.len(), 2);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].index, 1);
        assert_eq!(skipped[0].title, "bad");
        assert!(skipped[0].reason.contains("identifiers"));
    }

    #[test]
    fn collapse_keeps_highest_severity() {
        let findings = vec![
            finding("site a", "CWE-1", "a.rb", 1, Severity::Low),
            finding("site a again", "CWE-1", "a.rb", 7, Severity::Critical),
        ];
        let (keyed, _) = key_findings(ReportType::Sast, &findings);
        let collapsed = collapse_duplicates(keyed);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].finding.severity, Severity::Critical);
        assert_eq!(collapsed[0].finding.title, "site a again");
    }

    #[test]
    fn collapse_tie_break_keeps_first_seen() {
        let findings = vec![
            finding("first", "CWE-1", "a.rb", 1, Severity::High),
            finding("second", "CWE-1", "a.rb", 9, Severity::High),
        ];
        let (keyed, _) = key_findings(ReportType::Sast, &findings);
        let collapsed = collapse_duplicates(keyed);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].finding.title, "first");
    }

    #[test]
    fn collapse_preserves_distinct_fingerprints_in_order() {
        let findings = vec![
            finding("a", "CWE-1", "a.rb", 1, Severity::Low),
            finding("b", "CWE-2", "b.rb", 1, Severity::Low),
            finding("c", "CWE-3", "c.rb", 1, Severity::Low),
        ];
        let (keyed, _) = key_findings(ReportType::Sast, &findings);
        let collapsed = collapse_duplicates(keyed);
        let titles: Vec<_> = collapsed.iter().map(|k| k.finding.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[test]
    fn line_shift_same_key_different_location_fingerprint() {
        let (keyed, _) = key_findings(
            ReportType::Sast,
            &[
                finding("x", "CWE-1", "a.rb", 10, Severity::High),
                finding("x", "CWE-1", "a.rb", 12, Severity::High),
            ],
        );
        assert_eq!(keyed[0].project_fingerprint, keyed[1].project_fingerprint);
        assert_ne!(keyed[0].location_fingerprint, keyed[1].location_fingerprint);
    }
}
