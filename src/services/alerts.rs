//! Alert webhook ingestion gateway.
//!
//! Single-pass validation pipeline over Alertmanager-shaped payloads: size
//! ceiling, strict shape/version allow-list, constant-time bearer-token check,
//! then per-alert dispatch. Dispatch is fire-and-continue: one alert's
//! processing failure never blocks its siblings, and the request succeeds once
//! dispatch has run.

use serde::Serialize;
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::errors::AppError;

/// The only payload version this gateway accepts.
pub const SUPPORTED_VERSION: &str = "4";

/// Strict allow-list of required top-level keys.
const REQUIRED_KEYS: [&str; 9] = [
    "version",
    "groupKey",
    "status",
    "receiver",
    "groupLabels",
    "commonLabels",
    "commonAnnotations",
    "externalURL",
    "alerts",
];

/// The three configured token sources. At most one needs to match; a source
/// with no configured token only matches a request that also sends none.
#[derive(Debug, Clone, Default)]
pub struct AlertTokens {
    pub manual: Option<String>,
    pub endpoint: Option<String>,
    pub managed: Option<String>,
}

/// Load a project's alert token configuration.
pub async fn load_tokens(pool: &PgPool, project_id: Uuid) -> Result<AlertTokens, AppError> {
    let row: Option<(Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT alert_manual_token, alert_endpoint_token, alert_managed_token
        FROM projects WHERE id = $1
        "#,
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    let (manual, endpoint, managed) =
        row.ok_or_else(|| AppError::NotFound(format!("project {project_id} not found")))?;
    Ok(AlertTokens {
        manual,
        endpoint,
        managed,
    })
}

/// Downstream alert handler; external collaborator to this gateway.
pub trait AlertProcessor {
    fn process(
        &self,
        project_id: Uuid,
        alert: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send;
}

/// Default processor: records each alert as an event row.
#[derive(Debug, Clone)]
pub struct DbAlertProcessor {
    pool: PgPool,
}

impl DbAlertProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AlertProcessor for DbAlertProcessor {
    async fn process(&self, project_id: Uuid, alert: &serde_json::Value) -> Result<(), AppError> {
        let status = alert
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("firing");
        let title = alert
            .pointer("/annotations/title")
            .or_else(|| alert.pointer("/labels/alertname"))
            .and_then(|v| v.as_str())
            .unwrap_or("(untitled alert)");

        sqlx::query(
            "INSERT INTO alert_events (project_id, status, title, payload) VALUES ($1, $2, $3, $4)",
        )
        .bind(project_id)
        .bind(status)
        .bind(title)
        .bind(alert)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Dispatch summary; individual alert failures do not fail the call.
#[derive(Debug, Serialize)]
pub struct AlertIngestResult {
    pub dispatched: usize,
    pub failed: usize,
}

/// Run the full ingestion pipeline for one webhook call.
pub async fn ingest<P: AlertProcessor>(
    body: &[u8],
    bearer: Option<&str>,
    tokens: &AlertTokens,
    max_payload_bytes: usize,
    project_id: Uuid,
    processor: &P,
) -> Result<AlertIngestResult, AppError> {
    // 1. Size ceiling, before any parsing or auth.
    if body.len() > max_payload_bytes {
        return Err(AppError::PayloadTooLarge(body.len()));
    }

    // 2. Shape and version allow-list.
    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::Unprocessable(format!("invalid JSON: {e}")))?;
    let alerts = validate_shape(&payload)?;

    // 3. Token check, constant-time.
    if !token_authorized(tokens, bearer) {
        return Err(AppError::Unauthorized);
    }

    // 4. Per-alert dispatch.
    let mut result = AlertIngestResult {
        dispatched: 0,
        failed: 0,
    };
    for alert in alerts {
        match processor.process(project_id, alert).await {
            Ok(()) => result.dispatched += 1,
            Err(e) => {
                tracing::warn!(project_id = %project_id, error = %e, "Alert processing failed");
                result.failed += 1;
            }
        }
    }
    Ok(result)
}

/// Validate the fixed key-set and supported version, returning the alert list.
pub fn validate_shape(payload: &serde_json::Value) -> Result<&Vec<serde_json::Value>, AppError> {
    let object = payload
        .as_object()
        .ok_or_else(|| AppError::Unprocessable("payload is not an object".to_string()))?;

    for key in REQUIRED_KEYS {
        if !object.contains_key(key) {
            return Err(AppError::Unprocessable(format!("missing key: {key}")));
        }
    }

    let version = object.get("version").and_then(|v| v.as_str()).unwrap_or("");
    if version != SUPPORTED_VERSION {
        return Err(AppError::Unprocessable(format!(
            "unsupported version: {version:?}"
        )));
    }

    object
        .get("alerts")
        .and_then(|v| v.as_array())
        .ok_or_else(|| AppError::Unprocessable("alerts is not an array".to_string()))
}

/// Check the inbound bearer token against the three configured sources.
///
/// A configured source matches on constant-time equality; an unconfigured
/// source matches only a tokenless request.
pub fn token_authorized(tokens: &AlertTokens, bearer: Option<&str>) -> bool {
    [&tokens.manual, &tokens.endpoint, &tokens.managed]
        .into_iter()
        .any(|source| source_matches(source.as_deref(), bearer))
}

fn source_matches(configured: Option<&str>, bearer: Option<&str>) -> bool {
    match (configured, bearer) {
        (Some(expected), Some(provided)) => {
            expected.as_bytes().ct_eq(provided.as_bytes()).into()
        }
        (None, None) => true,
        _ => false,
    }
}
