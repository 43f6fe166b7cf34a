//! Unified error handling with consistent API response envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Error detail in the API response envelope.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// Consistent JSON envelope for all API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Wrap a successful result in the envelope.
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            data: Some(data),
            error: None,
        })
    }
}

/// Application error type.
///
/// Finding-, report-, and vulnerability-scoped variants are recovered where
/// they occur and aggregated into result structures; only the webhook-facing
/// variants and systemic failures surface as HTTP errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A single malformed finding; skipped, batch continues.
    #[error("Invalid finding: {0}")]
    InvalidFinding(String),

    /// One report type's artifact failed to parse; siblings continue.
    #[error("Report parse error: {0}")]
    ReportParse(String),

    /// A remediation diff did not apply cleanly.
    #[error("Patch conflict: {0}")]
    PatchConflict(String),

    /// The merge-request backend rejected a creation attempt.
    #[error("Merge request creation failed: {0}")]
    MergeRequestCreation(String),

    /// Alert webhook body exceeds the configured ceiling.
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Alert webhook body fails the shape/version allow-list.
    #[error("Unprocessable payload: {0}")]
    Unprocessable(String),

    /// Alert webhook bearer token did not match any configured source.
    #[error("Unauthorized")]
    Unauthorized,

    /// A unique-constraint violation that escaped an upsert's conflict
    /// handling, e.g. concurrent scan registration for the same pipeline.
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::StorageConflict(
                db.constraint().unwrap_or("unique constraint").to_string(),
            ),
            _ => Self::Database(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::PayloadTooLarge(_) => (
                StatusCode::BAD_REQUEST,
                "PAYLOAD_TOO_LARGE",
                self.to_string(),
            ),
            AppError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE",
                msg.clone(),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) | AppError::ReportParse(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::InvalidFinding(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_FINDING", msg.clone())
            }
            AppError::PatchConflict(msg) => (StatusCode::CONFLICT, "PATCH_CONFLICT", msg.clone()),
            AppError::MergeRequestCreation(msg) | AppError::StorageConflict(msg) => {
                (StatusCode::CONFLICT, "CONFLICT", msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()> {
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message,
            }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_response_success() {
        let response = ApiResponse::success("ok");
        let json = serde_json::to_value(&response.0).unwrap();
        assert_eq!(json["data"], "ok");
        assert!(json["error"].is_null());
    }

    #[test]
    fn error_display() {
        let err = AppError::InvalidFinding("missing location".to_string());
        assert_eq!(err.to_string(), "Invalid finding: missing location");

        let err = AppError::PayloadTooLarge(2048);
        assert_eq!(err.to_string(), "Payload too large: 2048 bytes");
    }

    #[test]
    fn non_unique_violations_stay_database_errors() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::Database(_)));
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, AppError::Database(_)));
    }

    #[test]
    fn storage_conflict_names_the_constraint() {
        let err = AppError::StorageConflict("uq_scan_per_report".to_string());
        assert_eq!(err.to_string(), "Storage conflict: uq_scan_per_report");
    }
}
