//! # API Error Type
//!
//! Unified error type for HTTP handlers.
//!
//! ## Error Handling Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in Tessera                                │
//! │                                                                         │
//! │  Handler                                                                │
//! │  Result<T, ApiError>                                                    │
//! │         │                                                               │
//! │         ├── BindingError ──────────────► 400 BAD_REQUEST               │
//! │         ├── WhitelistViolation ────────► 400 BAD_REQUEST               │
//! │         ├── DbError::NotFound ─────────► 404 NOT_FOUND                 │
//! │         ├── constraint violations ─────► 400 BAD_REQUEST               │
//! │         └── pool / SQL / transaction ──► 500 DATABASE_ERROR            │
//! │                                                                         │
//! │  into_response() tags the response with RecordedError, which the      │
//! │  transaction middleware reads to decide on rollback.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Store failures are logged in full and answered with a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tessera_core::{BindingError, CoreError, SchemaError};
use tessera_db::DbError;
use thiserror::Error;
use tracing::{debug, error};

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error body sent to clients.
///
/// ```json
/// {
///   "code": "NOT_FOUND",
///   "message": "Record not found"
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,

    /// Machine-readable error code
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Unusable payload or rejected write (400)
    BadRequest,

    /// Resource not found (404)
    NotFound,

    /// Database operation failed (500)
    DatabaseError,

    /// Internal server error (500)
    Internal,
}

/// Response extension marking a failed request.
#[derive(Debug, Clone, Copy)]
pub struct RecordedError;

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, ErrorCode::BadRequest, message)
    }

    pub fn not_found() -> Self {
        ApiError::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, "Record not found")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal, message)
    }

    fn database() -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::DatabaseError,
            "Database operation failed",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(&self)).into_response();
        response.extensions_mut().insert(RecordedError);
        response
    }
}

impl From<BindingError> for ApiError {
    fn from(err: BindingError) -> Self {
        debug!(error = %err, "Rejected request payload");
        // parser output carries positions and internals; keep it in the log
        match err {
            BindingError::MalformedJson(_) => ApiError::bad_request("Malformed JSON body"),
            BindingError::MalformedForm(_) => ApiError::bad_request("Malformed form body"),
            other => ApiError::bad_request(other.to_string()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Binding(e) => ApiError::from(e),
            CoreError::WhitelistViolation { resource } => {
                debug!(%resource, "Update without updatable fields");
                ApiError::bad_request("No updatable fields in request")
            }
        }
    }
}

/// Converts database errors to API errors.
impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => {
                debug!(%entity, %id, "Record not found");
                ApiError::not_found()
            }
            DbError::Invalid(e) => ApiError::from(e),
            DbError::UniqueViolation { field, .. } => {
                debug!(%field, "Unique constraint violated");
                ApiError::bad_request("Duplicate value")
            }
            DbError::ForeignKeyViolation { message } | DbError::ConstraintViolation { message } => {
                debug!(%message, "Constraint violated");
                ApiError::bad_request("Constraint violation")
            }
            other => {
                // Log the actual error but return a generic message
                error!(error = %other, "Database operation failed");
                ApiError::database()
            }
        }
    }
}

// =============================================================================
// Startup Errors
// =============================================================================

/// Failures while bringing the resources up. Fatal, never per-request.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid resource declaration: {0}")]
    Schema(#[from] SchemaError),

    #[error("Resource bootstrap failed: {0}")]
    Database(#[from] DbError),
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(DbError::not_found("widget", 1)).status, StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(DbError::duplicate("users.username", "bob")).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::from(BindingError::EmptyIds).status, StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(CoreError::WhitelistViolation { resource: "widget".into() }).code,
            ErrorCode::BadRequest
        );

        let err = ApiError::from(DbError::QueryFailed("no such column: secret".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(!err.message.contains("secret"));
    }

    #[test]
    fn test_parser_detail_is_not_returned() {
        let err = ApiError::from(BindingError::MalformedJson(
            "expected value at line 1 column 7".into(),
        ));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Malformed JSON body");

        let err = ApiError::from(BindingError::coercion("stock", "integer", "\"lots\""));
        assert!(err.message.contains("stock"));
    }

    #[test]
    fn test_response_is_marked_as_error() {
        let response = ApiError::not_found().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.extensions().get::<RecordedError>().is_some());
    }

    #[test]
    fn test_body_shape() {
        let body = serde_json::to_value(ApiError::not_found()).unwrap();
        assert_eq!(body, serde_json::json!({"code": "NOT_FOUND", "message": "Record not found"}));
    }
}
