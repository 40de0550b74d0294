//! Error types shared by all services.
//!
//! Every failure the query engine can report is a variant of [`AppError`].
//! Variants carry plain strings so a single outcome can be cloned and handed
//! to several waiters.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::response::ApiResponse;

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

/// Application error enumeration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppError {
    /// External engine unreachable, authentication refused, or handshake failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Stored credential could not be decrypted (corrupt blob or wrong key).
    #[error("credential decryption failed: {0}")]
    Decryption(String),

    /// A referenced table does not exist on the target engine.
    #[error("table not found: {table}")]
    SchemaValidation { table: String },

    /// The engine rejected the statement. The message is the engine's own.
    #[error("{0}")]
    Execution(String),

    /// Commit or rollback against a transaction that is not active.
    #[error("no active transaction: {0}")]
    TransactionState(String),

    /// The reviewer already reviewed this approval request.
    #[error("already reviewed: reviewer {reviewer} on approval {approval_id}")]
    DuplicateReview {
        approval_id: String,
        reviewer: String,
    },

    /// The approval request has already left the pending state.
    #[error("approval {approval_id} is not pending (status: {status})")]
    NonPendingApproval { approval_id: String, status: String },

    /// Request input failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// An entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The metadata database failed.
    #[error("metadata store error: {0}")]
    MetadataStore(String),

    /// Unexpected internal state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Creates a not-found error for the given entity kind.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Decryption(_) => "DECRYPTION_ERROR",
            Self::SchemaValidation { .. } => "SCHEMA_VALIDATION_ERROR",
            Self::Execution(_) => "EXECUTION_ERROR",
            Self::TransactionState(_) => "TRANSACTION_STATE_ERROR",
            Self::DuplicateReview { .. } => "DUPLICATE_REVIEW",
            Self::NonPendingApproval { .. } => "NON_PENDING_APPROVAL",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Config(_) => "CONFIG_ERROR",
            Self::MetadataStore(_) => "METADATA_STORE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used when the error reaches the presentation layer.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::SchemaValidation { .. } | Self::Execution(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::TransactionState(_)
            | Self::DuplicateReview { .. }
            | Self::NonPendingApproval { .. } => StatusCode::CONFLICT,
            Self::Connection(_) => StatusCode::BAD_GATEWAY,
            Self::Decryption(_)
            | Self::Config(_)
            | Self::MetadataStore(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }
        let body = ApiResponse::err(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_validation_names_table() {
        let err = AppError::SchemaValidation {
            table: "orders".into(),
        };
        assert_eq!(err.to_string(), "table not found: orders");
        assert_eq!(err.code(), "SCHEMA_VALIDATION_ERROR");
    }

    #[test]
    fn test_execution_error_is_verbatim() {
        let err = AppError::Execution("relation \"x\" does not exist".into());
        assert_eq!(err.to_string(), "relation \"x\" does not exist");
    }

    #[test]
    fn test_transaction_state_is_distinct_from_execution() {
        let state = AppError::TransactionState("tx-1".into());
        assert_eq!(state.code(), "TRANSACTION_STATE_ERROR");
        assert_eq!(state.status_code(), StatusCode::CONFLICT);
        assert_ne!(state.code(), AppError::Execution("x".into()).code());
    }

    #[test]
    fn test_duplicate_review_message() {
        let err = AppError::DuplicateReview {
            approval_id: "a1".into(),
            reviewer: "bob".into(),
        };
        assert!(err.to_string().starts_with("already reviewed"));
    }
}
