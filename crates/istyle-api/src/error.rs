//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Lifecycle rejections from `istyle-state` keep their own machine-readable
//! code and carry the transaction context in `details`. Internal error
//! details are never returned to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use istyle_market::{MarketError, ProofStorageError};
use istyle_state::{ErrorKind, TransactionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. `NOT_FOUND`, `INVALID_TRANSITION`).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Transaction context for lifecycle rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Upload exceeds the accepted size (413).
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// The transaction lifecycle rejected the request.
    #[error(transparent)]
    Lifecycle(TransactionError),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            Self::Lifecycle(err) => {
                let status = match err.kind() {
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                    ErrorKind::InvalidTransition | ErrorKind::AlreadyRated => StatusCode::CONFLICT,
                    ErrorKind::PreconditionFailed => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, err.code())
            }
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        let Self::Lifecycle(err) = self else {
            return None;
        };
        match err {
            TransactionError::InvalidTransition {
                status,
                action,
                role,
                ..
            } => Some(serde_json::json!({
                "status": status,
                "action": action,
                "role": role,
            })),
            TransactionError::Forbidden { action, role, .. } => Some(serde_json::json!({
                "action": action,
                "role": role,
            })),
            TransactionError::PreconditionFailed { action, .. } => {
                Some(serde_json::json!({ "action": action }))
            }
            TransactionError::ListingUnavailable { listing_id, .. } => {
                Some(serde_json::json!({ "listing_id": listing_id }))
            }
            TransactionError::AlreadyRated { transaction_id } => {
                Some(serde_json::json!({ "transaction_id": transaction_id }))
            }
            TransactionError::InvalidRating { score } => {
                Some(serde_json::json!({ "score": score, "min": 1, "max": 5 }))
            }
            TransactionError::NotFound { .. } => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<istyle_core::ValidationError> for AppError {
    fn from(err: istyle_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<TransactionError> for AppError {
    fn from(err: TransactionError) -> Self {
        Self::Lifecycle(err)
    }
}

impl From<ProofStorageError> for AppError {
    fn from(err: ProofStorageError) -> Self {
        match err {
            ProofStorageError::Empty | ProofStorageError::UnsupportedType(_) => {
                Self::Validation(err.to_string())
            }
            ProofStorageError::TooLarge { .. } => Self::PayloadTooLarge(err.to_string()),
            ProofStorageError::Io(_) | ProofStorageError::Reference(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<MarketError> for AppError {
    fn from(err: MarketError) -> Self {
        match err {
            MarketError::Transaction(e) => e.into(),
            MarketError::NotListingOwner { .. } => Self::Forbidden(err.to_string()),
            MarketError::Validation(e) => e.into(),
            MarketError::Proof(e) => e.into(),
            MarketError::Store(e) => Self::Internal(e.to_string()),
        }
    }
}
