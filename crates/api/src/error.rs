//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use engine::{CancelError, PlaceOrderError, ReconcileError};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Caller may not act on this resource.
    Forbidden(String),
    /// The request lost to a business rule; `reason` is machine-readable.
    Conflict {
        reason: &'static str,
        message: String,
    },
    /// Transient contention; the same request can be retried.
    Contention(String),
    /// Internal server error. The detail is logged, not returned.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => error_response(StatusCode::NOT_FOUND, message),
            ApiError::BadRequest(message) => error_response(StatusCode::BAD_REQUEST, message),
            ApiError::Forbidden(message) => error_response(StatusCode::FORBIDDEN, message),
            ApiError::Conflict { reason, message } => {
                let body = serde_json::json!({ "error": message, "reason": reason });
                (StatusCode::CONFLICT, axum::Json(body)).into_response()
            }
            ApiError::Contention(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(axum::http::header::RETRY_AFTER, "1")],
                axum::Json(serde_json::json!({ "error": message })),
            )
                .into_response(),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "internal server error");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        }
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    let body = serde_json::json!({ "error": message });
    (status, axum::Json(body)).into_response()
}

impl From<PlaceOrderError> for ApiError {
    fn from(err: PlaceOrderError) -> Self {
        match &err {
            PlaceOrderError::Validation(msg) => ApiError::BadRequest(msg.clone()),
            PlaceOrderError::SaleWindowClosed { .. } => ApiError::Conflict {
                reason: "sale_window_closed",
                message: err.to_string(),
            },
            PlaceOrderError::InsufficientStock { .. } => ApiError::Conflict {
                reason: "insufficient_stock",
                message: err.to_string(),
            },
            PlaceOrderError::IdempotencyConflict => ApiError::Conflict {
                reason: "idempotency_conflict",
                message: err.to_string(),
            },
            PlaceOrderError::RequestInFlight | PlaceOrderError::LockTimeout => {
                ApiError::Contention(err.to_string())
            }
            PlaceOrderError::UnknownProduct { .. } => ApiError::NotFound(err.to_string()),
            PlaceOrderError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match &err {
            ReconcileError::OrderNotFound(_) => ApiError::NotFound(err.to_string()),
            ReconcileError::Store(inner) if inner.is_retryable() => {
                ApiError::Contention(err.to_string())
            }
            ReconcileError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<CancelError> for ApiError {
    fn from(err: CancelError) -> Self {
        match &err {
            CancelError::NotFound(_) => ApiError::NotFound(err.to_string()),
            CancelError::WrongUser => ApiError::Forbidden(err.to_string()),
            CancelError::NotCancellable(_) => ApiError::Conflict {
                reason: "not_cancellable",
                message: err.to_string(),
            },
            CancelError::WindowClosed => ApiError::Conflict {
                reason: "cancel_window_closed",
                message: err.to_string(),
            },
            CancelError::Store(inner) if inner.is_retryable() => {
                ApiError::Contention(err.to_string())
            }
            CancelError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_retryable() {
            ApiError::Contention(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}
