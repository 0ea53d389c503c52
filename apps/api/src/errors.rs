use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::flows::{FlowError, InvocationError, InvocationFailure};
use crate::schema::ValidationError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<FlowError> for AppError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::UnknownFlow(name) => AppError::NotFound(format!("Flow '{name}' not found")),
            FlowError::Validation(v) => AppError::Validation(v),
            FlowError::Invocation(i) => AppError::Invocation(i),
            FlowError::Template(t) => AppError::Internal(t.into()),
            FlowError::Encode(s) => AppError::Internal(s.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "error": { "code": "NOT_FOUND", "message": msg } }),
            ),
            AppError::Validation(v) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": {
                        "code": "VALIDATION_ERROR",
                        "message": v.to_string(),
                        "fields": v.fields(),
                        "violations": v.violations,
                    }
                }),
            ),
            AppError::Invocation(e) => {
                tracing::error!("Invocation error: {e}");
                let (status, code) = match e.reason {
                    InvocationFailure::Timeout(_) => {
                        (StatusCode::GATEWAY_TIMEOUT, "INVOCATION_TIMEOUT")
                    }
                    InvocationFailure::Cancelled => {
                        (StatusCode::SERVICE_UNAVAILABLE, "INVOCATION_CANCELLED")
                    }
                    _ => (StatusCode::BAD_GATEWAY, "INVOCATION_ERROR"),
                };
                (
                    status,
                    json!({
                        "error": {
                            "code": code,
                            "message": "Failed to generate a response. Please try again.",
                            "reason": e.reason.kind(),
                        }
                    }),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": {
                            "code": "INTERNAL_ERROR",
                            "message": "An internal server error occurred",
                        }
                    }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
