use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::events::EventError;
use crate::notification::StoreError;
use crate::queue::QueueError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Request is well-formed but its content cannot be processed
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

/// Hide `detail` from clients in production, keep it in the log.
fn redacted(detail: String, public: &str) -> (String, String) {
    let client_msg = if is_production() {
        public.to_string()
    } else {
        detail.clone()
    };
    (client_msg, detail)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, (client_message, log_message)) = match &self {
            AppError::Auth(msg) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                (msg.clone(), msg.clone()),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                (msg.clone(), msg.clone()),
            ),
            AppError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE_ENTITY",
                (msg.clone(), msg.clone()),
            ),
            AppError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                (msg.clone(), msg.clone()),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                (msg.clone(), msg.clone()),
            ),
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                redacted(msg.clone(), "Service temporarily unavailable"),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                redacted(msg.clone(), "Internal server error"),
            ),
        };

        if status.is_server_error() {
            tracing::error!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API error"
            );
        } else {
            tracing::warn!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API request rejected"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(rejection.body_text())
        } else {
            AppError::Validation(rejection.body_text())
        }
    }
}

impl From<EventError> for AppError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::UnknownType(_) | EventError::InvalidData(_) => {
                AppError::Validation(err.to_string())
            }
            EventError::MissingField { .. } => AppError::Unprocessable(err.to_string()),
            EventError::Submission(inner) => AppError::from(inner),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::UnknownQueue(_) => AppError::Validation(err.to_string()),
            QueueError::Closed(_) | QueueError::Unavailable(_) | QueueError::Redis(_) => {
                AppError::ServiceUnavailable(err.to_string())
            }
            QueueError::InvalidPriority { .. } | QueueError::Serialization(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AppError::NotFound(err.to_string()),
            StoreError::Redis(_) | StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                AppError::ServiceUnavailable(err.to_string())
            }
            StoreError::Serialization(_) => AppError::Internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
