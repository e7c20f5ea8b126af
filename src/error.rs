use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::services::gate::GateDecision;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// An upstream HTTP error (identity provider or device service).
    #[error("Upstream HTTP error: {0}")]
    UpstreamHttp(#[from] reqwest::Error),

    /// A failed authorization-code exchange.
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// A failed ID-token verification.
    #[error("Token verification failed: {0}")]
    TokenVerification(String),

    /// An authentication error.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Access blocked by the device-health gate.
    #[error("Device gate blocked the request")]
    GateBlocked(GateDecision),

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A device-service error.
    #[error("Device service error: {0}")]
    DeviceService(String),

    /// The device service reports its inventory feature switched off.
    #[error("Device service feature disabled")]
    DeviceServiceDisabled,

    /// A required external service is not configured.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::UpstreamHttp(ref e) => {
                tracing::error!("Upstream HTTP error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("Upstream request failed"),
                )
            }

            AppError::TokenExchange(ref msg) => {
                tracing::error!("Token exchange failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("Login callback failed"),
                )
            }

            AppError::TokenVerification(ref msg) => {
                tracing::error!("Token verification failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("Login callback failed"),
                )
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, error_body(msg))
            }

            AppError::GateBlocked(ref decision) => {
                tracing::warn!(
                    "❌ Device gate blocked request: {} unhealthy device(s)",
                    decision.unhealthy.len()
                );
                let body = sonic_rs::to_string(decision)
                    .unwrap_or_else(|_| r#"{"allow":false}"#.to_string());
                (StatusCode::FORBIDDEN, body)
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, error_body("Resource not found"))
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, error_body(msg))
            }

            AppError::DeviceService(ref msg) => {
                tracing::error!("Device service error: {}", msg);
                (StatusCode::BAD_GATEWAY, error_body("Device service error"))
            }

            AppError::DeviceServiceDisabled => {
                tracing::info!("Device service feature disabled");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    error_body("Device service feature disabled"),
                )
            }

            AppError::ServiceUnavailable(ref msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, error_body(msg))
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("Internal server error"),
                )
            }
        };

        (status, body).into_response()
    }
}

/// Renders the standard JSON error body.
fn error_body(message: &str) -> String {
    sonic_rs::to_string(&sonic_rs::json!({
        "error": message
    }))
    .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string())
}
