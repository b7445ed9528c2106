//! Error types for Keyhole
//!
//! All per-request failures are converted to `AppError`,
//! which implements `IntoResponse` so that every handler error
//! ends up as an HTTP response instead of tearing down the task.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// Variants carrying a `String` keep the internal detail for logs.
/// The rendered page only ever shows the public message.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Callback `state` did not match the pinned anti-forgery token (400)
    #[error("State token mismatch")]
    StateMismatch,

    /// Authorization code exchange failed (502)
    #[error("OAuth exchange failed: {0}")]
    OAuthExchange(String),

    /// Session cookie failed verification, decryption or parsing (401)
    #[error("Session decode failed: {0}")]
    SessionDecode(String),

    /// Session values could not be serialized or sealed (500)
    #[error("Session encode failed: {0}")]
    SessionEncode(String),

    /// Provider account API failed or returned an unexpected shape (502)
    #[error("Upstream API error: {0}")]
    Upstream(String),

    /// Configuration error (500, fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// HTTP status, user-facing message and metric label for this error
    fn parts(&self) -> (StatusCode, String, &'static str) {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string(), "not_found"),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
                "unauthorized",
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "validation"),
            AppError::StateMismatch => (
                StatusCode::BAD_REQUEST,
                "Invalid or missing state parameter".to_string(),
                "state_mismatch",
            ),
            AppError::OAuthExchange(_) => (
                StatusCode::BAD_GATEWAY,
                "Could not complete sign-in with the provider".to_string(),
                "oauth_exchange",
            ),
            AppError::SessionDecode(_) => (
                StatusCode::UNAUTHORIZED,
                "Session is invalid".to_string(),
                "session_decode",
            ),
            AppError::SessionEncode(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not save session".to_string(),
                "session_encode",
            ),
            AppError::Upstream(_) => (
                StatusCode::BAD_GATEWAY,
                "The provider's account API returned an unusable response".to_string(),
                "upstream",
            ),
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server misconfigured".to_string(),
                "config",
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
            ),
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each variant to a status code and a small HTML error page.
    /// Internal details are logged, never rendered.
    fn into_response(self) -> Response {
        let (status, message, error_type) = self.parts();

        if status.is_server_error() {
            tracing::error!(error = %self, error_type, "Request failed");
        } else {
            tracing::warn!(error = %self, error_type, "Request rejected");
        }

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();

        let body = Html(format!(
            "<html><body><h1>{}</h1><p>{}</p><a href=\"/\">Back</a></body></html>",
            status.as_u16(),
            html_escape::encode_text(&message),
        ));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
