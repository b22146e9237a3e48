//! Error types for the hub core, the broker bridge and the HTTP surface.
//!
//! [`HubError`] and [`BrokerError`] are library errors returned from the
//! hub and broker APIs. [`ApiError`] is the HTTP-facing error: each variant
//! maps to a status code and a structured JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Errors returned by [`crate::service::Hub`] operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The hub has been shut down and accepts no new work.
    #[error("hub is shut down")]
    Closed,

    /// A message payload could not be serialized.
    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a [`crate::broker::Broker`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Publishing to a topic failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Subscribing to a topic failed.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// Structured JSON error response body.
///
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "missing or invalid user identity",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// HTTP-facing error enum with status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category       | HTTP Status                 |
/// |-----------|----------------|-----------------------------|
/// | 1000–1999 | Identity       | 401 Unauthorized            |
/// | 3000–3999 | Server         | 500 / 503                   |
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No authenticated identity was attached to the request.
    #[error("missing or invalid user identity")]
    Unauthorized,

    /// The hub is shutting down and refuses new connections.
    #[error("server is shutting down")]
    ShuttingDown,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Unauthorized => 1001,
            Self::Internal(_) => 3000,
            Self::ShuttingDown => 3001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Closed => Self::ShuttingDown,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
