use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::auth::TokenError;

/// Unified application error type for the request path.
///
/// Every variant maps to exactly one client-visible status code and error
/// string; metering-side failures never surface here (they are logged and
/// retried out-of-band).
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Missing x-api-key header")]
    MissingApiKey,

    #[error("Invalid or expired token")]
    InvalidToken(#[source] TokenError),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Billing service unavailable")]
    BillingUnavailable,

    #[error("Failed to reach Anthropic API")]
    UpstreamUnreachable(#[source] reqwest::Error),
}

/// Error response body: `{"error": "...", "details": "..."}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingApiKey | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
            Self::BillingUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::InvalidToken(source) => Some(source.to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
            details: self.details(),
        };
        (status, axum::Json(body)).into_response()
    }
}
