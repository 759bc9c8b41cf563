use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Typed reasons a bearer credential can be rejected at the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("Missing credential")]
    MissingCredential,
    #[error("Credential expired")]
    Expired,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Authentication failed")]
    Invalid,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Forbidden: {0}")]
    Authorization(String),
    #[error("Not found")]
    NotFound,
    #[error("Daily limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("Message rejected: {0}")]
    SpamRejected(String),
    #[error(transparent)]
    Authentication(#[from] AuthFailure),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Internal server error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Stable machine-readable code, used on the socket error surface.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Database(_) | Self::Internal => "internal_error",
            Self::Validation(_) => "validation_error",
            Self::Authorization(_) => "authorization_error",
            Self::NotFound => "not_found",
            Self::LimitExceeded(_) => "limit_exceeded",
            Self::SpamRejected(_) => "spam_rejected",
            Self::Authentication(_) => "authentication_error",
            Self::RateLimited => "rate_limited",
        }
    }

    /// Message safe to show to a client. Infrastructure detail stays in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            Self::Validation(msg) => {
                tracing::debug!(message = %msg, "Validation failed");
                (StatusCode::BAD_REQUEST, msg)
            }
            Self::Authorization(msg) => {
                tracing::debug!(message = %msg, "Authorization failed");
                (StatusCode::FORBIDDEN, msg)
            }
            Self::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Not found".to_string())
            }
            Self::LimitExceeded(msg) => {
                tracing::debug!(message = %msg, "Quota exhausted");
                (StatusCode::TOO_MANY_REQUESTS, msg)
            }
            Self::SpamRejected(reason) => {
                tracing::info!(reason = %reason, "Message rejected as spam");
                (StatusCode::UNPROCESSABLE_ENTITY, format!("Message rejected: {reason}"))
            }
            Self::Authentication(failure) => {
                tracing::debug!(failure = %failure, "Authentication failed");
                (StatusCode::UNAUTHORIZED, failure.to_string())
            }
            Self::RateLimited => {
                tracing::debug!("Rate limit exceeded");
                (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded".to_string())
            }
            Self::Internal => {
                tracing::error!("Internal server error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
