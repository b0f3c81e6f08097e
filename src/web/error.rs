use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::provisioning::ProvisionError;
use crate::services::vault::CryptoError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("User already exists: {0}")]
    UserAlreadyExists(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Bot quota exceeded: plan allows {limit} bots")]
    QuotaExceeded { limit: u64 },
    #[error("Rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: i64 },
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Provisioning error: {0}")]
    Provision(ProvisionError),
    #[error("External service unavailable: {0}")]
    ExternalUnavailable(String),
    #[error("Password hashing failed: {0}")]
    PasswordHashingError(String),
    #[error("JWT creation failed: {0}")]
    TokenCreationError(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UserAlreadyExists(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::QuotaExceeded { limit } => (
                StatusCode::FORBIDDEN,
                format!("Bot quota exceeded: your plan allows {limit} bots. Delete a bot or upgrade."),
            ),
            AppError::RateLimited {
                retry_after_seconds,
            } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({
                        "error": "Too many requests",
                        "retryAfterSeconds": retry_after_seconds,
                    })),
                )
                    .into_response();
                if let Ok(value) = retry_after_seconds.to_string().parse() {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                return response;
            }
            // Infra failures: log the full detail here, hand the caller a
            // generic message.
            AppError::Crypto(e) => {
                error!(error = %e, "credential vault failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Provision(ProvisionError::Timeout { attempts }) => (
                StatusCode::BAD_GATEWAY,
                format!("Deployment did not become ready after {attempts} checks"),
            ),
            AppError::Provision(e) => {
                error!(error = %e, "provisioning backend failure");
                (StatusCode::BAD_GATEWAY, "Deployment failed".to_string())
            }
            AppError::ExternalUnavailable(msg) => {
                error!(detail = %msg, "external dependency unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Upstream service unavailable, try again shortly".to_string(),
                )
            }
            AppError::PasswordHashingError(msg)
            | AppError::TokenCreationError(msg)
            | AppError::DatabaseError(msg)
            | AppError::InternalServerError(msg) => {
                error!(detail = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<ProvisionError> for AppError {
    fn from(err: ProvisionError) -> Self {
        match err {
            // The orchestrator itself could not be reached; the deployment
            // may be fine. Distinct from a deployment that actually failed.
            ProvisionError::Unavailable(e) => AppError::ExternalUnavailable(e.to_string()),
            other => AppError::Provision(other),
        }
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON serialization/deserialization error: {err}"))
    }
}
