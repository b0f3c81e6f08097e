pub mod ai;
pub mod telegram;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("API returned non-success status {status}: {body}")]
    ApiError {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Unexpected response shape: {0}")]
    BadResponse(String),
}
