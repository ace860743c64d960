//! Cloud client error types

use thiserror::Error;

/// Cloud client error type
///
/// Closed set of failure kinds; everything the vendor backend or the
/// local cache can do wrong maps onto one of these.
#[derive(Debug, Error)]
pub enum CloudError {
    /// Empty username or password, rejected at construction
    #[error("Invalid credentials: {0}")]
    CredentialsInvalid(String),

    /// Backend confirmed the credentials are bad
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Network or decode failure, retryable
    #[error("Transient cloud error: {0}")]
    Transient(String),

    /// Local cache could not be read or written
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        CloudError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(err: serde_json::Error) -> Self {
        CloudError::Transient(err.to_string())
    }
}

impl From<std::io::Error> for CloudError {
    fn from(err: std::io::Error) -> Self {
        CloudError::CacheUnavailable(err.to_string())
    }
}

/// Result type for cloud operations
pub type CloudResult<T> = Result<T, CloudError>;
