//! Error types for asset fetching

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for engine construction and configuration
pub type Result<T> = std::result::Result<T, EngineError>;

/// Classification of a failed fetch, used by retry, breaker and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// The resource does not exist at this endpoint
    NotFound,
    /// The attempt did not complete within the per-attempt timeout
    Timeout,
    /// Connectivity problem or 5xx-class response
    TransportFailure,
    /// Payload failed validation or decoding
    Malformed,
    /// Endpoint permanently refused the request (4xx other than not-found)
    Rejected,
    /// Every candidate endpoint was tried without success
    AllSourcesExhausted,
}

impl FetchErrorKind {
    /// Whether an attempt failing with this kind may be retried on the same endpoint
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchErrorKind::Timeout | FetchErrorKind::TransportFailure)
    }

    /// Stable label used in logs and metric keys
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::NotFound => "not_found",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::TransportFailure => "transport_failure",
            FetchErrorKind::Malformed => "malformed",
            FetchErrorKind::Rejected => "rejected",
            FetchErrorKind::AllSourcesExhausted => "all_sources_exhausted",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by a single fetch attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Resource missing at the endpoint
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// Attempt timed out
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// HTTP error status
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// Network connection failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Rate limited by the endpoint
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Payload failed validation or decoding
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// All candidate endpoints failed
    #[error("All sources exhausted for {id}: {last_error}")]
    AllSourcesExhausted { id: String, last_error: String },

    /// The load task ended without producing an outcome
    #[error("Load cancelled")]
    Cancelled,
}

impl FetchError {
    /// Classify the error
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::NotFound(_) => FetchErrorKind::NotFound,
            FetchError::Timeout(_) => FetchErrorKind::Timeout,
            FetchError::Connection(_) | FetchError::RateLimited { .. } | FetchError::Cancelled => {
                FetchErrorKind::TransportFailure
            }
            FetchError::Http { status, .. } => match *status {
                404 | 410 => FetchErrorKind::NotFound,
                408 => FetchErrorKind::Timeout,
                429 => FetchErrorKind::TransportFailure,
                s if s >= 500 => FetchErrorKind::TransportFailure,
                _ => FetchErrorKind::Rejected,
            },
            FetchError::Malformed(_) => FetchErrorKind::Malformed,
            FetchError::InvalidUrl(_) => FetchErrorKind::Rejected,
            FetchError::AllSourcesExhausted { .. } => FetchErrorKind::AllSourcesExhausted,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Get retry delay if rate limited
    pub fn retry_after(&self) -> Option<Duration> {
        if let FetchError::RateLimited { retry_after_ms } = self {
            Some(Duration::from_millis(*retry_after_ms))
        } else {
            None
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(0)
        } else if let Some(status) = e.status() {
            FetchError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else if e.is_decode() || e.is_body() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Connection(e.to_string())
        }
    }
}

impl From<url::ParseError> for FetchError {
    fn from(e: url::ParseError) -> Self {
        FetchError::InvalidUrl(e.to_string())
    }
}

/// Errors raised while building or configuring the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration rejected at construction time
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("Invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),
}
