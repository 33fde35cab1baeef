use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Input errors raised while decoding a sharecode. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareCodeError {
    #[error("Invalid sharecode format: {0}")]
    InvalidFormat(String),
    #[error("Invalid sharecode character {character:?} at position {position}")]
    InvalidCharacter { character: char, position: usize },
}

/// No probed shard answered with 200.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No responsive shard among {tried} candidates")]
pub struct ShardNotFound {
    pub tried: usize,
}

/// Why the demo URL service did not hand out a URL.
///
/// Callers of [`crate::resolver::DemoUrlSource::resolve`] only ever see `None`;
/// the variants exist so the failure can be classified in logs.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Demo URL service is not configured")]
    MissingConfig,
    #[error("Demo URL not ready yet")]
    NotReady,
    #[error("Demo URL service returned status {0}")]
    Status(u16),
    #[error("Transport failure after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },
    #[error("Malformed demo URL response: {0}")]
    Decode(String),
    #[error("Rate limiter unavailable: {0}")]
    Limiter(String),
    #[error("Cancelled while waiting for rate limit capacity")]
    Cancelled,
}

impl ResolveError {
    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::MissingConfig => "missing_config",
            ResolveError::NotReady => "not_ready",
            ResolveError::Status(_) => "http_status",
            ResolveError::Transport { .. } => "transport",
            ResolveError::Decode(_) => "decode",
            ResolveError::Limiter(_) => "limiter",
            ResolveError::Cancelled => "cancelled",
        }
    }
}

/// Terminal outcomes of a demo fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    InvalidShareCode(#[from] ShareCodeError),
    #[error("Demo unavailable")]
    Unavailable,
    #[error("Demo exceeds size limit of {limit} bytes ({observed} bytes)")]
    SizeExceeded { limit: u64, observed: u64 },
    #[error("Download incomplete or empty ({bytes} bytes)")]
    IncompleteOrEmpty { bytes: u64 },
    #[error("Download returned status {0}")]
    HttpStatus(u16),
    #[error("Download transport failure: {0}")]
    Transport(String),
    #[error("Download timed out")]
    Timeout,
    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Fetch cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("Shared store error: {0}")]
    Store(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Rate limit exceeded for {0}")]
    RateLimitExceeded(String),
    #[error("Unknown service: {0}")]
    UnknownService(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error(transparent)]
    ShareCode(#[from] ShareCodeError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DemoError>;

impl From<redis::RedisError> for DemoError {
    fn from(err: redis::RedisError) -> Self {
        DemoError::Store(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_demo_error(err: &DemoError) -> Self {
        let message = err.to_string();
        match err {
            DemoError::Store(_) => Self::new("service_unavailable", &message, 503),
            DemoError::Config(_) => Self::new("configuration_error", &message, 500),
            DemoError::Validation(_) => Self::new("validation_error", &message, 422),
            DemoError::RateLimitExceeded(_) => Self::new("rate_limit_exceeded", &message, 429),
            DemoError::UnknownService(_) => Self::new("not_found", &message, 404),
            DemoError::Cancelled => Self::new("cancelled", &message, 503),
            DemoError::ShareCode(_) => Self::new("invalid_sharecode", &message, 422),
            DemoError::Fetch(fetch) => match fetch {
                FetchError::InvalidShareCode(_) => Self::new("invalid_sharecode", &message, 422),
                FetchError::Unavailable | FetchError::Cancelled => {
                    Self::new("demo_unavailable", &message, 503)
                }
                FetchError::SizeExceeded { .. } => Self::new("demo_too_large", &message, 413),
                FetchError::Timeout => Self::new("download_timeout", &message, 504),
                FetchError::Io(_) => Self::new("internal_error", &message, 500),
                FetchError::IncompleteOrEmpty { .. }
                | FetchError::HttpStatus(_)
                | FetchError::Transport(_) => Self::new("download_failed", &message, 502),
            },
            DemoError::Io(_) | DemoError::Internal(_) => {
                Self::new("internal_error", &message, 500)
            }
        }
    }
}

impl IntoResponse for DemoError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_demo_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}
