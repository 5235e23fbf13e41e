//! Error types for atlas-etl
//!
//! Three layers, matching how failures are handled:
//! - [`QueryError`]: one windowed query failed; the orchestrator retries or bisects
//! - [`GeocodeError`]: one external geocoding call failed; the resolver retries, then gives up
//! - [`AdapterError`]: a whole adapter run failed; the task ends in ERROR
//!
//! Per-record problems are not errors at all: they are
//! [`SkipReason`](crate::models::SkipReason)s, counted and logged.

use thiserror::Error;

/// Failure of a single windowed query against the graph endpoint
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// Endpoint signalled rate limiting (HTTP 429)
    #[error("Rate limited by endpoint")]
    RateLimited,

    /// Request exceeded the configured timeout
    #[error("Query timed out")]
    Timeout,

    /// Response body could not be parsed
    #[error("Unparseable response: {0}")]
    Unparseable(String),

    /// Non-success HTTP status other than 429
    #[error("Endpoint returned status {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl QueryError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, QueryError::RateLimited)
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QueryError::Timeout
        } else if err.is_decode() {
            QueryError::Unparseable(err.to_string())
        } else {
            QueryError::Transport(err.to_string())
        }
    }
}

/// Failure of one external geocoding call
#[derive(Debug, Clone, Error)]
pub enum GeocodeError {
    #[error("Geocoder network error: {0}")]
    Network(String),

    #[error("Geocoder timed out")]
    Timeout,

    #[error("Geocoder rate limit exceeded")]
    RateLimited,

    #[error("Geocoder returned status {0}")]
    Status(u16),

    #[error("Geocoder parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for GeocodeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GeocodeError::Timeout
        } else if err.is_decode() {
            GeocodeError::Parse(err.to_string())
        } else {
            GeocodeError::Network(err.to_string())
        }
    }
}

/// Failure of a whole adapter run
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Missing credential '{key}' for source '{source_name}'")]
    MissingCredential { source_name: String, key: String },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Seed data error: {0}")]
    Seed(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Common(#[from] atlas_common::Error),
}

impl From<sqlx::Error> for AdapterError {
    fn from(err: sqlx::Error) -> Self {
        AdapterError::Common(atlas_common::Error::Database(err))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::Download(err.to_string())
    }
}

impl From<zip::result::ZipError> for AdapterError {
    fn from(err: zip::result::ZipError) -> Self {
        AdapterError::Archive(err.to_string())
    }
}

impl From<csv::Error> for AdapterError {
    fn from(err: csv::Error) -> Self {
        AdapterError::Archive(err.to_string())
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;
