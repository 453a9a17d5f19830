//! Error taxonomy for the gap analysis core.
//!
//! Each component boundary gets its own variant set so callers (mainly the
//! consumer's message handler) can decide ack vs. reject-without-requeue
//! without parsing strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limiter wait was cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("circuit breaker is open")]
    Unavailable,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("response could not be parsed as JSON: {0}")]
    UnparsableResponse(String),
    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("downloaded content too small to be a PDF ({0} bytes)")]
    TooSmall(usize),
    #[error("no reachable source for PDF")]
    NoSource,
    #[error("extractor returned corrupt-input status")]
    CorruptInput,
    #[error("extractor returned status {0}")]
    UpstreamStatus(u16),
    #[error("extractor response could not be parsed: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("paper not found: {0}")]
    PaperNotFound(String),
    #[error("could not resolve database host after retries: {0}")]
    DnsRetriesExhausted(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("analysis deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0:?}")]
    MissingFields(Vec<String>),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}
