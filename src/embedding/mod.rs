//! Embedding client abstraction and the HTTP adapter talking to the remote service.

mod http;

pub use http::HttpEmbeddingClient;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The service reported a server-side failure.
    #[error("Embedding service unavailable ({status}): {body}")]
    ServiceUnavailable {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// The service throttled the request.
    #[error("Embedding service rate limited")]
    RateLimited,
    /// The service answered with a payload the client could not use.
    #[error("Unexpected embedding response: {0}")]
    InvalidResponse(String),
    /// Returned vector dimension does not match configuration.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was configured with.
        expected: usize,
        /// Dimension the service actually produced.
        actual: usize,
    },
}

impl EmbeddingError {
    /// Whether retrying the request can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::ServiceUnavailable { .. } | Self::RateLimited
        )
    }
}

/// Bounded exponential backoff applied to transient service failures.
///
/// Shared by the embedding and generation clients; the delay doubles after
/// every failed attempt starting from `base_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts before the error is surfaced.
    pub max_attempts: usize,
    /// Delay before the second attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Policy with the given attempt bound and a 200ms initial delay.
    pub const fn with_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(200),
        }
    }

    /// Backoff delay applied after the given zero-based failed attempt.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(8) as u32)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_attempts(3)
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Produce one embedding per supplied text, aligned 1:1 with the input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}
