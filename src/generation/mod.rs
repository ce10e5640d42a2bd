//! Language-model client abstraction used for answer synthesis.

mod http;

pub use http::HttpLanguageModel;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised by the answer-generating language model service.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The service reported a server-side failure.
    #[error("Generation service unavailable ({status}): {body}")]
    ServiceUnavailable {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// The service throttled the request.
    #[error("Generation service rate limited")]
    RateLimited,
    /// The service answered with a payload the client could not use.
    #[error("Unexpected generation response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    /// Whether retrying the request can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::ServiceUnavailable { .. } | Self::RateLimited
        )
    }
}

/// Interface implemented by answer-generating backends.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce a completion for the supplied prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}
