//! HTTP adapter for the remote embedding service.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{EmbeddingClient, EmbeddingError, RetryPolicy};

/// Embedding client speaking the common `POST {base}/embeddings` JSON protocol.
pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    /// Construct a client for the given service endpoint and credential.
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        dimension: usize,
        retry: RetryPolicy,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder().user_agent("docqa/0.1").build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimension,
            retry,
        })
    }

    async fn post_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbeddingError::RateLimited);
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServiceUnavailable { status, body });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::InvalidResponse(format!(
                "status {status}: {body}"
            )));
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::InvalidResponse(err.to_string()))?;
        if payload.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                payload.data.len()
            )));
        }

        let mut data = payload.data;
        data.sort_by_key(|datum| datum.index);
        let mut vectors = Vec::with_capacity(data.len());
        for datum in data {
            if datum.embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: datum.embedding.len(),
                });
            }
            vectors.push(datum.embedding);
        }
        Ok(vectors)
    }

    async fn post_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            match self.post_embeddings(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(error) if error.is_transient() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient embedding failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error
            .unwrap_or_else(|| EmbeddingError::InvalidResponse("no attempts executed".into())))
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let texts = [text.to_string()];
        let mut vectors = self.post_with_retry(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("service returned no vectors".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.post_with_retry(texts).await {
            Ok(vectors) => Ok(vectors),
            // A failing batch is retried item by item before the whole
            // document's ingestion is declared failed.
            Err(batch_error) if batch_error.is_transient() => {
                tracing::warn!(
                    error = %batch_error,
                    items = texts.len(),
                    "Batch embedding failed; retrying per item"
                );
                let mut vectors = Vec::with_capacity(texts.len());
                for text in texts {
                    let item = [text.clone()];
                    let mut single = self.post_with_retry(&item).await?;
                    vectors.push(single.pop().ok_or_else(|| {
                        EmbeddingError::InvalidResponse("service returned no vectors".into())
                    })?);
                }
                Ok(vectors)
            }
            Err(error) => Err(error),
        }
    }
}
