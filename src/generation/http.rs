//! HTTP adapter for the remote language model service.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::embedding::RetryPolicy;

use super::{GenerationError, LanguageModel};

/// Language-model client speaking the common `POST {base}/chat/completions` protocol.
pub struct HttpLanguageModel {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl HttpLanguageModel {
    /// Construct a client for the given service endpoint and credential.
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        retry: RetryPolicy,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder().user_agent("docqa/0.1").build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            retry,
        })
    }

    async fn post_completion(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::RateLimited);
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::ServiceUnavailable { status, body });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::InvalidResponse(format!(
                "status {status}: {body}"
            )));
        }

        let payload: CompletionResponse = response
            .json()
            .await
            .map_err(|err| GenerationError::InvalidResponse(err.to_string()))?;
        payload
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::InvalidResponse("response had no choices".into()))
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            match self.post_completion(prompt).await {
                Ok(text) => return Ok(text),
                Err(error) if error.is_transient() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient generation failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error
            .unwrap_or_else(|| GenerationError::InvalidResponse("no attempts executed".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    #[tokio::test]
    async fn generate_extracts_first_choice_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer llm-key")
                    .body_contains("summarize the findings");
                then.status(200).json_body(json!({
                    "choices": [
                        { "message": { "role": "assistant", "content": "The findings are clear." } }
                    ]
                }));
            })
            .await;

        let model = HttpLanguageModel::new(
            &server.base_url(),
            "llm-key",
            "test-model",
            RetryPolicy::with_attempts(1),
        )
        .expect("client");

        let text = model
            .generate("summarize the findings")
            .await
            .expect("completion");
        mock.assert();
        assert_eq!(text, "The findings are clear.");
    }

    #[tokio::test]
    async fn empty_choices_are_invalid() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let model = HttpLanguageModel::new(
            &server.base_url(),
            "llm-key",
            "test-model",
            RetryPolicy::with_attempts(1),
        )
        .expect("client");

        let error = model.generate("anything").await.unwrap_err();
        assert!(matches!(error, GenerationError::InvalidResponse(_)));
    }
}
