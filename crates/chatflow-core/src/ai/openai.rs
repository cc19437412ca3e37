use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use super::sse::{parse_sse_stream, ChunkStream};
use super::types::{ChatCompletionRequest, ChatCompletionResponse, ModelList};
use super::CompletionBackend;
use crate::error::ApiError;
use crate::http::HttpClient;

const COMPLETIONS_PATH: &str = "chat/completions";
const MODELS_PATH: &str = "models";

/// Chat completions against any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAIClient {
    http: HttpClient,
}

impl OpenAIClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Model ids advertised by the endpoint, sorted.
    ///
    /// `model` only selects which credential to authenticate with.
    pub async fn list_models(&self, model: &str) -> Result<Vec<String>, ApiError> {
        let models: ModelList = self
            .http
            .request_json(Method::GET, MODELS_PATH, None::<&()>, model)
            .await?;

        let mut model_names: Vec<String> = models
            .data
            .into_iter()
            .map(|model| model.id)
            .collect();
        model_names.sort();

        Ok(model_names)
    }
}

#[async_trait]
impl CompletionBackend for OpenAIClient {
    async fn stream(&self, request: &ChatCompletionRequest) -> Result<ChunkStream, ApiError> {
        let request = request.with_stream(true);
        let response = self.http.stream(COMPLETIONS_PATH, &request, &request.model).await?;
        Ok(parse_sse_stream(response.bytes_stream()))
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse, ApiError> {
        let request = request.with_stream(false);
        let response: ChatCompletionResponse = self
            .http
            .request_json(Method::POST, COMPLETIONS_PATH, Some(&request), &request.model)
            .await?;

        if let Some(usage) = &response.usage {
            debug!(
                "Completion usage: {} prompt + {} completion = {} tokens",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }
        Ok(response)
    }
}
