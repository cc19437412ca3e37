//! Authenticated HTTP access to an OpenAI-compatible API.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;
use crate::provider::{Credential, CredentialProvider};

const JSON: &str = "application/json";
const EVENT_STREAM: &str = "text/event-stream";

/// Body of a successful response, shaped by its content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Empty,
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpClient {
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.to_string(),
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn request<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        model: &str,
    ) -> Result<ApiResponse, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let mut builder = self.build(method, path, model, JSON)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = check_status(builder.send().await?).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(ApiResponse::Empty);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.contains("json") {
            let bytes = response.bytes().await?;
            Ok(ApiResponse::Json(serde_json::from_slice(&bytes)?))
        } else if content_type.starts_with("text/") {
            Ok(ApiResponse::Text(response.text().await?))
        } else {
            Ok(ApiResponse::Bytes(response.bytes().await?))
        }
    }

    /// Send a request and decode the JSON reply into `T`.
    pub async fn request_json<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        model: &str,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut builder = self.build(method, path, model, JSON)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = check_status(builder.send().await?).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// POST `body` and hand back the open response for incremental reading.
    pub async fn stream<B>(&self, path: &str, body: &B, model: &str) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let builder = self.build(Method::POST, path, model, EVENT_STREAM)?.json(body);
        let response = check_status(builder.send().await?).await?;

        if response.status() == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Err(ApiError::NoStream);
        }
        Ok(response)
    }

    fn credential(&self, model: &str) -> Result<Credential, ApiError> {
        self.credentials
            .resolve(model)
            .ok_or_else(|| ApiError::Unauthenticated { model: model.to_string() })
    }

    fn build(
        &self,
        method: Method,
        path: &str,
        model: &str,
        accept: &str,
    ) -> Result<RequestBuilder, ApiError> {
        let credential = self.credential(model)?;
        let base = credential.endpoint.as_deref().unwrap_or(&self.base_url);
        let url = resolve_url(base, path);
        debug!("{} {} (model {})", method, url, model);

        Ok(self
            .client
            .request(method, url)
            .header(credential.header_name(), format!("Bearer {}", credential.api_key))
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, accept))
    }
}

/// Absolute URLs pass through; relative paths are joined to `base`.
pub fn resolve_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = extract_error_message(&text).unwrap_or_else(|| {
        status.canonical_reason().unwrap_or("unknown error").to_string()
    });
    Err(ApiError::Http { status: status.as_u16(), message })
}

/// Best-effort human-readable message from an error body.
///
/// Looks at `error` (string), `error.message`, `message`, then the raw text.
pub fn extract_error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let found = value
            .get("error")
            .and_then(Value::as_str)
            .or_else(|| value.pointer("/error/message").and_then(Value::as_str))
            .or_else(|| value.get("message").and_then(Value::as_str));
        if let Some(message) = found {
            return Some(message.to_string());
        }
    }

    Some(body.to_string())
}
