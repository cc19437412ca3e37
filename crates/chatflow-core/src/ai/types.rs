//! OpenAI-compatible chat completion wire shapes.

use serde::{Deserialize, Serialize};

use crate::state::{ChatMessage, ChatRole};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

impl ChatCompletionRequest {
    /// Same request with only the `stream` flag changed.
    pub fn with_stream(&self, stream: bool) -> Self {
        Self { stream, ..self.clone() }
    }
}

/// One `data:` event of a streaming response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

impl StreamChunk {
    /// Text carried by the first choice, if any and non-empty.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ResponseChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatCompletionResponse {
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseChoice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseMessage {
    pub role: ChatRole,
    /// `null` on refusals and tool-call turns.
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Deserialize)]
pub(crate) struct ModelList {
    pub data: Vec<ModelInfo>,
}

#[derive(Deserialize)]
pub(crate) struct ModelInfo {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_openai_shape() {
        let request = ChatCompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::user("Hello")],
            stream: true,
            temperature: 0.5,
            max_tokens: 256,
            top_p: 1.0,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["stream"], true);
        assert_eq!(value["max_tokens"], 256);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "Hello");
    }

    #[test]
    fn test_with_stream_only_flips_flag() {
        let request = ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::user("q")],
            stream: true,
            temperature: 0.2,
            max_tokens: 10,
            top_p: 0.9,
        };
        let fallback = request.with_stream(false);
        assert!(!fallback.stream);
        assert_eq!(fallback, ChatCompletionRequest { stream: false, ..request });
    }

    #[test]
    fn test_chunk_content_skips_empty_and_missing() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"index":0,"delta":{"content":"Hi"}}]}"#).unwrap();
        assert_eq!(chunk.content(), Some("Hi"));

        let role_only: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#).unwrap();
        assert_eq!(role_only.content(), None);

        let empty: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":""},"finish_reason":"stop"}]}"#).unwrap();
        assert_eq!(empty.content(), None);

        let no_choices: StreamChunk = serde_json::from_str("{}").unwrap();
        assert_eq!(no_choices.content(), None);
    }

    #[test]
    fn test_response_parses_with_usage() {
        let body = r#"{
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Fallback reply"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        }"#;
        let response: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.content(), Some("Fallback reply"));
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(7));
    }

    #[test]
    fn test_response_with_null_content_still_parses() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        let response: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.content(), None);
        assert_eq!(response.usage, None);

        let missing: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).unwrap();
        assert_eq!(missing.content(), None);
    }
}
