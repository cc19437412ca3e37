pub mod openai;
pub mod sse;
pub mod types;

use async_trait::async_trait;

use crate::error::ApiError;

pub use openai::OpenAIClient;
pub use sse::{parse_sse_stream, ChunkStream, LineDecoder, SseFrame};
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, Delta, ResponseChoice, ResponseMessage,
    StreamChoice, StreamChunk, Usage,
};

/// Something that can answer a chat completion request, streamed or whole.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream(&self, request: &ChatCompletionRequest) -> Result<ChunkStream, ApiError>;

    async fn complete(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse, ApiError>;
}
