pub mod ai;
pub mod chat;
pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod state;

// Re-export main types for convenience
pub use ai::{
    ChatCompletionRequest, ChatCompletionResponse, CompletionBackend, OpenAIClient, StreamChunk,
    Usage,
};
pub use chat::{ChatSession, ChatSettings, SendOptions, SendOutcome};
pub use config::{Config, CredentialRecord};
pub use error::{ApiError, ChatError};
pub use http::{ApiResponse, HttpClient};
pub use provider::{ConfigCredentials, Credential, CredentialProvider, StaticCredentials};
pub use state::{ChatMessage, ChatPhase, ChatRole, ChatState};
