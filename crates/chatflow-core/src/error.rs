use thiserror::Error;

/// Failures from the HTTP layer and the wire boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no API credential configured for model '{model}'")]
    Unauthenticated { model: String },

    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("response has no body to stream")]
    NoStream,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// Configuration problems fail the same way on every attempt.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ApiError::Unauthenticated { .. })
    }
}

/// Failures surfaced by a chat session.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("a message is already being sent")]
    Busy,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("streaming failed ({stream}) and the standard request failed too: {fallback}")]
    FallbackExhausted { stream: ApiError, fallback: ApiError },
}

impl ChatError {
    /// Text shown to the user for a failed send.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::FallbackExhausted { fallback, .. } => fallback.to_string(),
            other => other.to_string(),
        }
    }
}
