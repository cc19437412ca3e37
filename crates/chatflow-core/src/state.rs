//! UI-agnostic conversation state types
//!
//! This module contains data structures that are shared between the chat
//! orchestration and whatever front-end renders it, and don't depend on any
//! specific UI framework.

use serde::{Deserialize, Serialize};

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Where a session is in its send lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatPhase {
    #[default]
    Idle,
    Streaming,
    Fallback,
    Committing,
}

/// Snapshot of a chat session, published on every change.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
    pub is_loading: bool,
    pub is_streaming: bool,
    pub error: Option<String>,
    /// Assistant text received so far for the in-flight turn.
    pub streaming_message: String,
    pub phase: ChatPhase,
}

impl ChatState {
    pub fn is_idle(&self) -> bool {
        self.phase == ChatPhase::Idle
    }

    /// Pretty JSON of the committed conversation.
    pub fn transcript_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);

        let msg: ChatMessage = serde_json::from_str(r#"{"role":"system","content":"x"}"#).unwrap();
        assert_eq!(msg.role, ChatRole::System);
    }

    #[test]
    fn test_default_state_is_idle() {
        let state = ChatState::default();
        assert!(state.is_idle());
        assert!(!state.is_loading);
        assert!(!state.is_streaming);
        assert!(state.error.is_none());
        assert!(state.streaming_message.is_empty());
    }

    #[test]
    fn test_transcript_contains_messages_in_order() {
        let state = ChatState {
            messages: vec![ChatMessage::user("Hello"), ChatMessage::assistant("Hi there")],
            ..Default::default()
        };
        let transcript = state.transcript_json().unwrap();
        let parsed: Vec<ChatMessage> = serde_json::from_str(&transcript).unwrap();
        assert_eq!(parsed, state.messages);
    }
}
