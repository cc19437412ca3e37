//! Send-message lifecycle for one conversation.
//!
//! A send streams the reply token by token and, if the stream breaks for
//! any reason other than the user stopping it, retries once as a plain
//! request before giving up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ai::{ChatCompletionRequest, CompletionBackend, Usage};
use crate::config::Config;
use crate::error::{ApiError, ChatError};
use crate::state::{ChatMessage, ChatPhase, ChatState};

pub const FALLBACK_NOTICE: &str = "Streaming unavailable, retrying with a standard response.";
pub const EMPTY_REPLY: &str = "No response received.";

/// Model and sampling parameters applied to every send.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub system_prompt: Option<String>,
}

impl ChatSettings {
    pub fn new(model: impl Into<String>) -> Self {
        let defaults = Config::new();
        Self {
            model: model.into(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            top_p: defaults.top_p,
            system_prompt: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            system_prompt: config.system_prompt.clone(),
        }
    }
}

pub type ErrorCallback = Box<dyn FnOnce(&ChatError) + Send>;

#[derive(Default)]
pub struct SendOptions {
    /// Overrides the session's system prompt for this send.
    pub system_prompt: Option<String>,
    pub on_error: Option<ErrorCallback>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&ChatError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Blank input; nothing happened.
    Ignored,
    Committed { via_fallback: bool, usage: Option<Usage> },
    /// Stopped by the user; nothing was committed.
    Cancelled,
}

struct ActiveSend {
    id: u64,
    token: CancellationToken,
}

pub struct ChatSession {
    backend: Arc<dyn CompletionBackend>,
    settings: RwLock<ChatSettings>,
    state: watch::Sender<ChatState>,
    active: Mutex<Option<ActiveSend>>,
    next_id: AtomicU64,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: ChatSettings) -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self {
            backend,
            settings: RwLock::new(settings),
            state,
            active: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    /// Receiver that sees every state change, including each streamed token.
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn settings(&self) -> ChatSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        settings.model = model.into();
    }

    pub async fn send_message(
        &self,
        content: &str,
        mut options: SendOptions,
    ) -> Result<SendOutcome, ChatError> {
        if content.trim().is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let token = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut history = None;
        self.state.send_if_modified(|state| {
            if !state.is_idle() {
                return false;
            }
            state.messages.push(ChatMessage::user(content));
            state.is_loading = true;
            state.is_streaming = true;
            state.error = None;
            state.streaming_message.clear();
            state.phase = ChatPhase::Streaming;
            *self.lock_active() = Some(ActiveSend { id, token: token.clone() });
            history = Some(state.messages.clone());
            true
        });
        let Some(history) = history else {
            return Err(ChatError::Busy);
        };

        let result = self.run_send(history, options.system_prompt.take(), &token).await;
        self.clear_active(id);

        match result {
            Ok(outcome) => Ok(outcome),
            Err(_) if token.is_cancelled() => Ok(SendOutcome::Cancelled),
            Err(err) => {
                error!("Chat send failed: {}", err);
                let message = err.user_message();
                self.update(&token, |state| {
                    state.is_loading = false;
                    state.is_streaming = false;
                    state.streaming_message.clear();
                    state.error = Some(message);
                    state.phase = ChatPhase::Idle;
                });
                if let Some(on_error) = options.on_error.take() {
                    on_error(&err);
                }
                Err(err)
            }
        }
    }

    /// Abort the in-flight send. Flags drop immediately; the send itself
    /// notices the cancellation and returns without committing.
    pub fn stop_streaming(&self) {
        if let Some(active) = self.lock_active().as_ref() {
            info!("Stopping in-flight chat send");
            active.token.cancel();
        }
        self.state.send_modify(|state| {
            state.is_loading = false;
            state.is_streaming = false;
            state.phase = ChatPhase::Idle;
        });
    }

    pub fn clear_messages(&self) {
        self.state.send_modify(|state| {
            state.messages.clear();
            state.error = None;
            state.streaming_message.clear();
        });
    }

    async fn run_send(
        &self,
        history: Vec<ChatMessage>,
        system_prompt: Option<String>,
        token: &CancellationToken,
    ) -> Result<SendOutcome, ChatError> {
        let request = self.build_request(history, system_prompt)?;

        let stream_error = match self.stream_reply(&request, token).await {
            Ok(Some(text)) => {
                if !self.commit(token, text) {
                    return Ok(SendOutcome::Cancelled);
                }
                return Ok(SendOutcome::Committed { via_fallback: false, usage: None });
            }
            Ok(None) => return Ok(SendOutcome::Cancelled),
            Err(err) if err.is_cancelled() => return Ok(SendOutcome::Cancelled),
            Err(err) if err.is_configuration() => return Err(err.into()),
            Err(err) => err,
        };

        warn!("Streaming failed, falling back to a standard request: {}", stream_error);
        self.update(token, |state| {
            state.phase = ChatPhase::Fallback;
            state.error = Some(FALLBACK_NOTICE.to_string());
            state.streaming_message.clear();
        });

        let fallback_request = request.with_stream(false);
        let fallback = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(SendOutcome::Cancelled),
            result = self.backend.complete(&fallback_request) => result,
        };

        match fallback {
            Ok(response) => {
                let text = response.content().unwrap_or_default().to_string();
                if self.commit(token, text) {
                    Ok(SendOutcome::Committed { via_fallback: true, usage: response.usage })
                } else {
                    Ok(SendOutcome::Cancelled)
                }
            }
            Err(fallback) => Err(ChatError::FallbackExhausted { stream: stream_error, fallback }),
        }
    }

    /// Returns the full reply text, or `None` if cancelled.
    async fn stream_reply(
        &self,
        request: &ChatCompletionRequest,
        token: &CancellationToken,
    ) -> Result<Option<String>, ApiError> {
        let mut chunks = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(None),
            result = self.backend.stream(request) => result?,
        };

        let mut text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(None),
                next = chunks.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            if token.is_cancelled() {
                return Ok(None);
            }
            if let Some(delta) = chunk.content() {
                text.push_str(delta);
                self.update(token, |state| state.streaming_message.push_str(delta));
            }
        }

        debug!("Stream completed with {} chars", text.len());
        Ok(Some(text))
    }

    fn build_request(
        &self,
        history: Vec<ChatMessage>,
        system_prompt: Option<String>,
    ) -> Result<ChatCompletionRequest, ChatError> {
        let settings = self.settings();
        if settings.model.trim().is_empty() {
            return Err(ChatError::InvalidRequest("no model selected".to_string()));
        }

        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = system_prompt
            .or(settings.system_prompt)
            .filter(|p| !p.trim().is_empty())
        {
            messages.push(ChatMessage::system(prompt));
        }
        messages.extend(history);

        Ok(ChatCompletionRequest {
            model: settings.model,
            messages,
            stream: true,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            top_p: settings.top_p,
        })
    }

    /// Append the assistant reply and return to idle. Returns `false` if the
    /// send was stopped first, in which case nothing is appended.
    fn commit(&self, token: &CancellationToken, text: String) -> bool {
        let content = if text.trim().is_empty() { EMPTY_REPLY.to_string() } else { text };
        self.update(token, |state| state.phase = ChatPhase::Committing);
        self.state.send_if_modified(|state| {
            if token.is_cancelled() {
                return false;
            }
            state.messages.push(ChatMessage::assistant(content));
            state.streaming_message.clear();
            state.error = None;
            state.is_loading = false;
            state.is_streaming = false;
            state.phase = ChatPhase::Idle;
            true
        })
    }

    /// Apply a change unless this send has been cancelled.
    fn update(&self, token: &CancellationToken, apply: impl FnOnce(&mut ChatState)) {
        self.state.send_if_modified(|state| {
            if token.is_cancelled() {
                return false;
            }
            apply(state);
            true
        });
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSend>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_active(&self, id: u64) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }
}
