use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chatflow_core::{
    ApiError, ChatSession, ChatSettings, ChatState, Config, ConfigCredentials, HttpClient,
    OpenAIClient, SendOptions, SendOutcome,
};
use ratatui::widgets::ListState;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Input box
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Conversation
    pub chat: Arc<ChatSession>,
    pub chat_state: ChatState,
    pub send_task: Option<JoinHandle<()>>,

    // Chat pane scrolling
    pub scroll: u16,
    pub follow_tail: bool,
    pub chat_height: u16, // Inner height of chat area, set during render
    pub total_lines: u16, // Rendered line count, set during render

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Model picker state
    pub client: OpenAIClient,
    pub show_model_picker: bool,
    pub available_models: Vec<String>,
    pub model_picker_state: ListState,
    pub models_task: Option<JoinHandle<Result<Vec<String>, ApiError>>>,
    pub configured_models: Vec<String>,

    /// One-line notice shown in the footer (saved transcript, model list errors).
    pub status: Option<String>,
}

impl App {
    pub fn new(config: &Config) -> Result<Self> {
        let credentials = ConfigCredentials::from_default_path()?;
        let http = HttpClient::new(&config.base_url(), Arc::new(credentials));
        let client = OpenAIClient::new(http);

        let mut app = Self::with_client(client, ChatSettings::from_config(config));
        app.configured_models = config.credential_models();
        Ok(app)
    }

    pub fn with_client(client: OpenAIClient, settings: ChatSettings) -> Self {
        let chat = Arc::new(ChatSession::new(Arc::new(client.clone()), settings));
        let chat_state = chat.snapshot();

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            input: String::new(),
            cursor: 0,

            chat,
            chat_state,
            send_task: None,

            scroll: 0,
            follow_tail: true,
            chat_height: 0,
            total_lines: 0,

            animation_frame: 0,

            client,
            show_model_picker: false,
            available_models: Vec::new(),
            model_picker_state: ListState::default(),
            models_task: None,
            configured_models: Vec::new(),

            status: None,
        }
    }

    pub fn model(&self) -> String {
        self.chat.settings().model
    }

    pub fn is_busy(&self) -> bool {
        is_busy(&self.chat_state)
    }

    /// Send the input box contents as the next user turn. The typed text
    /// stays in the box if a reply is still in flight.
    pub fn submit(&mut self) {
        if self.input.trim().is_empty() {
            return;
        }
        // The cached state can trail the session by one change
        self.sync_chat();
        if self.is_busy() {
            self.status = Some("Wait for the current reply or press Esc to stop it".to_string());
            return;
        }

        let text = std::mem::take(&mut self.input);
        self.cursor = 0;
        self.status = None;
        self.follow_tail = true;

        let chat = self.chat.clone();
        self.send_task = Some(tokio::spawn(async move {
            let options = SendOptions::new().on_error(|err| error!("Reply failed: {}", err));
            match chat.send_message(&text, options).await {
                Ok(SendOutcome::Committed { via_fallback: true, .. }) => {
                    info!("Reply delivered without streaming");
                }
                Ok(_) => {}
                Err(err) => warn!("Send did not complete: {}", err),
            }
        }));
    }

    pub fn stop(&mut self) {
        if self.is_busy() {
            self.chat.stop_streaming();
        }
    }

    pub fn clear(&mut self) {
        self.chat.clear_messages();
        self.scroll = 0;
        self.follow_tail = true;
    }

    /// Pull the latest conversation state from the session.
    pub fn sync_chat(&mut self) {
        self.chat_state = self.chat.snapshot();
        if self.follow_tail {
            self.scroll_to_bottom();
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.chat_state.is_loading {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Scrolling
    fn max_scroll(&self) -> u16 {
        self.total_lines.saturating_sub(self.chat_height)
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_add(lines).min(self.max_scroll());
        self.follow_tail = self.scroll >= self.max_scroll();
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_sub(lines);
        self.follow_tail = false;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = self.max_scroll();
        self.follow_tail = true;
    }

    pub fn half_page(&self) -> u16 {
        (self.chat_height / 2).max(1)
    }

    // Model picker
    pub fn open_model_picker(&mut self) {
        self.available_models = self.fallback_models();
        self.select_current_model();
        self.show_model_picker = true;

        let client = self.client.clone();
        let model = self.model();
        self.models_task = Some(tokio::spawn(async move { client.list_models(&model).await }));
    }

    /// Collect the model list once its request has finished.
    pub async fn poll_models(&mut self) {
        let finished = self.models_task.as_ref().is_some_and(|t| t.is_finished());
        if !finished {
            return;
        }
        let Some(task) = self.models_task.take() else {
            return;
        };

        match task.await {
            Ok(Ok(models)) if !models.is_empty() => {
                self.available_models = models;
                self.select_current_model();
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!("Could not list models: {}", err);
                self.status = Some(format!("Model list unavailable: {}", err));
            }
            Err(err) => error!("Model list task failed: {}", err),
        }
    }

    pub fn model_picker_down(&mut self) {
        let len = self.available_models.len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn confirm_model(&mut self) {
        let picked = self
            .model_picker_state
            .selected()
            .and_then(|i| self.available_models.get(i))
            .cloned();

        if let Some(model) = picked {
            self.chat.set_model(model.clone());
            if let Err(err) = Config::save_default_model(&model) {
                warn!("Could not persist default model: {:#}", err);
            }
            self.status = Some(format!("Model: {}", model));
        }
        self.close_model_picker();
    }

    pub fn close_model_picker(&mut self) {
        self.show_model_picker = false;
        self.models_task = None;
    }

    fn fallback_models(&self) -> Vec<String> {
        let mut models = self.configured_models.clone();
        let current = self.model();
        if !models.contains(&current) {
            models.insert(0, current);
        }
        models
    }

    fn select_current_model(&mut self) {
        let current = self.model();
        let index = self.available_models.iter().position(|m| *m == current).unwrap_or(0);
        self.model_picker_state.select(Some(index));
    }

    // Transcript
    pub fn save_transcript_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let transcript = self.chat_state.transcript_json()?;
        std::fs::write(path, transcript)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn save_transcript(&mut self) {
        let result = Config::config_dir()
            .map(|dir| dir.join("transcript.json"))
            .and_then(|path: PathBuf| self.save_transcript_to(&path).map(|_| path));

        self.status = Some(match result {
            Ok(path) => format!("Transcript saved to {}", path.display()),
            Err(err) => format!("Could not save transcript: {:#}", err),
        });
    }
}

fn is_busy(state: &ChatState) -> bool {
    state.is_loading || !state.is_idle()
}
