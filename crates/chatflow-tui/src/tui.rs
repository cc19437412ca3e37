use std::io::{self, Stderr};
use std::time::Duration;

use anyhow::Result;
use chatflow_core::ChatState;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyEvent, KeyEventKind, MouseEvent},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::{mpsc, watch};

pub type Tui = Terminal<CrosstermBackend<Stderr>>;

const TICK_RATE: Duration = Duration::from_millis(300);

#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Resize(u16, u16),
    Tick,
    /// The chat session published a new state; read it with `ChatSession::snapshot`.
    ChatChanged,
}

impl AppEvent {
    fn from_terminal(event: Event) -> Option<Self> {
        match event {
            // Press only; release and repeat arrive on some terminals
            Event::Key(key) if key.kind == KeyEventKind::Press => Some(Self::Key(key)),
            Event::Mouse(mouse) => Some(Self::Mouse(mouse)),
            Event::Resize(w, h) => Some(Self::Resize(w, h)),
            _ => None,
        }
    }
}

/// Merges terminal input, animation ticks and chat state changes into one queue.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<AppEvent>,
}

impl EventHandler {
    pub fn new(chat_rx: watch::Receiver<ChatState>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let terminal_tx = tx.clone();
        tokio::spawn(async move {
            let mut reader = EventStream::new();
            while let Some(event) = reader.next().await {
                let Some(event) = event.ok().and_then(AppEvent::from_terminal) else {
                    continue;
                };
                if terminal_tx.send(event).is_err() {
                    break;
                }
            }
        });

        let tick_tx = tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_RATE);
            while tick_tx.send(AppEvent::Tick).is_ok() {
                interval.tick().await;
            }
        });

        tokio::spawn(forward_chat_changes(chat_rx, tx));

        Self { rx }
    }

    pub async fn next(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }
}

/// One `ChatChanged` per observed change; changes that land between two
/// reads collapse into a single notification.
async fn forward_chat_changes(
    mut chat_rx: watch::Receiver<ChatState>,
    tx: mpsc::UnboundedSender<AppEvent>,
) {
    while chat_rx.changed().await.is_ok() {
        if tx.send(AppEvent::ChatChanged).is_err() {
            break;
        }
    }
}

pub fn init() -> Result<Tui> {
    enable_raw_mode()?;
    execute!(io::stderr(), EnterAlternateScreen, EnableMouseCapture)?;
    Ok(Terminal::new(CrosstermBackend::new(io::stderr()))?)
}

pub fn restore() -> Result<()> {
    execute!(io::stderr(), DisableMouseCapture, LeaveAlternateScreen)?;
    disable_raw_mode()?;
    Ok(())
}

/// Leave the alternate screen before the default hook prints the panic.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore();
        default_hook(info);
    }));
}
