use std::fs::File;
use std::sync::Mutex;

use anyhow::Result;
use chatflow_core::Config;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

const LOG_ENV: &str = "CHATFLOW_LOG";

/// Log to a file in the config dir; the terminal belongs to the UI.
fn init_logging() -> Result<()> {
    let dir = Config::config_dir()?;
    std::fs::create_dir_all(&dir)?;
    let file = File::create(dir.join("chatflow.log"))?;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(err) = init_logging() {
        eprintln!("Logging disabled: {:#}", err);
    }

    let config = Config::load().unwrap_or_else(|err| {
        warn!("Using default config: {:#}", err);
        Config::new()
    });
    info!("Starting chatflow with model {}", config.model());

    let mut app = App::new(&config)?;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new(app.chat.subscribe());

    let result = run(&mut app, &mut terminal, &mut events).await;

    tui::restore()?;
    result
}

async fn run(app: &mut App, terminal: &mut tui::Tui, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event).await?,
            None => break,
        }
    }

    app.stop();
    Ok(())
}
