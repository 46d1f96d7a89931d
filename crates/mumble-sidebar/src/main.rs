mod app;
mod config;
mod logging;
mod transport;
mod ui;

use crate::{
    app::App,
    config::{Args, Config},
    logging::init_logging,
    transport::Transport,
    ui::render_ui,
};
use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use mumble_prefs::{MemoryPreferences, PreferenceStore, TomlPreferences};
use mumble_state::SessionController;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use tokio::sync::mpsc;
use tracing::{info, warn};

const TRANSPORT_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_args(&args)?;
    let _log_guard = init_logging(&config);
    info!(
        event = "startup",
        url = %config.url,
        reconnect_ms = config.reconnect_interval.as_millis() as u64,
        prefs = %config.prefs_path.display()
    );

    let prefs = open_prefs(&config);
    let (transport_tx, mut transport_rx) = mpsc::channel(TRANSPORT_QUEUE_CAPACITY);
    let mut transport = Transport::new(config.url.clone(), transport_tx);
    let controller = SessionController::new(transport.handle(), prefs);
    let mut app = App::new(controller, config.url.to_string());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut events = EventStream::new();
    let mut reconnect_ticker = tokio::time::interval(config.reconnect_interval);

    let outcome = async {
        loop {
            terminal.draw(|frame| render_ui(frame, &app))?;
            tokio::select! {
                _ = reconnect_ticker.tick() => {
                    transport.connect();
                }
                Some(event) = transport_rx.recv() => {
                    app.apply_transport_event(event);
                }
                maybe_event = events.next() => {
                    match maybe_event {
                        Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                            if app.handle_key(key) {
                                break;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => warn!("terminal_event_error: {err}"),
                        None => break,
                    }
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    transport.disconnect();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    info!(event = "shutdown");
    outcome
}

fn open_prefs(config: &Config) -> Box<dyn PreferenceStore> {
    match TomlPreferences::open(&config.prefs_path) {
        Ok(prefs) => Box::new(prefs),
        Err(err) => {
            warn!("prefs_open_error: {err}; using in-memory preferences");
            Box::new(MemoryPreferences::new())
        }
    }
}
