mod config;
mod events;
mod game;
mod server;
mod tui;

use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use riftline::{CountingAllocator, NetcodeConfig};

use config::ServerConfig;
use server::ServerRuntime;
use tui::{SessionRow, TuiState};

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator;

#[derive(Parser)]
#[command(name = "riftline-server")]
#[command(about = "Authoritative riftline game server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = riftline::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 10)]
    max_players: usize,

    #[arg(long, default_value = "riftline-1")]
    game_id: String,

    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let netcode = NetcodeConfig {
        tick_rate: args.tick_rate,
        ..NetcodeConfig::default()
    };
    let config = ServerConfig {
        bind: args.bind,
        port: args.port,
        max_players: args.max_players,
        game_id: args.game_id,
        netcode,
        ..ServerConfig::default()
    };

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        let mut runtime = server::start(config)?;
        log::info!("server started");
        while let Some(event) = runtime.events.blocking_recv() {
            log::info!("{event}");
        }
        log::info!("server shutting down");
        runtime.shutdown();
    } else {
        let runtime = server::start(config.clone())?;
        run_with_tui(runtime, &config)?;
    }

    Ok(())
}

fn run_with_tui(mut runtime: ServerRuntime, config: &ServerConfig) -> Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut tui_state = TuiState::new();

    loop {
        while let Ok(event) = runtime.events.try_recv() {
            tui_state.log_line(event.to_string());
        }

        let metrics = runtime
            .metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default();
        let sessions = session_rows(&runtime);

        terminal.draw(|frame| {
            tui::render(frame, &config.game_id, &metrics, &sessions, &tui_state);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press
                    && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                {
                    break;
                }
            }
        }
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    runtime.shutdown();
    Ok(())
}

fn session_rows(runtime: &ServerRuntime) -> Vec<SessionRow> {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    runtime
        .sessions
        .lock()
        .map(|sessions| {
            sessions
                .iter()
                .map(|session| SessionRow {
                    player_id: session.player_id.to_string(),
                    side: format!("{:?}", session.side),
                    acked_tick: session.last_acked_tick,
                    input_ack: session.last_input_ack,
                    idle_secs: now_ms.saturating_sub(session.last_seen_ms) / 1000,
                })
                .collect()
        })
        .unwrap_or_default()
}
