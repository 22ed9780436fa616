use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use riftline::{ClientInput, ClientMessage, InputKind, InputPayload, PlayerId, ServerMessage};
use riftline_client::{ClientConfig, LinkEvent, NetworkLink, Predictor};

/// Headless bot: joins a game, roams waypoints through the full prediction
/// path, and reports link and predictor statistics. Doubles as a soak tool
/// against a running server.
#[derive(Parser)]
#[command(name = "riftline-bot")]
#[command(about = "Headless riftline client")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:27900")]
    server: String,

    #[arg(short, long, default_value = "bot-1")]
    player_id: String,

    #[arg(short, long, default_value = "wanderer")]
    champion: String,

    #[arg(long, default_value_t = 0, help = "Stop after this many seconds (0 = run forever)")]
    duration_secs: u64,

    #[arg(long, default_value_t = 600.0, help = "Radius of the waypoint ring")]
    roam_radius: f32,

    #[arg(long, default_value_t = 325.0, help = "Champion movement speed in units/sec")]
    movement_speed: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ClientConfig {
        server_addr: args.server.clone(),
        ..ClientConfig::default()
    };
    let player_id = PlayerId::new(args.player_id.clone());

    log::info!("connecting to {} as {}", config.server_addr, player_id);
    let mut link = NetworkLink::connect(
        config.server_addr.clone(),
        ClientMessage::Ready {
            player_id: player_id.clone(),
            champion_id: args.champion.clone(),
        },
        config.netcode.clone(),
        config.connect_timeout_ms,
    )
    .await?;

    let mut predictor = Predictor::new(&config.netcode, player_id.clone(), args.movement_speed);
    let mut seq: u32 = 0;
    let mut waypoint_index: usize = 0;
    let mut rtt_ms = 0.0f64;

    let mut frame_timer = tokio::time::interval(Duration::from_millis(50));
    let mut move_timer = tokio::time::interval(Duration::from_millis(200));
    let mut stats_timer = tokio::time::interval(Duration::from_secs(5));
    let deadline = if args.duration_secs > 0 {
        Some(tokio::time::Instant::now() + Duration::from_secs(args.duration_secs))
    } else {
        None
    };

    loop {
        let sleep_until = deadline.unwrap_or_else(|| {
            tokio::time::Instant::now() + Duration::from_secs(3600)
        });

        tokio::select! {
            event = link.recv() => {
                let Some(event) = event else {
                    log::info!("link driver stopped");
                    break;
                };
                match event {
                    LinkEvent::Connected { reconnect } => {
                        log::info!("connected (reconnect: {reconnect})");
                    }
                    LinkEvent::Message(message) => {
                        handle_message(&mut predictor, &player_id, message);
                    }
                    LinkEvent::Latency { rtt_ms: sample } => {
                        rtt_ms = sample;
                    }
                    LinkEvent::Reconnecting { attempt } => {
                        log::warn!("reconnecting, attempt {attempt}");
                    }
                    LinkEvent::Disconnected { clean } => {
                        if clean {
                            log::info!("server closed the game");
                            break;
                        }
                        log::warn!("connection lost");
                    }
                    LinkEvent::ReconnectExhausted => {
                        anyhow::bail!("reconnect attempts exhausted");
                    }
                }
            }
            _ = frame_timer.tick() => {
                predictor.advance(0.05);
            }
            _ = move_timer.tick() => {
                if predictor.controlled().is_some() && predictor.buffer().is_synchronized() {
                    let target = waypoint(waypoint_index, args.roam_radius);
                    if predictor.predicted_position().distance(target) < 10.0 {
                        waypoint_index += 1;
                    }
                    seq += 1;
                    let input = ClientInput::new(
                        seq,
                        now_ms(),
                        InputKind::Move,
                        InputPayload::Point { x: target.x, y: target.y },
                    );
                    predictor.submit_input(&input, now_ms());
                    if link.send(ClientMessage::Input(input)).is_err() {
                        break;
                    }
                }
            }
            _ = stats_timer.tick() => {
                let stats = predictor.stats(now_ms());
                log::info!(
                    "pos=({:.1}, {:.1}) rtt={rtt_ms:.1}ms pending={} err={:.2} snaps/s={} buffer={} gap={:.1}ms",
                    predictor.predicted_position().x,
                    predictor.predicted_position().y,
                    stats.pending_inputs,
                    stats.last_reconciliation_error,
                    stats.snaps_per_second,
                    predictor.buffer().len(),
                    stats.average_buffer_delay_ms,
                );
            }
            _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                log::info!("run duration reached");
                break;
            }
        }
    }

    link.disconnect();
    Ok(())
}

fn handle_message(predictor: &mut Predictor, player_id: &PlayerId, message: ServerMessage) {
    match &message {
        ServerMessage::GameStart {
            your_side, players, ..
        } => {
            log::info!("game start: side {your_side:?}, {} players", players.len());
            if let Some(own) = players.iter().find(|p| &p.player_id == player_id) {
                predictor.set_controlled(own.entity_id.clone());
            }
        }
        ServerMessage::FullState(_) | ServerMessage::StateUpdate(_) => {
            predictor.handle_message(&message, now_ms());
        }
        ServerMessage::GameEnd {
            winning_side,
            duration_ms,
        } => {
            log::info!("game end: {winning_side:?} wins after {duration_ms}ms");
        }
        ServerMessage::Event { event, .. } => {
            log::debug!("server event: {event}");
        }
        ServerMessage::Error { error } => {
            log::error!("server error: {error}");
        }
        ServerMessage::Pong { .. } => {}
    }
}

/// Deterministic ring of waypoints; no RNG needed for a soak bot.
fn waypoint(index: usize, radius: f32) -> glam::Vec2 {
    let angle = index as f32 * 2.4;
    glam::Vec2::new(angle.cos(), angle.sin()) * radius
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
