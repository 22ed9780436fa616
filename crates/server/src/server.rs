use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use riftline::simulation::WorldCommand;
use riftline::{
    encode_frame, ClientMessage, EntityId, FrameDecoder, InputGateway, MetricsSnapshot,
    PlayerId, PlayerInfo, PlayerSession, ServerMessage, SessionRegistry, SinkError,
    SnapshotEncoder, SnapshotSink, TeamId, TickEngine, World,
};

use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::game;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bridges the encoder to a session's bounded outbound channel; `Full` is
/// the back-pressure signal that sheds one delta.
struct ChannelSink {
    tx: mpsc::Sender<ServerMessage>,
}

impl SnapshotSink for ChannelSink {
    fn try_send(&mut self, message: ServerMessage) -> Result<(), SinkError> {
        self.tx.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

struct Roster {
    players: Vec<PlayerInfo>,
    started_at_ms: u64,
    joins: u32,
}

struct Shared {
    config: ServerConfig,
    gateway: Arc<Mutex<InputGateway>>,
    sessions: Arc<Mutex<SessionRegistry>>,
    commands: Mutex<std::sync::mpsc::Sender<WorldCommand>>,
    events: mpsc::UnboundedSender<ServerEvent>,
    roster: Mutex<Roster>,
}

impl Shared {
    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    fn estimated_tick(&self, now_ms: u64) -> (u32, u64) {
        let roster = self.roster.lock().expect("roster lock poisoned");
        let game_time_ms = now_ms.saturating_sub(roster.started_at_ms);
        let tick_ms = self.config.netcode.tick_duration().as_millis().max(1) as u64;
        ((game_time_ms / tick_ms) as u32, game_time_ms)
    }
}

/// A running server: the tokio I/O runtime, the simulation thread, and the
/// handles the console needs.
pub struct ServerRuntime {
    pub running: Arc<AtomicBool>,
    pub metrics: Arc<Mutex<MetricsSnapshot>>,
    pub sessions: Arc<Mutex<SessionRegistry>>,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
    engine_thread: std::thread::JoinHandle<()>,
    runtime: tokio::runtime::Runtime,
    started_at_ms: u64,
}

pub fn start(config: ServerConfig) -> anyhow::Result<ServerRuntime> {
    let started_at_ms = now_ms();
    let mut world = World::new(started_at_ms);
    game::seed_arena(&mut world)?;

    let gateway = Arc::new(Mutex::new(InputGateway::new(
        config.netcode.rate_limits.clone(),
    )));
    let sessions = Arc::new(Mutex::new(SessionRegistry::new()));
    let mut engine = TickEngine::new(
        config.netcode.clone(),
        world,
        Arc::clone(&gateway),
        Arc::clone(&sessions),
        SnapshotEncoder::new(),
    );
    let running = engine.running();
    let metrics = engine.metrics_handle();
    let commands = engine.command_sender();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        config: config.clone(),
        gateway,
        sessions: Arc::clone(&sessions),
        commands: Mutex::new(commands),
        events: events_tx,
        roster: Mutex::new(Roster {
            players: Vec::new(),
            started_at_ms,
            joins: 0,
        }),
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.spawn(accept_loop(Arc::clone(&shared)));

    let engine_thread = std::thread::Builder::new()
        .name("simulation".to_string())
        .spawn(move || engine.run())?;

    Ok(ServerRuntime {
        running,
        metrics,
        sessions,
        events: events_rx,
        engine_thread,
        runtime,
        started_at_ms,
    })
}

impl ServerRuntime {
    /// Announce the end of the game, stop the simulation, then the I/O.
    pub fn shutdown(self) {
        let duration_ms = now_ms().saturating_sub(self.started_at_ms);
        if let Ok(mut sessions) = self.sessions.lock() {
            for session in sessions.iter_mut() {
                let _ = session.try_send(ServerMessage::GameEnd {
                    winning_side: TeamId::Neutral,
                    duration_ms,
                });
            }
        }
        // Give writer tasks a moment to flush the farewell.
        std::thread::sleep(Duration::from_millis(100));

        self.running.store(false, Ordering::SeqCst);
        let _ = self.engine_thread.join();
        self.runtime.shutdown_timeout(Duration::from_secs(1));
    }
}

async fn accept_loop(shared: Arc<Shared>) {
    let addr = shared.config.bind_addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            shared.emit(ServerEvent::Error {
                message: format!("bind {addr} failed: {err}"),
            });
            return;
        }
    };
    if let Ok(local) = listener.local_addr() {
        shared.emit(ServerEvent::Listening { addr: local });
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_connection(Arc::clone(&shared), stream, peer));
            }
            Err(err) => {
                shared.emit(ServerEvent::Error {
                    message: format!("accept failed: {err}"),
                });
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

enum JoinOutcome {
    New { side: TeamId, entity_id: EntityId },
    Reconnect { side: TeamId },
    Denied { reason: &'static str },
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let _ = stream.set_nodelay(true);
    let (mut read_half, write_half) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 16 * 1024];

    // The first message must authenticate the connection.
    let first = match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        read_message(&mut read_half, &mut decoder, &mut read_buf),
    )
    .await
    {
        Ok(Ok(Some(message))) => message,
        _ => {
            log::debug!("{peer}: closed before authenticating");
            return;
        }
    };
    let ClientMessage::Ready {
        player_id,
        champion_id,
    } = first
    else {
        deny(write_half, "auth_failed").await;
        shared.emit(ServerEvent::PlayerRejected {
            addr: peer,
            reason: "auth_failed".to_string(),
        });
        return;
    };
    if player_id.is_empty() || champion_id.is_empty() {
        deny(write_half, "auth_failed").await;
        shared.emit(ServerEvent::PlayerRejected {
            addr: peer,
            reason: "auth_failed".to_string(),
        });
        return;
    }

    // Outbound path: bounded channel drained by a writer task.
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(shared.config.send_buffer);
    let writer = tokio::spawn(async move {
        let mut write_half = write_half;
        while let Some(message) = rx.recv().await {
            if write_server_message(&mut write_half, &message).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let now = now_ms();
    let outcome = {
        let sessions = shared.sessions.lock().expect("session registry lock poisoned");
        if let Some(session) = sessions.get(&player_id) {
            JoinOutcome::Reconnect { side: session.side }
        } else if sessions.len() >= shared.config.max_players {
            JoinOutcome::Denied { reason: "game_full" }
        } else {
            let mut roster = shared.roster.lock().expect("roster lock poisoned");
            // A player whose session expired keeps their side but gets a
            // fresh champion generation; entity ids are never reused.
            let side = roster
                .players
                .iter()
                .find(|p| p.player_id == player_id)
                .map(|p| p.side)
                .unwrap_or(if roster.players.len() % 2 == 0 {
                    TeamId::Blue
                } else {
                    TeamId::Red
                });
            roster.joins += 1;
            JoinOutcome::New {
                side,
                entity_id: game::champion_entity_id(&player_id, roster.joins),
            }
        }
    };

    match outcome {
        JoinOutcome::Denied { reason } => {
            let _ = tx.try_send(ServerMessage::Error {
                error: reason.to_string(),
            });
            drop(tx);
            let _ = writer.await;
            shared.emit(ServerEvent::PlayerRejected {
                addr: peer,
                reason: reason.to_string(),
            });
            return;
        }
        JoinOutcome::New { side, entity_id } => {
            let info = PlayerInfo {
                player_id: player_id.clone(),
                champion_id: champion_id.clone(),
                side,
                entity_id: entity_id.clone(),
            };
            {
                let mut roster = shared.roster.lock().expect("roster lock poisoned");
                if let Some(existing) = roster
                    .players
                    .iter_mut()
                    .find(|p| p.player_id == player_id)
                {
                    *existing = info;
                } else {
                    roster.players.push(info);
                }
            }
            send_game_start(&shared, &tx, side, now);

            // Session goes live only after GameStart is queued, so the full
            // state always arrives second.
            let mut session = PlayerSession::new(
                player_id.clone(),
                champion_id.clone(),
                side,
                Box::new(ChannelSink { tx: tx.clone() }),
                now,
            );
            session.entity_id = Some(entity_id.clone());
            {
                let mut sessions =
                    shared.sessions.lock().expect("session registry lock poisoned");
                for other in sessions.iter_mut() {
                    let _ = other.try_send(ServerMessage::Event {
                        event: "player_joined".to_string(),
                        data: player_id.as_str().as_bytes().to_vec(),
                    });
                }
                sessions.insert(session);
            }
            shared
                .gateway
                .lock()
                .expect("input gateway lock poisoned")
                .register_player(player_id.clone());

            let spawn_player = player_id.clone();
            let spawn_entity = entity_id;
            let command: WorldCommand = Box::new(move |world: &mut World| {
                if let Err(err) = game::spawn_champion(world, &spawn_player, side, spawn_entity) {
                    log::error!("spawning champion for {spawn_player} failed: {err}");
                }
            });
            let _ = shared
                .commands
                .lock()
                .expect("command channel lock poisoned")
                .send(command);

            shared.emit(ServerEvent::PlayerJoined {
                player_id: player_id.clone(),
                side,
                addr: peer,
                reconnect: false,
            });
        }
        JoinOutcome::Reconnect { side } => {
            // GameStart is queued first, then the fresh sink goes live, so
            // the reissued full state always arrives second.
            send_game_start(&shared, &tx, side, now);
            {
                let mut sessions =
                    shared.sessions.lock().expect("session registry lock poisoned");
                if let Some(session) = sessions.get_mut(&player_id) {
                    session.reconnect(Box::new(ChannelSink { tx: tx.clone() }), now);
                }
            }
            shared
                .gateway
                .lock()
                .expect("input gateway lock poisoned")
                .register_player(player_id.clone());
            shared.emit(ServerEvent::PlayerJoined {
                player_id: player_id.clone(),
                side,
                addr: peer,
                reconnect: true,
            });
        }
    }

    // Steady state: inputs into the gateway, pings answered in place.
    loop {
        match read_message(&mut read_half, &mut decoder, &mut read_buf).await {
            Ok(Some(ClientMessage::Input(input))) => {
                let now = now_ms();
                {
                    let mut gateway =
                        shared.gateway.lock().expect("input gateway lock poisoned");
                    if let Err(rejection) = gateway.admit(&player_id, input, now) {
                        log::debug!("{player_id}: input rejected: {rejection}");
                    }
                }
                touch_session(&shared, &player_id, now);
            }
            Ok(Some(ClientMessage::Ping { timestamp })) => {
                let now = now_ms();
                let _ = tx.try_send(ServerMessage::Pong {
                    client_timestamp: timestamp,
                    server_timestamp: now,
                });
                touch_session(&shared, &player_id, now);
            }
            Ok(Some(ClientMessage::Ready { .. })) => {
                log::debug!("{player_id}: duplicate ready ignored");
            }
            Ok(None) => break,
            Err(err) => {
                log::debug!("{player_id}: read failed: {err}");
                break;
            }
        }
    }

    // Park the session for the reconnect window; idle expiry in the engine
    // collects it if the player never returns.
    {
        let mut sessions = shared.sessions.lock().expect("session registry lock poisoned");
        if let Some(session) = sessions.get_mut(&player_id) {
            session.detach(now_ms());
        }
    }
    shared
        .gateway
        .lock()
        .expect("input gateway lock poisoned")
        .clear_player(&player_id);
    shared.emit(ServerEvent::PlayerDisconnected { player_id });
    drop(tx);
    let _ = writer.await;
}

fn send_game_start(
    shared: &Shared,
    tx: &mpsc::Sender<ServerMessage>,
    side: TeamId,
    now_ms: u64,
) {
    let (tick, game_time_ms) = shared.estimated_tick(now_ms);
    let players = shared
        .roster
        .lock()
        .expect("roster lock poisoned")
        .players
        .clone();
    let _ = tx.try_send(ServerMessage::GameStart {
        tick,
        game_time_ms,
        game_id: shared.config.game_id.clone(),
        your_side: side,
        players,
    });
}

fn touch_session(shared: &Shared, player_id: &PlayerId, now_ms: u64) {
    let mut sessions = shared.sessions.lock().expect("session registry lock poisoned");
    if let Some(session) = sessions.get_mut(player_id) {
        session.touch(now_ms);
    }
}

async fn deny(mut write_half: OwnedWriteHalf, reason: &str) {
    let message = ServerMessage::Error {
        error: reason.to_string(),
    };
    let _ = write_server_message(&mut write_half, &message).await;
    let _ = write_half.shutdown().await;
}

/// Next decodable message from the stream. Malformed payloads are logged
/// and skipped without closing the connection; `None` is a clean EOF.
async fn read_message(
    read_half: &mut OwnedReadHalf,
    decoder: &mut FrameDecoder,
    buf: &mut [u8],
) -> io::Result<Option<ClientMessage>> {
    loop {
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => match ClientMessage::decode(&frame) {
                    Ok(message) => return Ok(Some(message)),
                    Err(err) => log::warn!("malformed client message skipped: {err}"),
                },
                Ok(None) => break,
                Err(err) => {
                    log::warn!("client frame error: {err}");
                    decoder.clear();
                    break;
                }
            }
        }
        let n = read_half.read(buf).await?;
        if n == 0 {
            return Ok(None);
        }
        decoder.extend(&buf[..n]);
    }
}

async fn write_server_message(
    half: &mut OwnedWriteHalf,
    message: &ServerMessage,
) -> io::Result<()> {
    let payload = message
        .encode()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    let frame = encode_frame(&payload)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    half.write_all(&frame).await
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
