use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use riftline::{encode_frame, ClientMessage, FrameDecoder, NetcodeConfig, ServerMessage};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("connect_failed: {0}")]
    ConnectFailed(io::Error),
    #[error("disconnected")]
    Disconnected,
    #[error("reconnect_exhausted")]
    ReconnectExhausted,
}

/// What the link surfaces to the game loop. Malformed inbound messages are
/// logged and skipped; they never appear here and never tear the link down.
#[derive(Debug)]
pub enum LinkEvent {
    Connected { reconnect: bool },
    Message(ServerMessage),
    Latency { rtt_ms: f64 },
    Reconnecting { attempt: u32 },
    /// `clean` when the server announced the end of the game first; an
    /// unclean close has already entered the reconnect loop.
    Disconnected { clean: bool },
    ReconnectExhausted,
}

/// Ordered reliable message stream to the server, with heartbeat pings,
/// latency tracking, and a capped fixed-delay reconnect loop. All socket
/// work happens on a driver task; the game loop talks through channels.
pub struct NetworkLink {
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    outgoing_tx: mpsc::UnboundedSender<ClientMessage>,
}

impl NetworkLink {
    /// Resolve the first connection, then hand the stream to the driver
    /// task. `ready` is replayed on every (re)connect so the server can
    /// re-associate the session.
    pub async fn connect(
        addr: String,
        ready: ClientMessage,
        config: NetcodeConfig,
        connect_timeout_ms: u64,
    ) -> Result<Self, LinkError> {
        let stream = tokio::time::timeout(
            Duration::from_millis(connect_timeout_ms),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| {
            LinkError::ConnectFailed(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
        })?
        .map_err(LinkError::ConnectFailed)?;
        let _ = stream.set_nodelay(true);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive(addr, stream, ready, config, events_tx, outgoing_rx));

        Ok(Self {
            events_rx,
            outgoing_tx,
        })
    }

    pub fn send(&self, message: ClientMessage) -> Result<(), LinkError> {
        self.outgoing_tx
            .send(message)
            .map_err(|_| LinkError::Disconnected)
    }

    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.events_rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Dropping the link is the explicit disconnect: the driver sees the
    /// outgoing channel close and stops, cancelling any reconnect attempts.
    pub fn disconnect(self) {}
}

enum CloseKind {
    /// Server said GameEnd before the stream ended.
    Clean,
    /// Stream failed or ended unannounced.
    Lost,
    /// Local side dropped the link.
    UserClosed,
}

async fn drive(
    addr: String,
    stream: TcpStream,
    ready: ClientMessage,
    config: NetcodeConfig,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    mut outgoing_rx: mpsc::UnboundedReceiver<ClientMessage>,
) {
    let mut current = stream;
    let mut reconnected = false;

    'session: loop {
        let (mut read_half, mut write_half) = current.into_split();

        // Announce ourselves; the server answers a fresh session with
        // GameStart + FullState and a known one with FullState alone.
        if write_message(&mut write_half, &ready).await.is_err() {
            match reconnect(&addr, &config, &events_tx, &mut outgoing_rx).await {
                Some(stream) => {
                    current = stream;
                    reconnected = true;
                    continue 'session;
                }
                None => return,
            }
        }
        let _ = events_tx.send(LinkEvent::Connected {
            reconnect: reconnected,
        });

        let mut decoder = FrameDecoder::new();
        let mut read_buf = vec![0u8; 16 * 1024];
        let mut saw_game_end = false;
        let mut ping = tokio::time::interval(Duration::from_millis(config.heartbeat_interval_ms));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let close = loop {
            tokio::select! {
                maybe_out = outgoing_rx.recv() => match maybe_out {
                    Some(message) => {
                        if write_message(&mut write_half, &message).await.is_err() {
                            break CloseKind::Lost;
                        }
                    }
                    None => break CloseKind::UserClosed,
                },
                _ = ping.tick() => {
                    let ping_msg = ClientMessage::Ping { timestamp: now_ms() };
                    if write_message(&mut write_half, &ping_msg).await.is_err() {
                        break CloseKind::Lost;
                    }
                }
                read = read_half.read(&mut read_buf) => match read {
                    Ok(0) => {
                        break if saw_game_end { CloseKind::Clean } else { CloseKind::Lost };
                    }
                    Ok(n) => {
                        decoder.extend(&read_buf[..n]);
                        loop {
                            match decoder.next_frame() {
                                Ok(Some(frame)) => {
                                    handle_frame(&frame, &events_tx, &mut saw_game_end);
                                }
                                Ok(None) => break,
                                Err(err) => {
                                    // Stream framing is gone; nothing after
                                    // this point can be trusted.
                                    log::warn!("frame error from server: {err}");
                                    decoder.clear();
                                    break;
                                }
                            }
                        }
                        if saw_game_end {
                            break CloseKind::Clean;
                        }
                    }
                    Err(err) => {
                        log::warn!("read error: {err}");
                        break CloseKind::Lost;
                    }
                },
            }
        };

        match close {
            CloseKind::UserClosed => return,
            CloseKind::Clean => {
                let _ = events_tx.send(LinkEvent::Disconnected { clean: true });
                return;
            }
            CloseKind::Lost => {
                let _ = events_tx.send(LinkEvent::Disconnected { clean: false });
                match reconnect(&addr, &config, &events_tx, &mut outgoing_rx).await {
                    Some(stream) => {
                        current = stream;
                        reconnected = true;
                    }
                    None => return,
                }
            }
        }
    }
}

fn handle_frame(
    frame: &[u8],
    events_tx: &mpsc::UnboundedSender<LinkEvent>,
    saw_game_end: &mut bool,
) {
    match ServerMessage::decode(frame) {
        Ok(message) => {
            if let ServerMessage::Pong {
                client_timestamp, ..
            } = &message
            {
                let rtt_ms = now_ms().saturating_sub(*client_timestamp) as f64;
                let _ = events_tx.send(LinkEvent::Latency { rtt_ms });
            }
            if matches!(message, ServerMessage::GameEnd { .. }) {
                *saw_game_end = true;
            }
            let _ = events_tx.send(LinkEvent::Message(message));
        }
        Err(err) => {
            log::warn!("malformed message skipped: {err}");
        }
    }
}

/// Capped fixed-delay retry. Returns the fresh stream, or None when the cap
/// is exhausted or the user dropped the link mid-wait.
async fn reconnect(
    addr: &str,
    config: &NetcodeConfig,
    events_tx: &mpsc::UnboundedSender<LinkEvent>,
    outgoing_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
) -> Option<TcpStream> {
    for attempt in 1..=config.reconnect_attempts {
        let _ = events_tx.send(LinkEvent::Reconnecting { attempt });

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(config.reconnect_delay_ms);
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                maybe_out = outgoing_rx.recv() => match maybe_out {
                    // Nothing to deliver them to; shed and keep waiting.
                    Some(_) => log::debug!("message dropped while reconnecting"),
                    None => return None,
                },
            }
        }

        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                log::info!("reconnected to {addr} on attempt {attempt}");
                return Some(stream);
            }
            Err(err) => {
                log::warn!("reconnect attempt {attempt} failed: {err}");
            }
        }
    }
    let _ = events_tx.send(LinkEvent::ReconnectExhausted);
    None
}

async fn write_message(half: &mut OwnedWriteHalf, message: &ClientMessage) -> io::Result<()> {
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
