use std::net::SocketAddr;

use riftline::{PlayerId, TeamId};

/// Operational events surfaced to the console (TUI or log); gameplay events
/// travel inside snapshots instead.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Listening {
        addr: SocketAddr,
    },
    PlayerJoined {
        player_id: PlayerId,
        side: TeamId,
        addr: SocketAddr,
        reconnect: bool,
    },
    PlayerRejected {
        addr: SocketAddr,
        reason: String,
    },
    PlayerDisconnected {
        player_id: PlayerId,
    },
    Error {
        message: String,
    },
}

impl std::fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerEvent::Listening { addr } => write!(f, "listening on {addr}"),
            ServerEvent::PlayerJoined {
                player_id,
                side,
                addr,
                reconnect,
            } => {
                if *reconnect {
                    write!(f, "{player_id} reconnected from {addr} ({side:?})")
                } else {
                    write!(f, "{player_id} joined from {addr} ({side:?})")
                }
            }
            ServerEvent::PlayerRejected { addr, reason } => {
                write!(f, "connection from {addr} rejected: {reason}")
            }
            ServerEvent::PlayerDisconnected { player_id } => {
                write!(f, "{player_id} disconnected")
            }
            ServerEvent::Error { message } => write!(f, "error: {message}"),
        }
    }
}
