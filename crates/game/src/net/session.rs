use std::collections::{BTreeMap, HashSet};

use crate::world::{EntityId, InputSeq, PlayerId, TeamId, Tick};

use super::protocol::ServerMessage;

/// Outbound channel of one session. Implemented over the transport's bounded
/// send buffer; `try_send` must never block the tick.
pub trait SnapshotSink: Send {
    fn try_send(&mut self, message: ServerMessage) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("send buffer full")]
    Full,
    #[error("peer gone")]
    Closed,
}

/// Everything the server remembers about one authenticated player: identity,
/// controlled entity, and the acknowledgement cursors that drive delta
/// encoding.
pub struct PlayerSession {
    pub player_id: PlayerId,
    pub champion_id: String,
    pub side: TeamId,
    pub entity_id: Option<EntityId>,
    /// None until the first full state goes out; deltas are meaningless
    /// before a baseline.
    pub last_acked_tick: Option<Tick>,
    /// Mirrored from the gateway after each drain, embedded into every delta.
    pub last_input_ack: InputSeq,
    pub needs_full_state: bool,
    /// Entities this session could see last emit; drives the one-shot
    /// last-known snapshot when something leaves visibility.
    pub visible_last_emit: HashSet<EntityId>,
    pub last_seen_ms: u64,
    sink: Box<dyn SnapshotSink>,
}

impl PlayerSession {
    pub fn new(
        player_id: PlayerId,
        champion_id: String,
        side: TeamId,
        sink: Box<dyn SnapshotSink>,
        now_ms: u64,
    ) -> Self {
        Self {
            player_id,
            champion_id,
            side,
            entity_id: None,
            last_acked_tick: None,
            last_input_ack: 0,
            needs_full_state: true,
            visible_last_emit: HashSet::new(),
            last_seen_ms: now_ms,
            sink,
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_seen_ms = now_ms;
    }

    pub fn is_idle(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) > window_ms
    }

    /// Rebind an existing session to a fresh connection; the next emit is a
    /// full state regardless of the previous ack.
    pub fn reconnect(&mut self, sink: Box<dyn SnapshotSink>, now_ms: u64) {
        self.sink = sink;
        self.needs_full_state = true;
        self.last_acked_tick = None;
        self.visible_last_emit.clear();
        self.last_seen_ms = now_ms;
    }

    /// Transport gone but the session kept alive for the reconnect window:
    /// every emit is shed as back-pressure until `reconnect` or idle expiry.
    pub fn detach(&mut self, now_ms: u64) {
        self.sink = Box::new(DetachedSink);
        self.needs_full_state = true;
        self.last_acked_tick = None;
        self.last_seen_ms = now_ms;
    }

    pub fn advance_input_ack(&mut self, seq: InputSeq) {
        if seq > self.last_input_ack {
            self.last_input_ack = seq;
        }
    }

    pub fn try_send(&mut self, message: ServerMessage) -> Result<(), SinkError> {
        self.sink.try_send(message)
    }
}

impl std::fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSession")
            .field("player_id", &self.player_id)
            .field("side", &self.side)
            .field("entity_id", &self.entity_id)
            .field("last_acked_tick", &self.last_acked_tick)
            .field("last_input_ack", &self.last_input_ack)
            .field("needs_full_state", &self.needs_full_state)
            .finish()
    }
}

/// Sink of a detached session: sheds every message without reporting the
/// peer as gone.
struct DetachedSink;

impl SnapshotSink for DetachedSink {
    fn try_send(&mut self, _message: ServerMessage) -> Result<(), SinkError> {
        Err(SinkError::Full)
    }
}

/// All live sessions, in stable player order so per-tick emission is
/// deterministic. Locked only around add/remove and the tick's bookkeeping.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<PlayerId, PlayerSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: PlayerSession) {
        self.sessions.insert(session.player_id.clone(), session);
    }

    pub fn remove(&mut self, player_id: &PlayerId) -> Option<PlayerSession> {
        self.sessions.remove(player_id)
    }

    pub fn get(&self, player_id: &PlayerId) -> Option<&PlayerSession> {
        self.sessions.get(player_id)
    }

    pub fn get_mut(&mut self, player_id: &PlayerId) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(player_id)
    }

    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.sessions.contains_key(player_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession> {
        self.sessions.values_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn idle_players(&self, now_ms: u64, window_ms: u64) -> Vec<PlayerId> {
        self.sessions
            .values()
            .filter(|s| s.is_idle(now_ms, window_ms))
            .map(|s| s.player_id.clone())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_sink {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Collects sent messages; can be flipped to reject like a full buffer.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub sent: Arc<Mutex<Vec<ServerMessage>>>,
        pub full: Arc<Mutex<bool>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_full(&self, full: bool) {
            *self.full.lock().unwrap() = full;
        }

        pub fn take(&self) -> Vec<ServerMessage> {
            std::mem::take(&mut self.sent.lock().unwrap())
        }
    }

    impl SnapshotSink for RecordingSink {
        fn try_send(&mut self, message: ServerMessage) -> Result<(), SinkError> {
            if *self.full.lock().unwrap() {
                return Err(SinkError::Full);
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_sink::RecordingSink;
    use super::*;

    fn session(id: &str, now_ms: u64) -> PlayerSession {
        PlayerSession::new(
            PlayerId::new(id),
            "test-champ".into(),
            TeamId::Blue,
            Box::new(RecordingSink::new()),
            now_ms,
        )
    }

    #[test]
    fn new_session_needs_full_state() {
        let s = session("p1", 0);
        assert!(s.needs_full_state);
        assert_eq!(s.last_acked_tick, None);
        assert_eq!(s.last_input_ack, 0);
    }

    #[test]
    fn input_ack_only_advances() {
        let mut s = session("p1", 0);
        s.advance_input_ack(7);
        s.advance_input_ack(3);
        assert_eq!(s.last_input_ack, 7);
    }

    #[test]
    fn reconnect_resets_baseline_but_not_input_ack() {
        let mut s = session("p1", 0);
        s.needs_full_state = false;
        s.last_acked_tick = Some(900);
        s.advance_input_ack(42);

        s.reconnect(Box::new(RecordingSink::new()), 5000);
        assert!(s.needs_full_state);
        assert_eq!(s.last_acked_tick, None);
        assert_eq!(s.last_input_ack, 42);
        assert_eq!(s.last_seen_ms, 5000);
    }

    #[test]
    fn idle_detection() {
        let mut registry = SessionRegistry::new();
        registry.insert(session("p1", 0));
        registry.insert(session("p2", 9_000));

        let idle = registry.idle_players(10_000, 5_000);
        assert_eq!(idle, vec![PlayerId::new("p1")]);
    }
}
