use bitflags::bitflags;
use rkyv::{rancor, Archive, Deserialize, Serialize};

use crate::event::GameEvent;
use crate::world::{EntityId, EntityKind, InputSeq, PlayerId, TeamId, Tick};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("serialization failed: {0}")]
    Encode(rancor::Error),
    #[error("deserialization failed: {0}")]
    Decode(rancor::Error),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}

/// Closed tag of every input a client can submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum InputKind {
    Move,
    AttackMove,
    TargetUnit,
    Stop,
    Ability,
    LevelUp,
    BuyItem,
    SellItem,
    Recall,
    PlaceWard,
    Ping,
    Chat,
}

impl InputKind {
    /// Movement-family inputs are the ones the client predicts locally.
    pub fn is_movement(self) -> bool {
        matches!(
            self,
            InputKind::Move | InputKind::AttackMove | InputKind::TargetUnit | InputKind::Stop
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            InputKind::Move => "move",
            InputKind::AttackMove => "attack_move",
            InputKind::TargetUnit => "target_unit",
            InputKind::Stop => "stop",
            InputKind::Ability => "ability",
            InputKind::LevelUp => "level_up",
            InputKind::BuyItem => "buy_item",
            InputKind::SellItem => "sell_item",
            InputKind::Recall => "recall",
            InputKind::PlaceWard => "place_ward",
            InputKind::Ping => "ping",
            InputKind::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum InputPayload {
    Point { x: f32, y: f32 },
    Unit { target: EntityId },
    Ability { slot: u8, x: f32, y: f32, target: Option<EntityId> },
    Slot { slot: u8 },
    Item { item: u32 },
    Chat { text: String },
    Empty,
}

/// One sequenced client action, as it travels from the client through the
/// gateway into the World.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ClientInput {
    pub seq: InputSeq,
    pub client_time_ms: u64,
    pub kind: InputKind,
    pub payload: InputPayload,
}

impl ClientInput {
    pub fn new(seq: InputSeq, client_time_ms: u64, kind: InputKind, payload: InputPayload) -> Self {
        Self {
            seq,
            client_time_ms,
            kind,
            payload,
        }
    }

    /// Whether the payload variant is the one this input kind requires.
    pub fn payload_matches_kind(&self) -> bool {
        matches!(
            (self.kind, &self.payload),
            (InputKind::Move, InputPayload::Point { .. })
                | (InputKind::AttackMove, InputPayload::Point { .. })
                | (InputKind::TargetUnit, InputPayload::Unit { .. })
                | (InputKind::Stop, InputPayload::Empty)
                | (InputKind::Ability, InputPayload::Ability { .. })
                | (InputKind::LevelUp, InputPayload::Slot { .. })
                | (InputKind::BuyItem, InputPayload::Item { .. })
                | (InputKind::SellItem, InputPayload::Item { .. })
                | (InputKind::Recall, InputPayload::Empty)
                | (InputKind::PlaceWard, InputPayload::Point { .. })
                | (InputKind::Ping, InputPayload::Point { .. })
                | (InputKind::Chat, InputPayload::Chat { .. })
        )
    }
}

/// End-of-tick value record for one entity. Two snapshots of the same entity
/// are compared field-wise; any difference marks the entity changed.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub side: TeamId,
    pub x: f32,
    pub y: f32,
    pub is_dead: bool,
    /// Kind-specific payload contributed by the behavior, opaque to the core.
    pub data: Vec<u8>,
}

impl EntitySnapshot {
    pub fn position(&self) -> glam::Vec2 {
        glam::Vec2::new(self.x, self.y)
    }
}

bitflags! {
    /// Which snapshot fields changed since the session's acked tick. Reserved
    /// for per-field compression; deltas always carry the full snapshot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChangeMask: u8 {
        const POSITION = 1 << 0;
        const LIFE = 1 << 1;
        const DATA = 1 << 2;
    }
}

impl ChangeMask {
    pub fn between(old: &EntitySnapshot, new: &EntitySnapshot) -> Self {
        let mut mask = ChangeMask::empty();
        if old.x != new.x || old.y != new.y {
            mask |= ChangeMask::POSITION;
        }
        if old.is_dead != new.is_dead {
            mask |= ChangeMask::LIFE;
        }
        if old.data != new.data || old.kind != new.kind || old.side != new.side {
            mask |= ChangeMask::DATA;
        }
        mask
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityDelta {
    pub entity_id: EntityId,
    pub change_mask: u8,
    pub snapshot: EntitySnapshot,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct InputAck {
    pub player_id: PlayerId,
    pub seq: InputSeq,
}

/// Complete entity set; sent on join and on reconnect.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct FullSnapshot {
    pub tick: Tick,
    pub timestamp_ms: u64,
    pub entities: Vec<EntitySnapshot>,
    pub events: Vec<GameEvent>,
}

/// Per-session delta: only entities whose state changed since the session's
/// last acked tick, plus the session's input acknowledgements.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct StateUpdate {
    pub tick: Tick,
    pub timestamp_ms: u64,
    pub game_time_ms: u64,
    pub input_acks: Vec<InputAck>,
    pub deltas: Vec<EntityDelta>,
    pub events: Vec<GameEvent>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerInfo {
    pub player_id: PlayerId,
    pub champion_id: String,
    pub side: TeamId,
    pub entity_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum ClientMessage {
    Ready { player_id: PlayerId, champion_id: String },
    Input(ClientInput),
    Ping { timestamp: u64 },
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum ServerMessage {
    GameStart {
        tick: Tick,
        game_time_ms: u64,
        game_id: String,
        your_side: TeamId,
        players: Vec<PlayerInfo>,
    },
    FullState(FullSnapshot),
    StateUpdate(StateUpdate),
    GameEnd {
        winning_side: TeamId,
        duration_ms: u64,
    },
    Event {
        event: String,
        data: Vec<u8>,
    },
    Error {
        error: String,
    },
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(WireError::Encode)
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(WireError::Decode)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(WireError::Encode)
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(WireError::Decode)
    }
}
