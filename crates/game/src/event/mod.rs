use rkyv::{Archive, Deserialize, Serialize};

use crate::world::EntityId;

/// Tick-local event, delivered to clients inside the snapshot for the tick
/// that produced it. `EntityFaulted` is the only event the core itself emits;
/// everything else arrives from behaviors as an opaque `Custom` record.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum GameEvent {
    EntityFaulted { entity_id: EntityId },
    Custom { kind: String, data: Vec<u8> },
}

impl GameEvent {
    pub fn custom(kind: impl Into<String>, data: Vec<u8>) -> Self {
        GameEvent::Custom {
            kind: kind.into(),
            data,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            GameEvent::EntityFaulted { .. } => "entity_faulted",
            GameEvent::Custom { kind, .. } => kind,
        }
    }
}

/// Events emitted during the current tick, in emission order. Drained by the
/// encoder at end of tick; never carried across ticks.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<GameEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: GameEvent) {
        self.events.push(event);
    }

    pub fn current(&self) -> &[GameEvent] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
