use glam::Vec2;
use rkyv::{Archive, Deserialize, Serialize};

use crate::net::protocol::EntitySnapshot;

/// Stable identity of a connected player, assigned by the session layer.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[rkyv(compare(PartialEq), derive(Debug, PartialEq, Eq, Hash))]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stable identity of a live entity. Unique for the lifetime of a game;
/// the [`World`](crate::world::World) refuses to reuse one.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[rkyv(compare(PartialEq), derive(Debug, PartialEq, Eq, Hash))]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Simulation time, counted in ticks from game start.
pub type Tick = u32;

/// Per-player input sequence number, starting at 1.
pub type InputSeq = u32;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum TeamId {
    Blue,
    Red,
    #[default]
    Neutral,
}

impl TeamId {
    pub fn opponent(self) -> TeamId {
        match self {
            TeamId::Blue => TeamId::Red,
            TeamId::Red => TeamId::Blue,
            TeamId::Neutral => TeamId::Neutral,
        }
    }

    pub fn is_enemy_of(self, other: TeamId) -> bool {
        self != other && self != TeamId::Neutral && other != TeamId::Neutral
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum EntityKind {
    Champion,
    Minion,
    Tower,
    Nexus,
    Ward,
    Projectile,
    JungleCamp,
}

/// The core-owned slice of an entity: identity plus the fields every
/// subsystem needs. Everything gameplay-specific lives behind
/// [`EntityBehavior`].
#[derive(Debug, Clone)]
pub struct EntityCore {
    pub id: EntityId,
    pub kind: EntityKind,
    pub side: TeamId,
    pub position: Vec2,
    pub is_dead: bool,
}

impl EntityCore {
    pub fn new(id: EntityId, kind: EntityKind, side: TeamId, position: Vec2) -> Self {
        Self {
            id,
            kind,
            side,
            position,
            is_dead: false,
        }
    }

    pub fn snapshot(&self, data: Vec<u8>) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: self.id.clone(),
            kind: self.kind,
            side: self.side,
            x: self.position.x,
            y: self.position.y,
            is_dead: self.is_dead,
            data,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BehaviorError {
    #[error("behavior invariant violated: {0}")]
    Invariant(String),
    #[error("behavior state corrupt: {0}")]
    Corrupt(String),
}

/// The contract through which all gameplay content is injected. The World
/// calls `step` once per tick and `handle_input` for each drained input
/// addressed to the entity; `payload` contributes the kind-specific bytes of
/// the entity's snapshot. A returned error removes the entity and emits an
/// `entity_faulted` event without aborting the tick.
pub trait EntityBehavior: Send {
    fn step(
        &mut self,
        core: &mut EntityCore,
        dt: f32,
        world: &mut super::WorldCtx<'_>,
    ) -> Result<(), BehaviorError>;

    fn handle_input(
        &mut self,
        core: &mut EntityCore,
        input: &crate::net::protocol::ClientInput,
        world: &mut super::WorldCtx<'_>,
    ) -> Result<(), BehaviorError>;

    fn payload(&self) -> Vec<u8>;

    fn is_collidable(&self) -> bool {
        true
    }

    fn radius(&self) -> f32;
}
