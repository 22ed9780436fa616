pub mod entity;

use std::collections::{BTreeMap, HashMap, HashSet};

use glam::Vec2;

use crate::event::{EventLog, GameEvent};
use crate::net::gateway::DrainedInputs;
use crate::net::protocol::EntitySnapshot;

pub use entity::{
    BehaviorError, EntityBehavior, EntityCore, EntityId, EntityKind, InputSeq, PlayerId, TeamId,
    Tick,
};

/// Terminal snapshots are kept this many ticks so sessions that missed the
/// removal (back-pressure) still receive it; anything staler reconnects via
/// full state anyway.
const TOMBSTONE_HORIZON: Tick = 1024;

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("entity id {0} was already used in this game")]
    DuplicateEntityId(EntityId),
}

struct EntitySlot {
    core: EntityCore,
    behavior: Box<dyn EntityBehavior>,
    changed_at: Tick,
    dead_since: Option<Tick>,
    last_snapshot: EntitySnapshot,
}

struct PendingSpawn {
    core: EntityCore,
    behavior: Box<dyn EntityBehavior>,
}

/// Final snapshot of a removed entity, forced dead so clients purge it.
#[derive(Debug, Clone)]
pub struct Tombstone {
    pub changed_at: Tick,
    pub snapshot: EntitySnapshot,
}

/// Owns the live entity set and advances it one tick at a time. All entity
/// mutation happens inside [`World::update`]; behaviors act on other entities
/// only through the deferred operations of [`WorldCtx`].
pub struct World {
    tick: Tick,
    started_at_ms: u64,
    entities: BTreeMap<EntityId, EntitySlot>,
    used_ids: HashSet<EntityId>,
    controllers: HashMap<PlayerId, EntityId>,
    pending_spawns: Vec<PendingSpawn>,
    pending_despawns: Vec<EntityId>,
    events: EventLog,
    tombstones: Vec<Tombstone>,
}

impl World {
    pub fn new(started_at_ms: u64) -> Self {
        Self {
            tick: 0,
            started_at_ms,
            entities: BTreeMap::new(),
            used_ids: HashSet::new(),
            controllers: HashMap::new(),
            pending_spawns: Vec::new(),
            pending_despawns: Vec::new(),
            events: EventLog::new(),
            tombstones: Vec::new(),
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn advance_tick(&mut self) {
        self.tick += 1;
    }

    pub fn game_time_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.started_at_ms)
    }

    /// Insert an entity immediately; game-start population. During a tick,
    /// behaviors spawn through [`WorldCtx::spawn`] instead.
    pub fn spawn(
        &mut self,
        core: EntityCore,
        behavior: Box<dyn EntityBehavior>,
    ) -> Result<(), WorldError> {
        self.claim_id(&core.id)?;
        let last_snapshot = core.snapshot(behavior.payload());
        self.entities.insert(
            core.id.clone(),
            EntitySlot {
                core,
                behavior,
                changed_at: self.tick,
                dead_since: None,
                last_snapshot,
            },
        );
        Ok(())
    }

    /// Remove an entity at the end of the next tick, e.g. when its
    /// controlling session expires.
    pub fn schedule_despawn(&mut self, id: EntityId) {
        self.pending_despawns.push(id);
    }

    pub fn bind_controller(&mut self, player_id: PlayerId, entity_id: EntityId) {
        self.controllers.insert(player_id, entity_id);
    }

    pub fn unbind_controller(&mut self, player_id: &PlayerId) {
        self.controllers.remove(player_id);
    }

    pub fn controller_of(&self, player_id: &PlayerId) -> Option<&EntityId> {
        self.controllers.get(player_id)
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityCore> {
        self.entities.get(id).map(|slot| &slot.core)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Live, non-dead entities within `radius` of `center`, in id order.
    pub fn entities_in_radius(&self, center: Vec2, radius: f32) -> Vec<&EntityCore> {
        self.entities
            .values()
            .filter(|slot| !slot.core.is_dead)
            .filter(|slot| slot.core.position.distance_squared(center) <= radius * radius)
            .map(|slot| &slot.core)
            .collect()
    }

    pub fn enemies_of(&self, side: TeamId, center: Vec2, radius: f32) -> Vec<&EntityCore> {
        self.entities_in_radius(center, radius)
            .into_iter()
            .filter(|core| side.is_enemy_of(core.side))
            .collect()
    }

    /// End-of-tick snapshots with their change ticks, in id order.
    pub fn snapshots(&self) -> impl Iterator<Item = (&EntitySnapshot, Tick)> {
        self.entities
            .values()
            .map(|slot| (&slot.last_snapshot, slot.changed_at))
    }

    pub fn snapshot_of(&self, id: &EntityId) -> Option<&EntitySnapshot> {
        self.entities.get(id).map(|slot| &slot.last_snapshot)
    }

    pub fn changed_at(&self, id: &EntityId) -> Option<Tick> {
        self.entities.get(id).map(|slot| slot.changed_at)
    }

    pub fn tombstones(&self) -> &[Tombstone] {
        &self.tombstones
    }

    /// Events emitted by the tick that just ran.
    pub fn tick_events(&self) -> &[GameEvent] {
        self.events.current()
    }

    /// Players whose controlled entity is currently dead or gone; the engine
    /// truncates their queued inputs.
    pub fn dead_controllers(&self) -> Vec<PlayerId> {
        self.controllers
            .iter()
            .filter(|(_, entity_id)| {
                self.entities
                    .get(*entity_id)
                    .map(|slot| slot.core.is_dead)
                    .unwrap_or(true)
            })
            .map(|(player_id, _)| player_id.clone())
            .collect()
    }

    /// Advance one tick: purge entities that already spent their terminal
    /// tick dead, apply drained inputs, step every live entity in id order,
    /// apply deferred removals and spawns, then refresh dirty tracking.
    ///
    /// Deterministic: two worlds with equal state fed the same batch produce
    /// equal snapshots.
    pub fn update(&mut self, dt: f32, drained: &[DrainedInputs]) {
        self.events = EventLog::new();
        self.purge_expired_dead();

        for batch in drained {
            for input in &batch.inputs {
                let Some(entity_id) = self.controllers.get(&batch.player_id).cloned() else {
                    log::debug!(
                        "input seq {} from {}: no_such_entity",
                        input.seq,
                        batch.player_id
                    );
                    continue;
                };
                let Some(mut slot) = self.entities.remove(&entity_id) else {
                    log::debug!(
                        "input seq {} from {}: no_such_entity ({entity_id})",
                        input.seq,
                        batch.player_id
                    );
                    continue;
                };
                if slot.core.is_dead {
                    log::debug!(
                        "input seq {} from {}: entity_dead ({entity_id})",
                        input.seq,
                        batch.player_id
                    );
                    self.entities.insert(entity_id, slot);
                    continue;
                }
                let result = {
                    let mut ctx = WorldCtx { world: self };
                    slot.behavior.handle_input(&mut slot.core, input, &mut ctx)
                };
                match result {
                    Ok(()) => {
                        self.entities.insert(entity_id, slot);
                    }
                    Err(err) => self.fault_entity(slot, &err),
                }
            }
        }

        let ids: Vec<EntityId> = self.entities.keys().cloned().collect();
        for id in ids {
            let Some(mut slot) = self.entities.remove(&id) else {
                continue;
            };
            if slot.core.is_dead {
                self.entities.insert(id, slot);
                continue;
            }
            let result = {
                let mut ctx = WorldCtx { world: self };
                slot.behavior.step(&mut slot.core, dt, &mut ctx)
            };
            match result {
                Ok(()) => {
                    self.entities.insert(id, slot);
                }
                Err(err) => self.fault_entity(slot, &err),
            }
        }

        for id in std::mem::take(&mut self.pending_despawns) {
            if let Some(slot) = self.entities.remove(&id) {
                self.push_tombstone(self.tick, &slot.last_snapshot);
            }
        }

        for spawn in std::mem::take(&mut self.pending_spawns) {
            let last_snapshot = spawn.core.snapshot(spawn.behavior.payload());
            self.entities.insert(
                spawn.core.id.clone(),
                EntitySlot {
                    core: spawn.core,
                    behavior: spawn.behavior,
                    changed_at: self.tick,
                    dead_since: None,
                    last_snapshot,
                },
            );
        }

        let tick = self.tick;
        for slot in self.entities.values_mut() {
            let snapshot = slot.core.snapshot(slot.behavior.payload());
            if snapshot != slot.last_snapshot {
                slot.changed_at = tick;
                slot.last_snapshot = snapshot;
            }
            if slot.core.is_dead {
                slot.dead_since.get_or_insert(tick);
            } else {
                slot.dead_since = None;
            }
        }

        self.trim_tombstones();
    }

    fn purge_expired_dead(&mut self) {
        let tick = self.tick;
        let expired: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, slot)| slot.dead_since.is_some_and(|since| since < tick))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(slot) = self.entities.remove(&id) {
                self.push_tombstone(slot.changed_at, &slot.last_snapshot);
            }
        }
    }

    fn fault_entity(&mut self, slot: EntitySlot, err: &BehaviorError) {
        log::warn!("entity {} faulted: {err}", slot.core.id);
        self.events.emit(GameEvent::EntityFaulted {
            entity_id: slot.core.id.clone(),
        });
        self.push_tombstone(self.tick, &slot.last_snapshot);
    }

    fn push_tombstone(&mut self, changed_at: Tick, snapshot: &EntitySnapshot) {
        let mut snapshot = snapshot.clone();
        snapshot.is_dead = true;
        self.tombstones.push(Tombstone {
            changed_at,
            snapshot,
        });
    }

    fn trim_tombstones(&mut self) {
        let horizon = self.tick.saturating_sub(TOMBSTONE_HORIZON);
        self.tombstones.retain(|t| t.changed_at >= horizon);
    }

    fn claim_id(&mut self, id: &EntityId) -> Result<(), WorldError> {
        if !self.used_ids.insert(id.clone()) {
            return Err(WorldError::DuplicateEntityId(id.clone()));
        }
        Ok(())
    }
}

/// Mediated world access handed to a behavior while it runs. Reads see the
/// current mid-tick state of other entities; writes (spawn, despawn) are
/// deferred to the tick boundary so iteration order never matters.
pub struct WorldCtx<'a> {
    world: &'a mut World,
}

impl WorldCtx<'_> {
    pub fn tick(&self) -> Tick {
        self.world.tick
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityCore> {
        self.world.get(id)
    }

    pub fn entities_in_radius(&self, center: Vec2, radius: f32) -> Vec<&EntityCore> {
        self.world.entities_in_radius(center, radius)
    }

    pub fn enemies_of(&self, side: TeamId, center: Vec2, radius: f32) -> Vec<&EntityCore> {
        self.world.enemies_of(side, center, radius)
    }

    /// Queue a spawn; the entity becomes live next tick but is visible to
    /// encoders from the tick that created it.
    pub fn spawn(
        &mut self,
        core: EntityCore,
        behavior: Box<dyn EntityBehavior>,
    ) -> Result<(), WorldError> {
        self.world.claim_id(&core.id)?;
        self.world.pending_spawns.push(PendingSpawn { core, behavior });
        Ok(())
    }

    /// Queue a removal; takes effect at the end of this tick.
    pub fn despawn(&mut self, id: &EntityId) {
        self.world.pending_despawns.push(id.clone());
    }

    pub fn emit_event(&mut self, event: GameEvent) {
        self.world.events.emit(event);
    }
}
