use std::collections::HashSet;

use crate::world::{EntityId, TeamId, World};

use super::protocol::{
    ChangeMask, EntityDelta, EntitySnapshot, FullSnapshot, InputAck, ServerMessage, StateUpdate,
};
use super::session::{PlayerSession, SinkError};

/// External fog-of-war collaborator. The encoder consults it per entity and
/// per side; the default sees everything.
pub trait Visibility: Send {
    fn is_visible(&self, side: TeamId, snapshot: &EntitySnapshot) -> bool;
}

/// No fog: every entity is visible to every side.
pub struct FullVisibility;

impl Visibility for FullVisibility {
    fn is_visible(&self, _side: TeamId, _snapshot: &EntitySnapshot) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Sent,
    /// Send buffer full; this tick's message was dropped for this session
    /// only. The ack cursor stays put, so the next delta is larger.
    Dropped,
    Closed,
}

/// Builds the per-session message after each tick: a full snapshot for fresh
/// or reconnected sessions, otherwise a delta against the session's last
/// acked tick.
pub struct SnapshotEncoder {
    visibility: Box<dyn Visibility>,
}

impl Default for SnapshotEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotEncoder {
    pub fn new() -> Self {
        Self {
            visibility: Box::new(FullVisibility),
        }
    }

    pub fn with_visibility(visibility: Box<dyn Visibility>) -> Self {
        Self { visibility }
    }

    pub fn emit(&self, world: &World, session: &mut PlayerSession, now_ms: u64) -> EmitOutcome {
        if session.needs_full_state || session.last_acked_tick.is_none() {
            self.emit_full(world, session, now_ms)
        } else {
            self.emit_delta(world, session, now_ms)
        }
    }

    fn emit_full(&self, world: &World, session: &mut PlayerSession, now_ms: u64) -> EmitOutcome {
        let mut visible_now = HashSet::new();
        let mut entities = Vec::new();
        for (snapshot, _) in world.snapshots() {
            if !self.session_sees(session, snapshot) {
                continue;
            }
            visible_now.insert(snapshot.entity_id.clone());
            entities.push(snapshot.clone());
        }

        let message = ServerMessage::FullState(FullSnapshot {
            tick: world.tick(),
            timestamp_ms: now_ms,
            entities,
            events: world.tick_events().to_vec(),
        });

        match session.try_send(message) {
            Ok(()) => {
                session.last_acked_tick = Some(world.tick());
                session.needs_full_state = false;
                session.visible_last_emit = visible_now;
                EmitOutcome::Sent
            }
            Err(SinkError::Full) => {
                log::debug!("full state to {} dropped: send buffer full", session.player_id);
                EmitOutcome::Dropped
            }
            Err(SinkError::Closed) => EmitOutcome::Closed,
        }
    }

    fn emit_delta(&self, world: &World, session: &mut PlayerSession, now_ms: u64) -> EmitOutcome {
        let acked = session.last_acked_tick.unwrap_or(0);
        let mut visible_now = HashSet::new();
        let mut deltas = Vec::new();

        for (snapshot, changed_at) in world.snapshots() {
            if !self.session_sees(session, snapshot) {
                continue;
            }
            visible_now.insert(snapshot.entity_id.clone());
            let newly_visible = !session.visible_last_emit.contains(&snapshot.entity_id);
            if changed_at > acked || newly_visible {
                deltas.push(full_delta(snapshot));
            }
        }

        // One final last-known snapshot for entities that just left
        // visibility; afterwards the client sees silence and treats the
        // entity as stale.
        for entity_id in &session.visible_last_emit {
            if visible_now.contains(entity_id) {
                continue;
            }
            if let Some(snapshot) = world.snapshot_of(entity_id) {
                deltas.push(full_delta(snapshot));
            }
        }

        let mut purged = Vec::new();
        for tombstone in world.tombstones() {
            if tombstone.changed_at > acked
                && session.visible_last_emit.contains(&tombstone.snapshot.entity_id)
            {
                deltas.push(full_delta(&tombstone.snapshot));
                purged.push(tombstone.snapshot.entity_id.clone());
            }
        }

        let message = ServerMessage::StateUpdate(StateUpdate {
            tick: world.tick(),
            timestamp_ms: now_ms,
            game_time_ms: world.game_time_ms(now_ms),
            input_acks: vec![InputAck {
                player_id: session.player_id.clone(),
                seq: session.last_input_ack,
            }],
            deltas,
            events: world.tick_events().to_vec(),
        });

        match session.try_send(message) {
            Ok(()) => {
                session.last_acked_tick = Some(world.tick());
                session.visible_last_emit = visible_now;
                for entity_id in purged {
                    session.visible_last_emit.remove(&entity_id);
                }
                EmitOutcome::Sent
            }
            Err(SinkError::Full) => {
                log::debug!("delta to {} dropped: send buffer full", session.player_id);
                EmitOutcome::Dropped
            }
            Err(SinkError::Closed) => EmitOutcome::Closed,
        }
    }

    /// The controlled entity's own updates are always delivered, whatever
    /// the fog collaborator claims.
    fn session_sees(&self, session: &PlayerSession, snapshot: &EntitySnapshot) -> bool {
        if session.entity_id.as_ref() == Some(&snapshot.entity_id) {
            return true;
        }
        self.visibility.is_visible(session.side, snapshot)
    }
}

fn full_delta(snapshot: &EntitySnapshot) -> EntityDelta {
    EntityDelta {
        entity_id: snapshot.entity_id.clone(),
        change_mask: ChangeMask::all().bits(),
        snapshot: snapshot.clone(),
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::net::protocol::ClientInput;
    use crate::net::session::test_sink::RecordingSink;
    use crate::world::{
        BehaviorError, EntityBehavior, EntityCore, EntityKind, PlayerId, WorldCtx,
    };

    struct Drift {
        speed: f32,
    }

    impl EntityBehavior for Drift {
        fn step(
            &mut self,
            core: &mut EntityCore,
            dt: f32,
            _world: &mut WorldCtx<'_>,
        ) -> Result<(), BehaviorError> {
            core.position.x += self.speed * dt;
            Ok(())
        }

        fn handle_input(
            &mut self,
            _core: &mut EntityCore,
            _input: &ClientInput,
            _world: &mut WorldCtx<'_>,
        ) -> Result<(), BehaviorError> {
            Ok(())
        }

        fn payload(&self) -> Vec<u8> {
            Vec::new()
        }

        fn radius(&self) -> f32 {
            10.0
        }
    }

    struct DiesImmediately;

    impl EntityBehavior for DiesImmediately {
        fn step(
            &mut self,
            core: &mut EntityCore,
            _dt: f32,
            _world: &mut WorldCtx<'_>,
        ) -> Result<(), BehaviorError> {
            core.is_dead = true;
            Ok(())
        }

        fn handle_input(
            &mut self,
            _core: &mut EntityCore,
            _input: &ClientInput,
            _world: &mut WorldCtx<'_>,
        ) -> Result<(), BehaviorError> {
            Ok(())
        }

        fn payload(&self) -> Vec<u8> {
            Vec::new()
        }

        fn radius(&self) -> f32 {
            10.0
        }
    }

    /// Hides every Red entity from Blue.
    struct BlueIsBlind;

    impl Visibility for BlueIsBlind {
        fn is_visible(&self, side: TeamId, snapshot: &EntitySnapshot) -> bool {
            !(side == TeamId::Blue && snapshot.side == TeamId::Red)
        }
    }

    fn world_with(entities: &[(&str, TeamId, f32)]) -> World {
        let mut world = World::new(0);
        for (id, side, speed) in entities {
            world
                .spawn(
                    EntityCore::new(
                        EntityId::new(*id),
                        EntityKind::Champion,
                        *side,
                        Vec2::ZERO,
                    ),
                    Box::new(Drift { speed: *speed }),
                )
                .unwrap();
        }
        world
    }

    fn session_with_sink(id: &str, side: TeamId) -> (PlayerSession, RecordingSink) {
        let sink = RecordingSink::new();
        let session = PlayerSession::new(
            PlayerId::new(id),
            "champ".into(),
            side,
            Box::new(sink.clone()),
            0,
        );
        (session, sink)
    }

    #[test]
    fn first_emit_is_full_state() {
        let world = world_with(&[("a", TeamId::Blue, 0.0), ("b", TeamId::Red, 0.0)]);
        let (mut session, sink) = session_with_sink("p1", TeamId::Blue);
        let encoder = SnapshotEncoder::new();

        assert_eq!(encoder.emit(&world, &mut session, 1000), EmitOutcome::Sent);
        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            ServerMessage::FullState(full) => {
                assert_eq!(full.entities.len(), 2);
                assert_eq!(full.tick, 0);
                assert_eq!(full.timestamp_ms, 1000);
            }
            other => panic!("expected FullState, got {other:?}"),
        }
        assert_eq!(session.last_acked_tick, Some(0));
        assert!(!session.needs_full_state);
    }

    #[test]
    fn delta_contains_only_changed_entities() {
        let mut world = world_with(&[("mover", TeamId::Blue, 100.0), ("still", TeamId::Red, 0.0)]);
        let (mut session, sink) = session_with_sink("p1", TeamId::Blue);
        let encoder = SnapshotEncoder::new();

        encoder.emit(&world, &mut session, 0);
        sink.take();

        world.advance_tick();
        world.update(0.008, &[]);
        encoder.emit(&world, &mut session, 8);

        let sent = sink.take();
        match &sent[0] {
            ServerMessage::StateUpdate(update) => {
                assert_eq!(update.tick, 1);
                assert_eq!(update.deltas.len(), 1);
                assert_eq!(update.deltas[0].entity_id.as_str(), "mover");
                assert_eq!(
                    update.deltas[0].change_mask,
                    ChangeMask::all().bits()
                );
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }
    }

    #[test]
    fn dropped_send_widens_next_delta() {
        let mut world = world_with(&[("mover", TeamId::Blue, 100.0)]);
        let (mut session, sink) = session_with_sink("p1", TeamId::Blue);
        let encoder = SnapshotEncoder::new();

        encoder.emit(&world, &mut session, 0);
        sink.take();

        // Tick 1 is dropped by back-pressure; the ack cursor must not move.
        world.advance_tick();
        world.update(0.008, &[]);
        sink.set_full(true);
        assert_eq!(encoder.emit(&world, &mut session, 8), EmitOutcome::Dropped);
        assert_eq!(session.last_acked_tick, Some(0));

        // Tick 2 succeeds and still carries the change from tick 1.
        sink.set_full(false);
        world.advance_tick();
        world.update(0.008, &[]);
        encoder.emit(&world, &mut session, 16);

        let sent = sink.take();
        match &sent[0] {
            ServerMessage::StateUpdate(update) => {
                assert_eq!(update.tick, 2);
                assert_eq!(update.deltas.len(), 1);
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }
        assert_eq!(session.last_acked_tick, Some(2));
    }

    #[test]
    fn removed_entity_appears_once_dead_then_never_again() {
        let mut world = World::new(0);
        world
            .spawn(
                EntityCore::new(
                    EntityId::new("victim"),
                    EntityKind::Minion,
                    TeamId::Red,
                    Vec2::ZERO,
                ),
                Box::new(DiesImmediately),
            )
            .unwrap();
        let (mut session, sink) = session_with_sink("p1", TeamId::Blue);
        let encoder = SnapshotEncoder::new();

        encoder.emit(&world, &mut session, 0);
        sink.take();

        // Dies during tick 0's successor; terminal snapshot flows this tick.
        world.advance_tick();
        world.update(0.008, &[]);
        encoder.emit(&world, &mut session, 8);
        let sent = sink.take();
        match &sent[0] {
            ServerMessage::StateUpdate(update) => {
                assert_eq!(update.deltas.len(), 1);
                assert!(update.deltas[0].snapshot.is_dead);
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }

        // Next tick the entity is gone and no further delta mentions it.
        world.advance_tick();
        world.update(0.008, &[]);
        encoder.emit(&world, &mut session, 16);
        let sent = sink.take();
        match &sent[0] {
            ServerMessage::StateUpdate(update) => {
                assert!(update.deltas.is_empty(), "dead entity re-emitted");
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }
    }

    #[test]
    fn stale_session_receives_tombstone_once() {
        let mut world = World::new(0);
        world
            .spawn(
                EntityCore::new(
                    EntityId::new("victim"),
                    EntityKind::Minion,
                    TeamId::Red,
                    Vec2::ZERO,
                ),
                Box::new(DiesImmediately),
            )
            .unwrap();
        let (mut session, sink) = session_with_sink("p1", TeamId::Blue);
        let encoder = SnapshotEncoder::new();

        encoder.emit(&world, &mut session, 0);
        sink.take();

        // The tick that carries the death is lost to back-pressure, and so is
        // the purge tick; the session stays acked at 0.
        sink.set_full(true);
        world.advance_tick();
        world.update(0.008, &[]);
        encoder.emit(&world, &mut session, 8);
        world.advance_tick();
        world.update(0.008, &[]);
        encoder.emit(&world, &mut session, 16);

        // Once the link drains, the tombstone is delivered exactly once.
        sink.set_full(false);
        world.advance_tick();
        world.update(0.008, &[]);
        encoder.emit(&world, &mut session, 24);
        let sent = sink.take();
        match &sent[0] {
            ServerMessage::StateUpdate(update) => {
                assert_eq!(update.deltas.len(), 1);
                assert!(update.deltas[0].snapshot.is_dead);
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }

        world.advance_tick();
        world.update(0.008, &[]);
        encoder.emit(&world, &mut session, 32);
        let sent = sink.take();
        match &sent[0] {
            ServerMessage::StateUpdate(update) => {
                assert!(update.deltas.is_empty());
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }
    }

    #[test]
    fn invisible_entities_are_filtered_with_final_last_known() {
        let mut world = world_with(&[("spy", TeamId::Red, 10.0), ("own", TeamId::Blue, 0.0)]);
        let (mut session, sink) = session_with_sink("p1", TeamId::Blue);
        session.entity_id = Some(EntityId::new("own"));

        // Fully visible at first, then Blue goes blind.
        let encoder = SnapshotEncoder::new();
        encoder.emit(&world, &mut session, 0);
        sink.take();

        let blind = SnapshotEncoder::with_visibility(Box::new(BlueIsBlind));
        world.advance_tick();
        world.update(0.008, &[]);
        blind.emit(&world, &mut session, 8);
        let sent = sink.take();
        match &sent[0] {
            ServerMessage::StateUpdate(update) => {
                // The spy leaves visibility with one last-known snapshot.
                assert_eq!(update.deltas.len(), 1);
                assert_eq!(update.deltas[0].entity_id.as_str(), "spy");
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }

        // Afterwards the spy is silent even though it keeps moving.
        world.advance_tick();
        world.update(0.008, &[]);
        blind.emit(&world, &mut session, 16);
        let sent = sink.take();
        match &sent[0] {
            ServerMessage::StateUpdate(update) => {
                assert!(update.deltas.is_empty());
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }
    }

    #[test]
    fn controlled_entity_bypasses_fog() {
        let mut world = world_with(&[("own", TeamId::Red, 10.0)]);
        // Session side is Blue but controls a Red entity the fog would hide.
        let (mut session, sink) = session_with_sink("p1", TeamId::Blue);
        session.entity_id = Some(EntityId::new("own"));

        let blind = SnapshotEncoder::with_visibility(Box::new(BlueIsBlind));
        blind.emit(&world, &mut session, 0);
        let sent = sink.take();
        match &sent[0] {
            ServerMessage::FullState(full) => {
                assert_eq!(full.entities.len(), 1);
            }
            other => panic!("expected FullState, got {other:?}"),
        }

        world.advance_tick();
        world.update(0.008, &[]);
        blind.emit(&world, &mut session, 8);
        let sent = sink.take();
        match &sent[0] {
            ServerMessage::StateUpdate(update) => {
                assert_eq!(update.deltas.len(), 1);
                assert_eq!(update.deltas[0].entity_id.as_str(), "own");
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }
    }

    #[test]
    fn every_delta_embeds_the_input_ack() {
        let mut world = world_with(&[("a", TeamId::Blue, 0.0)]);
        let (mut session, sink) = session_with_sink("p1", TeamId::Blue);
        let encoder = SnapshotEncoder::new();

        encoder.emit(&world, &mut session, 0);
        sink.take();

        session.advance_input_ack(17);
        world.advance_tick();
        world.update(0.008, &[]);
        encoder.emit(&world, &mut session, 8);
        let sent = sink.take();
        match &sent[0] {
            ServerMessage::StateUpdate(update) => {
                assert_eq!(update.input_acks.len(), 1);
                assert_eq!(update.input_acks[0].seq, 17);
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }
    }
}
