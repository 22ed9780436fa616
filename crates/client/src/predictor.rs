use glam::Vec2;

use riftline::{
    ClientInput, EntityId, EntitySnapshot, NetcodeConfig, PlayerId, ServerMessage, StateUpdate,
};

use crate::buffer::StateBuffer;
use crate::interpolation::Interpolator;
use crate::prediction::{Correction, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderSource {
    Predicted,
    Interpolated,
}

/// Unified per-entity output the renderer consumes.
#[derive(Debug, Clone)]
pub struct RenderState {
    pub entity_id: EntityId,
    pub position: Vec2,
    pub source: RenderSource,
    pub snapshot: EntitySnapshot,
}

#[derive(Debug, Clone, Default)]
pub struct PredictorStats {
    pub pending_inputs: usize,
    pub last_reconciliation_error: f32,
    pub snaps_per_second: usize,
    pub interpolation_delay_ms: u64,
    pub average_buffer_delay_ms: f64,
}

/// Façade over the client netcode: routes the controlled entity through the
/// reconciler and everything else through the interpolator, and owns the
/// snapshot buffer they both read.
pub struct Predictor {
    buffer: StateBuffer,
    interpolator: Interpolator,
    reconciler: Reconciler,
    local_player: PlayerId,
    controlled: Option<EntityId>,
}

impl Predictor {
    pub fn new(config: &NetcodeConfig, local_player: PlayerId, movement_speed: f32) -> Self {
        Self {
            buffer: StateBuffer::new(config.max_snapshots, config.buffer_duration_ms),
            interpolator: Interpolator::new(config.interpolation_delay_ms),
            reconciler: Reconciler::new(config, movement_speed),
            local_player,
            controlled: None,
        }
    }

    pub fn set_controlled(&mut self, entity_id: EntityId) {
        self.controlled = Some(entity_id);
    }

    pub fn controlled(&self) -> Option<&EntityId> {
        self.controlled.as_ref()
    }

    pub fn buffer(&self) -> &StateBuffer {
        &self.buffer
    }

    /// Feed one server message through the client pipeline. Returns the
    /// correction applied to the controlled entity, when one happened.
    pub fn handle_message(
        &mut self,
        message: &ServerMessage,
        received_at_ms: u64,
    ) -> Option<Correction> {
        match message {
            ServerMessage::FullState(full) => {
                self.buffer.apply_full(full, received_at_ms);
                if let Some(controlled) = &self.controlled
                    && let Some(snapshot) =
                        full.entities.iter().find(|s| &s.entity_id == controlled)
                {
                    self.reconciler.seed(snapshot.position());
                }
                None
            }
            ServerMessage::StateUpdate(update) => {
                if !self.buffer.apply_update(update, received_at_ms) {
                    return None;
                }
                self.reconcile_from(update, received_at_ms)
            }
            _ => None,
        }
    }

    fn reconcile_from(&mut self, update: &StateUpdate, now_ms: u64) -> Option<Correction> {
        let controlled = self.controlled.clone()?;
        let delta = update
            .deltas
            .iter()
            .find(|delta| delta.entity_id == controlled)?;

        let acked = update
            .input_acks
            .iter()
            .find(|ack| ack.player_id == self.local_player)
            .map(|ack| ack.seq)
            .unwrap_or(0);

        let result = self
            .reconciler
            .reconcile(delta.snapshot.position(), acked, now_ms);
        Some(result.correction)
    }

    /// Record and locally apply a submitted input (movement family only; the
    /// rest are pass-through and surface via server deltas).
    pub fn submit_input(&mut self, input: &ClientInput, local_time_ms: u64) {
        self.reconciler.predict(input, local_time_ms);
    }

    /// Per-frame extrapolation of the controlled entity along its ordered
    /// path. Call with the frame's delta time before reading render states.
    pub fn advance(&mut self, dt: f32) {
        self.reconciler.advance(dt);
    }

    /// Positions for every entity in the newest buffered snapshot at render
    /// time `now_ms`.
    pub fn render_states(&self, now_ms: u64) -> Vec<RenderState> {
        let Some(latest) = self.buffer.latest() else {
            return Vec::new();
        };

        let mut states: Vec<RenderState> = Vec::with_capacity(latest.entities.len());
        for (entity_id, snapshot) in &latest.entities {
            if self.controlled.as_ref() == Some(entity_id) {
                states.push(RenderState {
                    entity_id: entity_id.clone(),
                    position: self.reconciler.rendered_pos(),
                    source: RenderSource::Predicted,
                    snapshot: snapshot.clone(),
                });
            } else if let Some(sample) = self.interpolator.sample(&self.buffer, entity_id, now_ms) {
                states.push(RenderState {
                    entity_id: entity_id.clone(),
                    position: sample.position,
                    source: RenderSource::Interpolated,
                    snapshot: sample.snapshot,
                });
            }
        }
        states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        states
    }

    pub fn predicted_position(&self) -> Vec2 {
        self.reconciler.rendered_pos()
    }

    pub fn stats(&self, now_ms: u64) -> PredictorStats {
        PredictorStats {
            pending_inputs: self.reconciler.pending_len(),
            last_reconciliation_error: self.reconciler.last_error(),
            snaps_per_second: self.reconciler.snaps_in_last_second(now_ms),
            interpolation_delay_ms: self.interpolator.delay_ms(),
            average_buffer_delay_ms: self.buffer.average_arrival_gap_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riftline::{
        EntityDelta, EntityKind, FullSnapshot, InputAck, InputKind, InputPayload, TeamId,
    };

    fn snapshot(id: &str, x: f32) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: EntityId::new(id),
            kind: EntityKind::Champion,
            side: TeamId::Blue,
            x,
            y: 0.0,
            is_dead: false,
            data: Vec::new(),
        }
    }

    fn full(tick: u32, at: u64, snaps: Vec<EntitySnapshot>) -> ServerMessage {
        ServerMessage::FullState(FullSnapshot {
            tick,
            timestamp_ms: at,
            entities: snaps,
            events: Vec::new(),
        })
    }

    fn update_with(
        tick: u32,
        at: u64,
        acked: u32,
        snaps: Vec<EntitySnapshot>,
    ) -> ServerMessage {
        ServerMessage::StateUpdate(StateUpdate {
            tick,
            timestamp_ms: at,
            game_time_ms: at,
            input_acks: vec![InputAck {
                player_id: PlayerId::new("p1"),
                seq: acked,
            }],
            deltas: snaps
                .into_iter()
                .map(|s| EntityDelta {
                    entity_id: s.entity_id.clone(),
                    change_mask: 0xFF,
                    snapshot: s,
                })
                .collect(),
            events: Vec::new(),
        })
    }

    fn predictor() -> Predictor {
        let mut predictor = Predictor::new(
            &NetcodeConfig::default(),
            PlayerId::new("p1"),
            325.0,
        );
        predictor.set_controlled(EntityId::new("me"));
        predictor
    }

    #[test]
    fn controlled_entity_is_predicted_others_interpolated() {
        let mut p = predictor();
        p.handle_message(
            &full(0, 100, vec![snapshot("me", 0.0), snapshot("other", 50.0)]),
            100,
        );

        let states = p.render_states(150);
        assert_eq!(states.len(), 2);
        let me = states.iter().find(|s| s.entity_id.as_str() == "me").unwrap();
        let other = states.iter().find(|s| s.entity_id.as_str() == "other").unwrap();
        assert_eq!(me.source, RenderSource::Predicted);
        assert_eq!(other.source, RenderSource::Interpolated);
    }

    #[test]
    fn hard_snap_on_large_divergence() {
        // The client believes it is at (500, 0); the server says (50, 0)
        // with nothing pending. That is far past the snap threshold.
        let mut p = predictor();
        p.handle_message(&full(0, 100, vec![snapshot("me", 500.0)]), 100);
        assert_eq!(p.predicted_position(), Vec2::new(500.0, 0.0));

        let correction = p
            .handle_message(&update_with(1, 108, 0, vec![snapshot("me", 50.0)]), 108)
            .unwrap();
        assert_eq!(correction, Correction::Snapped);
        assert_eq!(p.predicted_position(), Vec2::new(50.0, 0.0));
        assert_eq!(p.stats(108).snaps_per_second, 1);
    }

    #[test]
    fn prediction_converges_after_ack() {
        let mut p = predictor();
        p.handle_message(&full(0, 100, vec![snapshot("me", 0.0)]), 100);

        // Predict one MOVE toward (1000, 0).
        let input = ClientInput::new(
            1,
            100,
            InputKind::Move,
            InputPayload::Point { x: 1000.0, y: 0.0 },
        );
        p.submit_input(&input, 100);
        let predicted_x = p.predicted_position().x;
        assert!((predicted_x - 2.6).abs() < 1e-3);

        // Server processes seq 1 and lands on the same spot.
        let correction = p
            .handle_message(
                &update_with(1, 108, 1, vec![snapshot("me", predicted_x)]),
                108,
            )
            .unwrap();
        assert_eq!(correction, Correction::Held);
        assert!(p.stats(108).last_reconciliation_error < 1e-3);
        assert_eq!(p.stats(108).pending_inputs, 0);
    }

    #[test]
    fn updates_without_the_controlled_entity_do_not_reconcile() {
        let mut p = predictor();
        p.handle_message(&full(0, 100, vec![snapshot("me", 0.0), snapshot("other", 5.0)]), 100);

        let correction =
            p.handle_message(&update_with(1, 108, 0, vec![snapshot("other", 6.0)]), 108);
        assert!(correction.is_none());
    }

    #[test]
    fn full_state_reseeds_the_reconciler() {
        let mut p = predictor();
        p.handle_message(&full(0, 100, vec![snapshot("me", 0.0)]), 100);
        p.submit_input(
            &ClientInput::new(
                1,
                100,
                InputKind::Move,
                InputPayload::Point { x: 1000.0, y: 0.0 },
            ),
            100,
        );
        assert_eq!(p.stats(100).pending_inputs, 1);

        // Reconnect: fresh baseline resets both buffer and prediction.
        p.handle_message(&full(50, 600, vec![snapshot("me", 77.0)]), 600);
        assert_eq!(p.predicted_position(), Vec2::new(77.0, 0.0));
        assert_eq!(p.stats(600).pending_inputs, 0);
        assert_eq!(p.buffer().len(), 1);
    }
}
