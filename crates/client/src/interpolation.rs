use glam::Vec2;

use riftline::{EntityId, EntitySnapshot};

use crate::buffer::StateBuffer;

/// What the renderer gets for one remote entity: a blended position, the
/// blend factor that produced it, and the nearer snapshot for discrete
/// fields.
#[derive(Debug, Clone)]
pub struct InterpolatedState {
    pub position: Vec2,
    pub factor: f32,
    pub snapshot: EntitySnapshot,
}

/// Renders remote entities a fixed delay behind the newest snapshot by
/// blending the two buffered entries that bracket the target time. Output is
/// always finite and the factor always lands in [0, 1].
#[derive(Debug, Clone)]
pub struct Interpolator {
    delay_ms: u64,
}

impl Interpolator {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    pub fn sample(
        &self,
        buffer: &StateBuffer,
        entity_id: &EntityId,
        render_time_ms: u64,
    ) -> Option<InterpolatedState> {
        let target_ms = render_time_ms.saturating_sub(self.delay_ms);
        let (before, after) = buffer.bracketing(target_ms)?;

        let Some(after) = after else {
            // No bracket: clamp to the only usable entry. Factor is 0 when
            // the target predates the buffer and 1 when it outruns it.
            let snapshot = before.entities.get(entity_id)?;
            let factor = if target_ms < before.received_at_ms { 0.0 } else { 1.0 };
            return Some(InterpolatedState {
                position: snapshot.position(),
                factor,
                snapshot: snapshot.clone(),
            });
        };

        match (before.entities.get(entity_id), after.entities.get(entity_id)) {
            (Some(from), Some(to)) => {
                let span = after.received_at_ms.saturating_sub(before.received_at_ms);
                let raw = if span == 0 {
                    0.0
                } else {
                    (((target_ms - before.received_at_ms) as f64) / span as f64) as f32
                };
                let factor = raw.clamp(0.0, 1.0);

                let position = from.position().lerp(to.position(), factor);
                let nearer = if factor < 0.5 { from } else { to };
                Some(InterpolatedState {
                    position,
                    factor,
                    snapshot: nearer.clone(),
                })
            }
            // Entity only exists on one side of the bracket: hold it there
            // rather than invent motion.
            (Some(from), None) => Some(InterpolatedState {
                position: from.position(),
                factor: 0.0,
                snapshot: from.clone(),
            }),
            (None, Some(to)) => Some(InterpolatedState {
                position: to.position(),
                factor: 1.0,
                snapshot: to.clone(),
            }),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riftline::{EntityDelta, EntityKind, FullSnapshot, StateUpdate, TeamId};

    fn snapshot(id: &str, x: f32, y: f32) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: EntityId::new(id),
            kind: EntityKind::Minion,
            side: TeamId::Red,
            x,
            y,
            is_dead: false,
            data: Vec::new(),
        }
    }

    fn buffer_with_track(points: &[(u64, f32)]) -> StateBuffer {
        let mut buffer = StateBuffer::new(64, 100_000);
        let (first_at, first_x) = points[0];
        buffer.apply_full(
            &FullSnapshot {
                tick: 0,
                timestamp_ms: first_at,
                entities: vec![snapshot("m", first_x, 0.0)],
                events: Vec::new(),
            },
            first_at,
        );
        for (i, (at, x)) in points.iter().enumerate().skip(1) {
            buffer.apply_update(
                &StateUpdate {
                    tick: i as u32,
                    timestamp_ms: *at,
                    game_time_ms: *at,
                    input_acks: Vec::new(),
                    deltas: vec![EntityDelta {
                        entity_id: EntityId::new("m"),
                        change_mask: 0xFF,
                        snapshot: snapshot("m", *x, 0.0),
                    }],
                    events: Vec::new(),
                },
                *at,
            );
        }
        buffer
    }

    #[test]
    fn blends_between_bracketing_snapshots() {
        let buffer = buffer_with_track(&[(100, 0.0), (200, 10.0)]);
        let interpolator = Interpolator::new(100);

        // Render at 250 targets 150, halfway between the entries.
        let state = interpolator
            .sample(&buffer, &EntityId::new("m"), 250)
            .unwrap();
        assert!((state.factor - 0.5).abs() < 1e-6);
        assert!((state.position.x - 5.0).abs() < 1e-4);
    }

    #[test]
    fn clamps_before_oldest_entry() {
        let buffer = buffer_with_track(&[(100, 0.0), (200, 10.0)]);
        let interpolator = Interpolator::new(100);

        let state = interpolator
            .sample(&buffer, &EntityId::new("m"), 120)
            .unwrap();
        assert_eq!(state.factor, 0.0);
        assert_eq!(state.position.x, 0.0);
    }

    #[test]
    fn clamps_after_newest_entry() {
        let buffer = buffer_with_track(&[(100, 0.0), (200, 10.0)]);
        let interpolator = Interpolator::new(100);

        let state = interpolator
            .sample(&buffer, &EntityId::new("m"), 900)
            .unwrap();
        assert_eq!(state.factor, 1.0);
        assert_eq!(state.position.x, 10.0);
    }

    #[test]
    fn equal_timestamps_yield_factor_zero() {
        // Two entries arriving on the same millisecond: never divide.
        let buffer = buffer_with_track(&[(100, 0.0), (100, 10.0)]);
        let interpolator = Interpolator::new(0);

        let state = interpolator
            .sample(&buffer, &EntityId::new("m"), 100)
            .unwrap();
        assert_eq!(state.factor, 0.0);
        assert_eq!(state.position.x, 0.0);
        assert!(state.position.x.is_finite() && state.position.y.is_finite());
    }

    #[test]
    fn factor_always_in_unit_range_and_finite() {
        let buffer = buffer_with_track(&[(100, 0.0), (150, 3.0), (220, 9.0), (260, -4.0)]);
        let interpolator = Interpolator::new(100);

        for render_at in (0..600).step_by(7) {
            if let Some(state) = interpolator.sample(&buffer, &EntityId::new("m"), render_at) {
                assert!((0.0..=1.0).contains(&state.factor), "factor {}", state.factor);
                assert!(state.position.x.is_finite());
                assert!(state.position.y.is_finite());
            }
        }
    }

    #[test]
    fn discrete_fields_come_from_the_nearer_snapshot() {
        let mut buffer = StateBuffer::new(64, 100_000);
        buffer.apply_full(
            &FullSnapshot {
                tick: 0,
                timestamp_ms: 100,
                entities: vec![EntitySnapshot {
                    data: vec![1],
                    ..snapshot("m", 0.0, 0.0)
                }],
                events: Vec::new(),
            },
            100,
        );
        buffer.apply_update(
            &StateUpdate {
                tick: 1,
                timestamp_ms: 200,
                game_time_ms: 200,
                input_acks: Vec::new(),
                deltas: vec![EntityDelta {
                    entity_id: EntityId::new("m"),
                    change_mask: 0xFF,
                    snapshot: EntitySnapshot {
                        data: vec![2],
                        ..snapshot("m", 10.0, 0.0)
                    },
                }],
                events: Vec::new(),
            },
            200,
        );
        let interpolator = Interpolator::new(0);

        let early = interpolator.sample(&buffer, &EntityId::new("m"), 120).unwrap();
        assert_eq!(early.snapshot.data, vec![1]);

        let late = interpolator.sample(&buffer, &EntityId::new("m"), 190).unwrap();
        assert_eq!(late.snapshot.data, vec![2]);
    }

    #[test]
    fn missing_entity_returns_none() {
        let buffer = buffer_with_track(&[(100, 0.0), (200, 10.0)]);
        let interpolator = Interpolator::new(0);
        assert!(interpolator
            .sample(&buffer, &EntityId::new("ghost"), 150)
            .is_none());
    }
}
