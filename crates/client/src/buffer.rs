use std::collections::{HashMap, VecDeque};

use riftline::{EntityId, EntitySnapshot, FullSnapshot, GameEvent, StateUpdate, Tick};

const OFFSET_EMA_KEEP: f64 = 0.9;
const TRIM_FLOOR: usize = 2;

/// One reconstructed server tick as the client saw it: the full per-entity
/// map (deltas already applied on top of the previous entry) stamped with
/// both server time and local arrival time.
#[derive(Debug, Clone)]
pub struct BufferedSnapshot {
    pub tick: Tick,
    pub server_time_ms: u64,
    pub received_at_ms: u64,
    pub entities: HashMap<EntityId, EntitySnapshot>,
    pub events: Vec<GameEvent>,
}

/// Ring of recent server snapshots, exclusively owned by the client. Also
/// tracks the server-time offset: seeded from the full state, then pulled by
/// an exponential moving average on every delta.
#[derive(Debug)]
pub struct StateBuffer {
    snapshots: VecDeque<BufferedSnapshot>,
    max_snapshots: usize,
    buffer_duration_ms: u64,
    /// `local_now - server_timestamp` at receipt; NaN-free by construction.
    server_time_offset_ms: f64,
    synchronized: bool,
}

impl StateBuffer {
    pub fn new(max_snapshots: usize, buffer_duration_ms: u64) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(max_snapshots.max(TRIM_FLOOR)),
            max_snapshots: max_snapshots.max(TRIM_FLOOR),
            buffer_duration_ms,
            server_time_offset_ms: 0.0,
            synchronized: false,
        }
    }

    /// Reset to the authoritative baseline. Entities already flagged dead
    /// are purged immediately; they only exist on the wire to trigger that
    /// purge.
    pub fn apply_full(&mut self, full: &FullSnapshot, received_at_ms: u64) {
        self.snapshots.clear();
        self.server_time_offset_ms = received_at_ms as f64 - full.timestamp_ms as f64;
        self.synchronized = true;

        let entities = full
            .entities
            .iter()
            .filter(|snapshot| !snapshot.is_dead)
            .map(|snapshot| (snapshot.entity_id.clone(), snapshot.clone()))
            .collect();

        self.snapshots.push_back(BufferedSnapshot {
            tick: full.tick,
            server_time_ms: full.timestamp_ms,
            received_at_ms,
            entities,
            events: full.events.clone(),
        });
    }

    /// Fold one delta on top of the newest entry. Deltas that arrive before
    /// any baseline, or out of tick order, are skipped with a log line; the
    /// server is the source of truth and will keep streaming.
    pub fn apply_update(&mut self, update: &StateUpdate, received_at_ms: u64) -> bool {
        let Some(previous) = self.snapshots.back() else {
            log::warn!("delta for tick {} before any baseline, skipped", update.tick);
            return false;
        };
        if update.tick <= previous.tick {
            log::warn!(
                "delta for tick {} is not newer than buffered tick {}, skipped",
                update.tick,
                previous.tick
            );
            return false;
        }

        let sample = received_at_ms as f64 - update.timestamp_ms as f64;
        self.server_time_offset_ms =
            OFFSET_EMA_KEEP * self.server_time_offset_ms + (1.0 - OFFSET_EMA_KEEP) * sample;

        let mut entities = previous.entities.clone();
        for delta in &update.deltas {
            if delta.snapshot.is_dead {
                entities.remove(&delta.entity_id);
            } else {
                entities.insert(delta.entity_id.clone(), delta.snapshot.clone());
            }
        }

        self.snapshots.push_back(BufferedSnapshot {
            tick: update.tick,
            server_time_ms: update.timestamp_ms,
            received_at_ms,
            entities,
            events: update.events.clone(),
        });
        self.trim();
        true
    }

    fn trim(&mut self) {
        while self.snapshots.len() > self.max_snapshots && self.snapshots.len() > TRIM_FLOOR {
            self.snapshots.pop_front();
        }
        while self.snapshots.len() > TRIM_FLOOR {
            let span = {
                let oldest = self.snapshots.front().unwrap();
                let newest = self.snapshots.back().unwrap();
                newest.received_at_ms.saturating_sub(oldest.received_at_ms)
            };
            if span <= self.buffer_duration_ms {
                break;
            }
            self.snapshots.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.synchronized = false;
    }

    pub fn latest(&self) -> Option<&BufferedSnapshot> {
        self.snapshots.back()
    }

    pub fn oldest(&self) -> Option<&BufferedSnapshot> {
        self.snapshots.front()
    }

    pub fn get(&self, tick: Tick) -> Option<&BufferedSnapshot> {
        self.snapshots.iter().find(|s| s.tick == tick)
    }

    pub fn entries(&self) -> impl Iterator<Item = &BufferedSnapshot> {
        self.snapshots.iter()
    }

    /// Offset such that `server_time ~= local_now - offset`.
    pub fn server_time_offset_ms(&self) -> f64 {
        self.server_time_offset_ms
    }

    /// The two entries bracketing `target_ms` in local arrival time:
    /// `(before, Some(after))` when bracketed, `(oldest, None)` when the
    /// target predates the buffer, `(newest, None)` when it outruns it.
    pub fn bracketing(
        &self,
        target_ms: u64,
    ) -> Option<(&BufferedSnapshot, Option<&BufferedSnapshot>)> {
        if self.snapshots.is_empty() {
            return None;
        }
        let oldest = self.snapshots.front().unwrap();
        if target_ms < oldest.received_at_ms {
            return Some((oldest, None));
        }

        for i in 0..self.snapshots.len() - 1 {
            let before = &self.snapshots[i];
            let after = &self.snapshots[i + 1];
            if before.received_at_ms <= target_ms && target_ms <= after.received_at_ms {
                return Some((before, Some(after)));
            }
        }
        Some((self.snapshots.back().unwrap(), None))
    }

    /// Mean gap between consecutive snapshot arrivals; a feel for how much
    /// buffering the interpolator has to work with.
    pub fn average_arrival_gap_ms(&self) -> f64 {
        if self.snapshots.len() < 2 {
            return 0.0;
        }
        let oldest = self.snapshots.front().unwrap().received_at_ms;
        let newest = self.snapshots.back().unwrap().received_at_ms;
        (newest - oldest) as f64 / (self.snapshots.len() - 1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riftline::{EntityDelta, EntityKind, InputAck, PlayerId, TeamId};

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

    fn full(tick: Tick, timestamp_ms: u64, snaps: Vec<EntitySnapshot>) -> FullSnapshot {
        FullSnapshot {
            tick,
            timestamp_ms,
            entities: snaps,
            events: Vec::new(),
        }
    }

    fn update(tick: Tick, timestamp_ms: u64, deltas: Vec<EntitySnapshot>) -> StateUpdate {
        StateUpdate {
            tick,
            timestamp_ms,
            game_time_ms: timestamp_ms,
            input_acks: vec![InputAck {
                player_id: PlayerId::new("p1"),
                seq: 0,
            }],
            deltas: deltas
                .into_iter()
                .map(|s| EntityDelta {
                    entity_id: s.entity_id.clone(),
                    change_mask: 0xFF,
                    snapshot: s,
                })
                .collect(),
            events: Vec::new(),
        }
    }

    #[test]
    fn full_then_zero_deltas_is_identity() {
        let mut buffer = StateBuffer::new(16, 2000);
        buffer.apply_full(&full(10, 80, vec![snapshot("a", 1.0), snapshot("b", 2.0)]), 100);
        let baseline = buffer.latest().unwrap().entities.clone();

        buffer.apply_update(&update(11, 88, Vec::new()), 108);
        buffer.apply_update(&update(12, 96, Vec::new()), 116);

        assert_eq!(buffer.latest().unwrap().entities, baseline);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn delta_overwrites_changed_entity_only() {
        let mut buffer = StateBuffer::new(16, 2000);
        buffer.apply_full(&full(10, 80, vec![snapshot("a", 1.0), snapshot("b", 2.0)]), 100);
        buffer.apply_update(&update(11, 88, vec![snapshot("a", 5.0)]), 108);

        let latest = buffer.latest().unwrap();
        assert_eq!(latest.entities[&EntityId::new("a")].x, 5.0);
        assert_eq!(latest.entities[&EntityId::new("b")].x, 2.0);
    }

    #[test]
    fn dead_delta_purges_entity() {
        let mut buffer = StateBuffer::new(16, 2000);
        buffer.apply_full(&full(10, 80, vec![snapshot("a", 1.0), snapshot("b", 2.0)]), 100);

        let mut dead = snapshot("b", 2.0);
        dead.is_dead = true;
        buffer.apply_update(&update(11, 88, vec![dead]), 108);

        let latest = buffer.latest().unwrap();
        assert!(!latest.entities.contains_key(&EntityId::new("b")));
        assert!(latest.entities.contains_key(&EntityId::new("a")));
        // The entry for tick 10 still remembers b; history is immutable.
        assert!(buffer.get(10).unwrap().entities.contains_key(&EntityId::new("b")));
    }

    #[test]
    fn delta_before_baseline_is_skipped() {
        let mut buffer = StateBuffer::new(16, 2000);
        assert!(!buffer.apply_update(&update(5, 40, vec![snapshot("a", 1.0)]), 50));
        assert!(buffer.is_empty());
    }

    #[test]
    fn stale_tick_is_skipped() {
        let mut buffer = StateBuffer::new(16, 2000);
        buffer.apply_full(&full(10, 80, vec![snapshot("a", 1.0)]), 100);
        assert!(!buffer.apply_update(&update(10, 80, vec![snapshot("a", 9.0)]), 108));
        assert_eq!(buffer.latest().unwrap().entities[&EntityId::new("a")].x, 1.0);
    }

    #[test]
    fn offset_seeded_then_smoothed() {
        let mut buffer = StateBuffer::new(16, 2000);
        // Arrives 100ms after server stamped it.
        buffer.apply_full(&full(10, 1000, Vec::new()), 1100);
        assert_eq!(buffer.server_time_offset_ms(), 100.0);

        // A delta arriving with a 200ms offset pulls the EMA by a tenth.
        buffer.apply_update(&update(11, 1008, Vec::new()), 1208);
        assert!((buffer.server_time_offset_ms() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn capacity_trim_keeps_a_floor_of_two() {
        let mut buffer = StateBuffer::new(4, 100_000);
        buffer.apply_full(&full(0, 0, Vec::new()), 0);
        for i in 1..10u32 {
            buffer.apply_update(&update(i, (i * 8) as u64, Vec::new()), (i * 8) as u64);
        }
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.oldest().unwrap().tick, 6);
    }

    #[test]
    fn duration_trim_keeps_a_floor_of_two() {
        let mut buffer = StateBuffer::new(64, 100);
        buffer.apply_full(&full(0, 0, Vec::new()), 0);
        for i in 1..6u32 {
            buffer.apply_update(&update(i, (i * 80) as u64, Vec::new()), (i * 80) as u64);
        }
        // 80ms apart, 100ms window: only the last two fit, floor respected.
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn bracketing_cases() {
        let mut buffer = StateBuffer::new(16, 100_000);
        buffer.apply_full(&full(0, 0, Vec::new()), 100);
        buffer.apply_update(&update(1, 8, Vec::new()), 200);
        buffer.apply_update(&update(2, 16, Vec::new()), 300);

        // Before the oldest entry.
        let (before, after) = buffer.bracketing(50).unwrap();
        assert_eq!(before.tick, 0);
        assert!(after.is_none());

        // Bracketed.
        let (before, after) = buffer.bracketing(250).unwrap();
        assert_eq!(before.tick, 1);
        assert_eq!(after.unwrap().tick, 2);

        // Past the newest entry.
        let (before, after) = buffer.bracketing(900).unwrap();
        assert_eq!(before.tick, 2);
        assert!(after.is_none());
    }
}
