use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::protocol::InputKind;

pub const DEFAULT_TICK_RATE: u32 = 125;

/// Every tunable of the netcode core, shared verbatim between server and
/// client so both sides agree on timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetcodeConfig {
    pub tick_rate: u32,
    pub tick_budget_ms: u64,
    pub interpolation_delay_ms: u64,
    pub snap_threshold: f32,
    pub correction_threshold: f32,
    pub smoothing_factor: f32,
    pub max_pending_inputs: usize,
    pub max_snapshots: usize,
    pub buffer_duration_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub rate_limits: RateLimitTable,
}

impl Default for NetcodeConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            tick_budget_ms: 8,
            interpolation_delay_ms: 100,
            snap_threshold: 100.0,
            correction_threshold: 5.0,
            smoothing_factor: 0.3,
            max_pending_inputs: 60,
            max_snapshots: 250,
            buffer_duration_ms: 2000,
            reconnect_attempts: 5,
            reconnect_delay_ms: 2000,
            heartbeat_interval_ms: 5000,
            rate_limits: RateLimitTable::default(),
        }
    }
}

impl NetcodeConfig {
    /// Simulated seconds consumed by one tick.
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate))
    }

    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }
}

/// Per-kind caps on accepted inputs within any rolling one-second window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitTable {
    pub movement_per_sec: u32,
    pub ability_per_sec: u32,
    pub progression_per_sec: u32,
    pub recall_per_sec: u32,
    pub ping_per_sec: u32,
    pub chat_per_sec: u32,
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self {
            movement_per_sec: 20,
            ability_per_sec: 8,
            progression_per_sec: 5,
            recall_per_sec: 2,
            ping_per_sec: 5,
            chat_per_sec: 3,
        }
    }
}

/// Inputs sharing a cap share a window: spamming MOVE eats the budget of
/// ATTACK_MOVE too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateFamily {
    Movement,
    Ability,
    Progression,
    Recall,
    Ping,
    Chat,
}

impl RateFamily {
    pub fn of(kind: InputKind) -> Self {
        match kind {
            InputKind::Move | InputKind::AttackMove | InputKind::TargetUnit | InputKind::Stop => {
                RateFamily::Movement
            }
            InputKind::Ability => RateFamily::Ability,
            InputKind::LevelUp | InputKind::BuyItem | InputKind::SellItem => {
                RateFamily::Progression
            }
            InputKind::Recall => RateFamily::Recall,
            InputKind::Ping => RateFamily::Ping,
            InputKind::Chat => RateFamily::Chat,
        }
    }
}

impl RateLimitTable {
    pub fn cap(&self, family: RateFamily) -> u32 {
        match family {
            RateFamily::Movement => self.movement_per_sec,
            RateFamily::Ability => self.ability_per_sec,
            RateFamily::Progression => self.progression_per_sec,
            RateFamily::Recall => self.recall_per_sec,
            RateFamily::Ping => self.ping_per_sec,
            RateFamily::Chat => self.chat_per_sec,
        }
    }

    pub fn cap_for(&self, kind: InputKind) -> u32 {
        self.cap(RateFamily::of(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings() {
        let config = NetcodeConfig::default();
        assert_eq!(config.tick_rate, 125);
        assert_eq!(config.tick_budget_ms, 8);
        assert_eq!(config.interpolation_delay_ms, 100);
        assert_eq!(config.snap_threshold, 100.0);
        assert_eq!(config.correction_threshold, 5.0);
        assert_eq!(config.max_pending_inputs, 60);
        assert_eq!(config.max_snapshots, 250);
        assert!((config.dt() - 0.008).abs() < 1e-6);
    }

    #[test]
    fn rate_families() {
        let table = RateLimitTable::default();
        assert_eq!(table.cap_for(InputKind::Move), 20);
        assert_eq!(table.cap_for(InputKind::AttackMove), 20);
        assert_eq!(table.cap_for(InputKind::Ability), 8);
        assert_eq!(table.cap_for(InputKind::BuyItem), 5);
        assert_eq!(table.cap_for(InputKind::Recall), 2);
        assert_eq!(table.cap_for(InputKind::Chat), 3);
    }
}
