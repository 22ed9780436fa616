use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::NetcodeConfig;
use crate::net::encoder::{EmitOutcome, SnapshotEncoder};
use crate::net::gateway::InputGateway;
use crate::net::session::SessionRegistry;
use crate::world::{InputSeq, PlayerId, World};

use super::metrics::{allocated_bytes, MetricsSnapshot, TickMetrics};

/// Fixed-timestep scheduler owning the World for the duration of each tick.
///
/// Each scheduled slot consumes exactly one simulated step of `1/tick_rate`
/// seconds: a slow tick starts the next one immediately and is counted as a
/// budget overrun, never compensated with extra simulation steps. A panic
/// inside `World::update` propagates and ends the game; per-entity behavior
/// faults are contained by the World itself.
pub struct TickEngine {
    config: NetcodeConfig,
    world: World,
    gateway: Arc<Mutex<InputGateway>>,
    sessions: Arc<Mutex<SessionRegistry>>,
    encoder: SnapshotEncoder,
    metrics: TickMetrics,
    shared_metrics: Arc<Mutex<MetricsSnapshot>>,
    running: Arc<AtomicBool>,
    commands_tx: mpsc::Sender<WorldCommand>,
    commands_rx: mpsc::Receiver<WorldCommand>,
}

/// Deferred mutation executed by the engine between ticks; how the session
/// layer spawns champions into a world it does not own.
pub type WorldCommand = Box<dyn FnOnce(&mut World) + Send>;

impl TickEngine {
    pub fn new(
        config: NetcodeConfig,
        world: World,
        gateway: Arc<Mutex<InputGateway>>,
        sessions: Arc<Mutex<SessionRegistry>>,
        encoder: SnapshotEncoder,
    ) -> Self {
        let metrics = TickMetrics::new(
            config.tick_duration().as_secs_f64() * 1000.0,
            config.tick_budget_ms as f64,
        );
        let (commands_tx, commands_rx) = mpsc::channel();
        Self {
            config,
            world,
            gateway,
            sessions,
            encoder,
            metrics,
            shared_metrics: Arc::new(Mutex::new(MetricsSnapshot::default())),
            running: Arc::new(AtomicBool::new(true)),
            commands_tx,
            commands_rx,
        }
    }

    /// Handle for queueing world mutations from outside the simulation
    /// thread; drained before the next tick's input processing.
    pub fn command_sender(&self) -> mpsc::Sender<WorldCommand> {
        self.commands_tx.clone()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Shared handle the ops console scrapes; refreshed every tick.
    pub fn metrics_handle(&self) -> Arc<Mutex<MetricsSnapshot>> {
        Arc::clone(&self.shared_metrics)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Drive ticks until `running` is cleared. Blocks the calling thread;
    /// the server runs this on a dedicated simulation thread.
    pub fn run(&mut self) {
        let period = self.config.tick_duration();
        log::info!(
            "tick engine starting at {} Hz ({:?} per tick)",
            self.config.tick_rate,
            period
        );

        let mut last_start: Option<Instant> = None;
        while self.running.load(Ordering::SeqCst) {
            let t_start = Instant::now();
            if let Some(prev) = last_start {
                self.metrics
                    .record_interval(t_start.duration_since(prev).as_secs_f64() * 1000.0);
            }
            last_start = Some(t_start);

            self.tick_once(current_time_ms());

            let elapsed = t_start.elapsed();
            self.metrics.record_tick(elapsed.as_secs_f64() * 1000.0);
            self.metrics.record_heap(allocated_bytes() as u64);
            if let Ok(mut shared) = self.shared_metrics.lock() {
                *shared = self.metrics.snapshot();
            }

            if elapsed < period {
                std::thread::sleep(period - elapsed);
            }
            // Overrun: no sleep, next slot starts immediately.
        }

        log::info!(
            "tick engine stopped at tick {} ({})",
            self.world.tick(),
            self.metrics.snapshot()
        );
    }

    /// One complete tick: drain, simulate, acknowledge, emit, advance.
    /// Public so tests and embedding servers can step without the timer.
    pub fn tick_once(&mut self, now_ms: u64) {
        while let Ok(command) = self.commands_rx.try_recv() {
            command(&mut self.world);
        }

        let drained = self
            .gateway
            .lock()
            .expect("input gateway lock poisoned")
            .drain();

        let batch_acks: Vec<(PlayerId, InputSeq)> = drained
            .iter()
            .filter_map(|batch| batch.highest_seq().map(|seq| (batch.player_id.clone(), seq)))
            .collect();

        self.world.update(self.config.dt(), &drained);

        {
            let mut gateway = self.gateway.lock().expect("input gateway lock poisoned");
            // Inputs addressed to a dead champion are undefined; truncate.
            for player_id in self.world.dead_controllers() {
                gateway.clear_queue(&player_id);
            }
        }

        let mut closed = Vec::new();
        {
            let mut sessions = self.sessions.lock().expect("session registry lock poisoned");
            for (player_id, seq) in &batch_acks {
                if let Some(session) = sessions.get_mut(player_id) {
                    session.advance_input_ack(*seq);
                }
            }

            for session in sessions.iter_mut() {
                if self.encoder.emit(&self.world, session, now_ms) == EmitOutcome::Closed {
                    closed.push(session.player_id.clone());
                }
            }

            let idle_window = self.config.heartbeat_interval_ms * 6;
            closed.extend(sessions.idle_players(now_ms, idle_window));
        }
        for player_id in closed {
            self.expire_session(&player_id);
        }

        self.world.advance_tick();
    }

    /// Tear a session down completely: registry entry, controlled entity,
    /// and every trace in the gateway.
    pub fn expire_session(&mut self, player_id: &PlayerId) {
        log::info!("session {player_id} expired");
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(player_id);
        }
        if let Some(entity_id) = self.world.controller_of(player_id).cloned() {
            self.world.schedule_despawn(entity_id);
        }
        self.world.unbind_controller(player_id);
        if let Ok(mut gateway) = self.gateway.lock() {
            gateway.forget_player(player_id);
        }
    }
}

fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
