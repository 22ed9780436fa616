use std::collections::VecDeque;

use glam::Vec2;

use riftline::{ClientInput, InputKind, InputPayload, InputSeq, NetcodeConfig};

/// One fixed-tick step of movement. Pure: the same `(input, pos, speed, dt)`
/// always yields the same position, which is what makes server-side replay
/// and client-side reconciliation agree.
pub fn apply_input(input: &ClientInput, pos: Vec2, speed: f32, dt: f32) -> Vec2 {
    match (input.kind, &input.payload) {
        (InputKind::Move | InputKind::AttackMove, InputPayload::Point { x, y }) => {
            let target = Vec2::new(*x, *y);
            let to_target = target - pos;
            let step = speed * dt;
            if to_target.length() <= step {
                target
            } else {
                pos + to_target.normalize() * step
            }
        }
        // Stop and target-unit orders change intent, not position; their
        // effects surface through server deltas.
        _ => pos,
    }
}

#[derive(Debug, Clone)]
pub struct PendingInput {
    pub seq: InputSeq,
    pub input: ClientInput,
    pub predicted_pos: Vec2,
    pub local_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Error beyond the snap threshold: rendered position set exactly.
    Snapped,
    /// Error between the thresholds: one smoothing step toward truth.
    Smoothed,
    /// Prediction within tolerance: rendered position untouched.
    Held,
}

#[derive(Debug, Clone, Copy)]
pub struct Reconciliation {
    pub error: f32,
    pub correction: Correction,
}

/// Keeps the controlled entity responsive and convergent: movement inputs
/// apply to the rendered position immediately, and every authoritative
/// update is reconciled by replaying the not-yet-acknowledged inputs on top
/// of the server position.
#[derive(Debug)]
pub struct Reconciler {
    snap_threshold: f32,
    correction_threshold: f32,
    smoothing_factor: f32,
    max_pending: usize,
    dt: f32,
    movement_speed: f32,
    pending: VecDeque<PendingInput>,
    rendered_pos: Vec2,
    /// Destination of the last movement order; the rendered position keeps
    /// walking toward it between server updates.
    active_target: Option<Vec2>,
    last_error: f32,
    snap_times_ms: VecDeque<u64>,
}

impl Reconciler {
    pub fn new(config: &NetcodeConfig, movement_speed: f32) -> Self {
        Self {
            snap_threshold: config.snap_threshold,
            correction_threshold: config.correction_threshold,
            smoothing_factor: config.smoothing_factor,
            max_pending: config.max_pending_inputs,
            dt: config.dt(),
            movement_speed,
            pending: VecDeque::with_capacity(config.max_pending_inputs),
            rendered_pos: Vec2::ZERO,
            active_target: None,
            last_error: 0.0,
            snap_times_ms: VecDeque::new(),
        }
    }

    /// Authoritative starting point, from the full state.
    pub fn seed(&mut self, pos: Vec2) {
        self.pending.clear();
        self.rendered_pos = pos;
        self.active_target = None;
        self.last_error = 0.0;
    }

    pub fn set_movement_speed(&mut self, speed: f32) {
        self.movement_speed = speed;
    }

    /// Predict a submitted input. Only the movement family moves the local
    /// position; everything else waits for the server.
    pub fn predict(&mut self, input: &ClientInput, local_time_ms: u64) {
        if !input.kind.is_movement() {
            return;
        }
        self.rendered_pos = apply_input(input, self.rendered_pos, self.movement_speed, self.dt);
        match (input.kind, &input.payload) {
            (InputKind::Move | InputKind::AttackMove, InputPayload::Point { x, y }) => {
                self.active_target = Some(Vec2::new(*x, *y));
            }
            (InputKind::Stop, _) => self.active_target = None,
            _ => {}
        }
        if self.pending.len() >= self.max_pending {
            self.pending.pop_front();
        }
        self.pending.push_back(PendingInput {
            seq: input.seq,
            input: input.clone(),
            predicted_pos: self.rendered_pos,
            local_time_ms,
        });
    }

    /// Frame-side extrapolation: keep walking toward the active movement
    /// order at the authoritative speed, exactly like the server will.
    pub fn advance(&mut self, dt: f32) {
        let Some(target) = self.active_target else {
            return;
        };
        let to_target = target - self.rendered_pos;
        let step = self.movement_speed * dt;
        if to_target.length() <= step {
            self.rendered_pos = target;
            self.active_target = None;
        } else {
            self.rendered_pos += to_target.normalize() * step;
        }
    }

    /// Fold one authoritative update for the controlled entity: prune acked
    /// inputs, replay the rest on top of the server position, then snap,
    /// smooth, or hold by error magnitude.
    pub fn reconcile(
        &mut self,
        server_pos: Vec2,
        acked_seq: InputSeq,
        now_ms: u64,
    ) -> Reconciliation {
        while self.pending.front().is_some_and(|p| p.seq <= acked_seq) {
            self.pending.pop_front();
        }

        let mut corrected = server_pos;
        for pending in &self.pending {
            corrected = apply_input(&pending.input, corrected, self.movement_speed, self.dt);
        }

        let error = self.rendered_pos.distance(corrected);
        self.last_error = error;

        let correction = if error >= self.snap_threshold {
            self.rendered_pos = corrected;
            self.record_snap(now_ms);
            Correction::Snapped
        } else if error >= self.correction_threshold {
            self.rendered_pos = self.rendered_pos.lerp(corrected, self.smoothing_factor);
            Correction::Smoothed
        } else {
            Correction::Held
        };

        Reconciliation { error, correction }
    }

    pub fn rendered_pos(&self) -> Vec2 {
        self.rendered_pos
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_seqs(&self) -> Vec<InputSeq> {
        self.pending.iter().map(|p| p.seq).collect()
    }

    pub fn last_error(&self) -> f32 {
        self.last_error
    }

    pub fn snaps_in_last_second(&self, now_ms: u64) -> usize {
        self.snap_times_ms
            .iter()
            .filter(|&&t| t + 1000 > now_ms)
            .count()
    }

    fn record_snap(&mut self, now_ms: u64) {
        while self
            .snap_times_ms
            .front()
            .is_some_and(|&t| t + 1000 <= now_ms)
        {
            self.snap_times_ms.pop_front();
        }
        self.snap_times_ms.push_back(now_ms);
    }
}
