use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::config::{RateFamily, RateLimitTable};
use crate::world::{InputSeq, PlayerId};

use super::protocol::{ClientInput, InputKind, InputPayload};

const RATE_WINDOW_MS: u64 = 1000;
const DEFAULT_QUEUE_CAP: usize = 128;

/// Why an input was refused admission. Rejections are silent on the wire;
/// the gateway only logs them at debug verbosity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputRejection {
    #[error("old_sequence: seq {seq} <= acked {last_acked}")]
    OldSequence { seq: InputSeq, last_acked: InputSeq },
    #[error("invalid_type: payload does not fit the input kind")]
    InvalidType,
    #[error("rate_limited: {0:?} window exhausted")]
    RateLimited(InputKind),
    #[error("invalid_payload: {0}")]
    InvalidPayload(&'static str),
}

/// Inputs drained for one player, seq-ascending.
#[derive(Debug, Clone)]
pub struct DrainedInputs {
    pub player_id: PlayerId,
    pub inputs: Vec<ClientInput>,
}

impl DrainedInputs {
    /// Highest sequence in the batch; what the server acknowledges after the
    /// tick consumes it.
    pub fn highest_seq(&self) -> Option<InputSeq> {
        self.inputs.last().map(|input| input.seq)
    }
}

#[derive(Debug, Default)]
struct PlayerQueue {
    queue: VecDeque<ClientInput>,
    last_acked_seq: InputSeq,
    accepted_at: HashMap<RateFamily, VecDeque<u64>>,
}

/// Admits validated player inputs into per-player queues that the tick
/// engine drains atomically at the start of each tick. The gateway is the
/// sole owner of the queues and of per-player acknowledgement state.
#[derive(Debug)]
pub struct InputGateway {
    limits: RateLimitTable,
    queue_cap: usize,
    players: BTreeMap<PlayerId, PlayerQueue>,
}

impl InputGateway {
    pub fn new(limits: RateLimitTable) -> Self {
        Self {
            limits,
            queue_cap: DEFAULT_QUEUE_CAP,
            players: BTreeMap::new(),
        }
    }

    pub fn with_queue_cap(limits: RateLimitTable, queue_cap: usize) -> Self {
        Self {
            limits,
            queue_cap,
            players: BTreeMap::new(),
        }
    }

    /// Ensure a queue exists for `player_id`. Idempotent; a reconnecting
    /// player keeps their previous `last_acked_seq`.
    pub fn register_player(&mut self, player_id: PlayerId) {
        self.players.entry(player_id).or_default();
    }

    /// Admission pipeline: sequence monotonicity, kind/payload pairing,
    /// rolling per-kind rate cap, payload well-formedness.
    pub fn admit(
        &mut self,
        player_id: &PlayerId,
        input: ClientInput,
        now_ms: u64,
    ) -> Result<(), InputRejection> {
        let Some(player) = self.players.get_mut(player_id) else {
            log::debug!("input from unregistered player {player_id} dropped");
            return Err(InputRejection::InvalidPayload("unknown player"));
        };

        if input.seq <= player.last_acked_seq {
            let rejection = InputRejection::OldSequence {
                seq: input.seq,
                last_acked: player.last_acked_seq,
            };
            log::debug!("{player_id}: {rejection}");
            return Err(rejection);
        }
        if let Some(queued) = player.queue.back()
            && input.seq <= queued.seq
        {
            let rejection = InputRejection::OldSequence {
                seq: input.seq,
                last_acked: queued.seq,
            };
            log::debug!("{player_id}: {rejection}");
            return Err(rejection);
        }

        if !input.payload_matches_kind() {
            log::debug!("{player_id}: invalid_type for {:?}", input.kind);
            return Err(InputRejection::InvalidType);
        }

        let family = RateFamily::of(input.kind);
        let cap = self.limits.cap(family);
        let window = player.accepted_at.entry(family).or_default();
        while window.front().is_some_and(|&t| t + RATE_WINDOW_MS <= now_ms) {
            window.pop_front();
        }
        if window.len() as u32 >= cap {
            log::debug!("{player_id}: rate_limited {:?}", input.kind);
            return Err(InputRejection::RateLimited(input.kind));
        }

        validate_payload(&input.payload)?;

        window.push_back(now_ms);
        if player.queue.len() >= self.queue_cap {
            // Bounded queue: shed the oldest rather than grow without limit.
            player.queue.pop_front();
        }
        player.queue.push_back(input);
        Ok(())
    }

    /// Move every queue's contents out in one step. Players are visited in
    /// stable id order; within a player, inputs stay seq-ascending. The ack
    /// cursor advances here: a drained input is consumed by the tick no
    /// matter how the World disposes of it, and must never be admitted
    /// again.
    pub fn drain(&mut self) -> Vec<DrainedInputs> {
        self.players
            .iter_mut()
            .filter(|(_, p)| !p.queue.is_empty())
            .map(|(player_id, p)| {
                let inputs: Vec<ClientInput> = p.queue.drain(..).collect();
                if let Some(last) = inputs.last()
                    && last.seq > p.last_acked_seq
                {
                    p.last_acked_seq = last.seq;
                }
                DrainedInputs {
                    player_id: player_id.clone(),
                    inputs,
                }
            })
            .collect()
    }

    /// Advance a player's acknowledged sequence. Only ever moves forward.
    pub fn commit_ack(&mut self, player_id: &PlayerId, seq: InputSeq) {
        if let Some(player) = self.players.get_mut(player_id)
            && seq > player.last_acked_seq
        {
            player.last_acked_seq = seq;
        }
    }

    pub fn last_acked_seq(&self, player_id: &PlayerId) -> InputSeq {
        self.players
            .get(player_id)
            .map(|p| p.last_acked_seq)
            .unwrap_or(0)
    }

    /// Drop queued inputs addressed to a player, e.g. when their champion
    /// dies. Rate and ack state are untouched.
    pub fn clear_queue(&mut self, player_id: &PlayerId) {
        if let Some(player) = self.players.get_mut(player_id) {
            player.queue.clear();
        }
    }

    /// Disconnect: pending inputs and rate-limit state go away, the acked
    /// sequence survives so a reconnecting client resumes correctly.
    pub fn clear_player(&mut self, player_id: &PlayerId) {
        if let Some(player) = self.players.get_mut(player_id) {
            player.queue.clear();
            player.accepted_at.clear();
        }
    }

    /// Session expiry: everything about the player is forgotten.
    pub fn forget_player(&mut self, player_id: &PlayerId) {
        self.players.remove(player_id);
    }

    pub fn queued_len(&self, player_id: &PlayerId) -> usize {
        self.players
            .get(player_id)
            .map(|p| p.queue.len())
            .unwrap_or(0)
    }
}

fn validate_payload(payload: &InputPayload) -> Result<(), InputRejection> {
    match payload {
        InputPayload::Point { x, y } => {
            if !x.is_finite() || !y.is_finite() {
                return Err(InputRejection::InvalidPayload("non-finite coordinates"));
            }
        }
        InputPayload::Unit { target } => {
            if target.is_empty() {
                return Err(InputRejection::InvalidPayload("empty target id"));
            }
        }
        InputPayload::Ability { x, y, target, .. } => {
            if !x.is_finite() || !y.is_finite() {
                return Err(InputRejection::InvalidPayload("non-finite coordinates"));
            }
            if let Some(target) = target
                && target.is_empty()
            {
                return Err(InputRejection::InvalidPayload("empty target id"));
            }
        }
        InputPayload::Chat { text } => {
            if text.is_empty() {
                return Err(InputRejection::InvalidPayload("empty chat line"));
            }
        }
        InputPayload::Slot { .. } | InputPayload::Item { .. } | InputPayload::Empty => {}
    }
    Ok(())
}
