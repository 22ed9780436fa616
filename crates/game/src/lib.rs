pub mod config;
pub mod event;
pub mod net;
pub mod simulation;
pub mod world;

pub use config::{NetcodeConfig, RateFamily, RateLimitTable, DEFAULT_TICK_RATE};
pub use event::{EventLog, GameEvent};
pub use net::{
    ChangeMask, ClientInput, ClientMessage, DrainedInputs, EmitOutcome, EntityDelta,
    EntitySnapshot, FrameDecoder, FullSnapshot, FullVisibility, InputAck, InputGateway, InputKind,
    InputPayload, InputRejection, PlayerInfo, PlayerSession, ServerMessage, SessionRegistry,
    SinkError, SnapshotEncoder, SnapshotSink, StateUpdate, Visibility, WireError,
};
pub use simulation::{CountingAllocator, MetricsSnapshot, TickEngine, TickMetrics};
pub use world::{
    BehaviorError, EntityBehavior, EntityCore, EntityId, EntityKind, InputSeq, PlayerId, TeamId,
    Tick, Tombstone, World, WorldCtx, WorldError,
};
