pub mod encoder;
pub mod framing;
pub mod gateway;
pub mod protocol;
pub mod session;

pub use encoder::{EmitOutcome, FullVisibility, SnapshotEncoder, Visibility};
pub use framing::{encode_frame, FrameDecoder, MAX_FRAME_SIZE};
pub use gateway::{DrainedInputs, InputGateway, InputRejection};
pub use protocol::{
    ChangeMask, ClientInput, ClientMessage, EntityDelta, EntitySnapshot, FullSnapshot, InputAck,
    InputKind, InputPayload, PlayerInfo, ServerMessage, StateUpdate, WireError, PROTOCOL_VERSION,
};
pub use session::{PlayerSession, SessionRegistry, SinkError, SnapshotSink};
