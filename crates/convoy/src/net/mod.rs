mod connection;
mod framing;
mod latency;
mod memory;
mod protocol;
mod stats;
mod transport;

pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, DEFAULT_RECONNECT_DELAY_MS, FixedDelay,
    ReconnectPolicy,
};
pub use framing::{FrameDecoder, frame};
pub use latency::{DEFAULT_PING_INTERVAL_MS, LatencyTracker};
pub use memory::{MemoryRemote, MemoryTransport};
pub use protocol::{
    ChatBroadcast, ChatSend, ClientInit, ClientMessage, CodecError, ControlState, Decoded,
    DEFAULT_PORT, InputAck, InputCommand, MAX_CHAT_CHARS, MAX_FRAME_SIZE, MessageKind, PlayerInfo,
    PlayerLeft, PlayerPosition, PositionUpdate, ServerInit, ServerMessage, Timestamp,
    WireMessage, WireTransform, cap_chat, decode, encode, quat_to_rotation, rotation_to_quat,
    vec3_to_wire,
};
pub use stats::NetworkStats;
pub use transport::{TcpTransport, Transport, TransportError, TransportEvent};
