use glam::{EulerRot, Quat, Vec3};
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

pub const DEFAULT_PORT: u16 = 27015;
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
pub const MAX_CHAT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Init = 1,
    PlayerJoined = 2,
    PlayerLeft = 3,
    Position = 4,
    PlayerPosition = 5,
    Chat = 6,
    Ping = 7,
    Pong = 8,
    InputAck = 9,
    Input = 10,
}

impl MessageKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let kind = match byte {
            1 => Self::Init,
            2 => Self::PlayerJoined,
            3 => Self::PlayerLeft,
            4 => Self::Position,
            5 => Self::PlayerPosition,
            6 => Self::Chat,
            7 => Self::Ping,
            8 => Self::Pong,
            9 => Self::InputAck,
            10 => Self::Input,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::PlayerJoined => "playerJoined",
            Self::PlayerLeft => "playerLeft",
            Self::Position => "position",
            Self::PlayerPosition => "playerPosition",
            Self::Chat => "chat",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::InputAck => "inputAck",
            Self::Input => "input",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ClientInit {
    pub participant_id: String,
    pub display_name: String,
    pub vehicle_class: String,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub vehicle_class: String,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ServerInit {
    pub participant_id: String,
    pub world_seed: u32,
    pub players: Vec<PlayerInfo>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerLeft {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PositionUpdate {
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub velocity: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerPosition {
    pub id: String,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub velocity: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ChatSend {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ChatBroadcast {
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Timestamp {
    pub millis: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct WireTransform {
    pub position: [f32; 3],
    pub rotation: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct InputAck {
    pub id: u32,
    pub correction: Option<WireTransform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ControlState {
    pub throttle: f32,
    pub brake: f32,
    pub steering: f32,
    pub handbrake: bool,
}

impl ControlState {
    pub fn clamped(self) -> Self {
        Self {
            throttle: self.throttle.clamp(0.0, 1.0),
            brake: self.brake.clamp(0.0, 1.0),
            steering: self.steering.clamp(-1.0, 1.0),
            handbrake: self.handbrake,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct InputCommand {
    pub id: u32,
    pub control: ControlState,
}

/// Messages a client writes to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Init(ClientInit),
    Position(PositionUpdate),
    Chat(ChatSend),
    Ping(Timestamp),
    Input(InputCommand),
}

/// Messages a server writes to its clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Init(ServerInit),
    PlayerJoined(PlayerInfo),
    PlayerLeft(PlayerLeft),
    PlayerPosition(PlayerPosition),
    Chat(ChatBroadcast),
    Pong(Timestamp),
    InputAck(InputAck),
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization of {kind} failed: {error}")]
    Deserialize {
        kind: &'static str,
        error: rancor::Error,
    },
    #[error("empty frame")]
    Empty,
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    FrameTooLarge(usize),
}

/// Result of decoding one frame body.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<M> {
    Message(M),
    UnknownKind(u8),
}

pub trait WireMessage: Sized {
    fn kind(&self) -> MessageKind;

    fn encode_payload(&self) -> Result<AlignedVec, rancor::Error>;

    /// Returns `None` for kinds this side of the connection never receives.
    fn decode_payload(kind: MessageKind, payload: &[u8]) -> Option<Result<Self, rancor::Error>>;
}

impl WireMessage for ClientMessage {
    fn kind(&self) -> MessageKind {
        match self {
            Self::Init(_) => MessageKind::Init,
            Self::Position(_) => MessageKind::Position,
            Self::Chat(_) => MessageKind::Chat,
            Self::Ping(_) => MessageKind::Ping,
            Self::Input(_) => MessageKind::Input,
        }
    }

    fn encode_payload(&self) -> Result<AlignedVec, rancor::Error> {
        match self {
            Self::Init(init) => rkyv::to_bytes::<rancor::Error>(init),
            Self::Position(update) => rkyv::to_bytes::<rancor::Error>(update),
            Self::Chat(chat) => rkyv::to_bytes::<rancor::Error>(chat),
            Self::Ping(timestamp) => rkyv::to_bytes::<rancor::Error>(timestamp),
            Self::Input(command) => rkyv::to_bytes::<rancor::Error>(command),
        }
    }

    fn decode_payload(kind: MessageKind, payload: &[u8]) -> Option<Result<Self, rancor::Error>> {
        let decoded = match kind {
            MessageKind::Init => rkyv::from_bytes::<ClientInit, rancor::Error>(payload).map(Self::Init),
            MessageKind::Position => {
                rkyv::from_bytes::<PositionUpdate, rancor::Error>(payload).map(Self::Position)
            }
            MessageKind::Chat => rkyv::from_bytes::<ChatSend, rancor::Error>(payload).map(Self::Chat),
            MessageKind::Ping => rkyv::from_bytes::<Timestamp, rancor::Error>(payload).map(Self::Ping),
            MessageKind::Input => {
                rkyv::from_bytes::<InputCommand, rancor::Error>(payload).map(Self::Input)
            }
            _ => return None,
        };
        Some(decoded)
    }
}

impl WireMessage for ServerMessage {
    fn kind(&self) -> MessageKind {
        match self {
            Self::Init(_) => MessageKind::Init,
            Self::PlayerJoined(_) => MessageKind::PlayerJoined,
            Self::PlayerLeft(_) => MessageKind::PlayerLeft,
            Self::PlayerPosition(_) => MessageKind::PlayerPosition,
            Self::Chat(_) => MessageKind::Chat,
            Self::Pong(_) => MessageKind::Pong,
            Self::InputAck(_) => MessageKind::InputAck,
        }
    }

    fn encode_payload(&self) -> Result<AlignedVec, rancor::Error> {
        match self {
            Self::Init(init) => rkyv::to_bytes::<rancor::Error>(init),
            Self::PlayerJoined(info) => rkyv::to_bytes::<rancor::Error>(info),
            Self::PlayerLeft(left) => rkyv::to_bytes::<rancor::Error>(left),
            Self::PlayerPosition(update) => rkyv::to_bytes::<rancor::Error>(update),
            Self::Chat(chat) => rkyv::to_bytes::<rancor::Error>(chat),
            Self::Pong(timestamp) => rkyv::to_bytes::<rancor::Error>(timestamp),
            Self::InputAck(ack) => rkyv::to_bytes::<rancor::Error>(ack),
        }
    }

    fn decode_payload(kind: MessageKind, payload: &[u8]) -> Option<Result<Self, rancor::Error>> {
        let decoded = match kind {
            MessageKind::Init => rkyv::from_bytes::<ServerInit, rancor::Error>(payload).map(Self::Init),
            MessageKind::PlayerJoined => {
                rkyv::from_bytes::<PlayerInfo, rancor::Error>(payload).map(Self::PlayerJoined)
            }
            MessageKind::PlayerLeft => {
                rkyv::from_bytes::<PlayerLeft, rancor::Error>(payload).map(Self::PlayerLeft)
            }
            MessageKind::PlayerPosition => {
                rkyv::from_bytes::<PlayerPosition, rancor::Error>(payload).map(Self::PlayerPosition)
            }
            MessageKind::Chat => {
                rkyv::from_bytes::<ChatBroadcast, rancor::Error>(payload).map(Self::Chat)
            }
            MessageKind::Pong => rkyv::from_bytes::<Timestamp, rancor::Error>(payload).map(Self::Pong),
            MessageKind::InputAck => {
                rkyv::from_bytes::<InputAck, rancor::Error>(payload).map(Self::InputAck)
            }
            _ => return None,
        };
        Some(decoded)
    }
}

/// Encodes a message as a frame body: one kind byte followed by the archived payload.
pub fn encode<M: WireMessage>(message: &M) -> Result<Vec<u8>, CodecError> {
    let payload = message.encode_payload().map_err(CodecError::Serialize)?;
    let mut body = Vec::with_capacity(payload.len() + 1);
    body.push(message.kind() as u8);
    body.extend_from_slice(&payload);

    if body.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(body.len()));
    }
    Ok(body)
}

pub fn decode<M: WireMessage>(body: &[u8]) -> Result<Decoded<M>, CodecError> {
    let (&kind_byte, payload) = body.split_first().ok_or(CodecError::Empty)?;

    let Some(kind) = MessageKind::from_byte(kind_byte) else {
        return Ok(Decoded::UnknownKind(kind_byte));
    };

    // The payload starts one byte into the frame, so it has to be realigned
    // before rkyv validates it.
    let mut aligned = AlignedVec::<16>::with_capacity(payload.len());
    aligned.extend_from_slice(payload);

    match M::decode_payload(kind, &aligned[..]) {
        Some(Ok(message)) => Ok(Decoded::Message(message)),
        Some(Err(error)) => Err(CodecError::Deserialize {
            kind: kind.as_str(),
            error,
        }),
        None => Ok(Decoded::UnknownKind(kind_byte)),
    }
}

/// Wire rotations are Euler radians `[x, y, z]` applied yaw first.
pub fn rotation_to_quat(rotation: [f32; 3]) -> Quat {
    Quat::from_euler(EulerRot::YXZ, rotation[1], rotation[0], rotation[2]).normalize()
}

pub fn quat_to_rotation(orientation: Quat) -> [f32; 3] {
    let (yaw, pitch, roll) = orientation.to_euler(EulerRot::YXZ);
    [pitch, yaw, roll]
}

pub fn vec3_to_wire(v: Vec3) -> [f32; 3] {
    v.to_array()
}

/// Trims and truncates chat text to `MAX_CHAT_CHARS` characters.
pub fn cap_chat(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_CHAT_CHARS) {
        Some((byte_index, _)) => trimmed[..byte_index].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_roundtrip() {
        let message = ClientMessage::Init(ClientInit {
            participant_id: "player_1".into(),
            display_name: "Alice".into(),
            vehicle_class: "sports".into(),
        });

        let body = encode(&message).unwrap();
        assert_eq!(body[0], MessageKind::Init as u8);

        let decoded = decode::<ClientMessage>(&body).unwrap();
        assert_eq!(decoded, Decoded::Message(message));
    }

    #[test]
    fn test_input_ack_with_correction() {
        let message = ServerMessage::InputAck(InputAck {
            id: 42,
            correction: Some(WireTransform {
                position: [1.0, 0.5, -2.0],
                rotation: [0.0, 1.5, 0.0],
            }),
        });

        let body = encode(&message).unwrap();
        match decode::<ServerMessage>(&body).unwrap() {
            Decoded::Message(ServerMessage::InputAck(ack)) => {
                assert_eq!(ack.id, 42);
                assert_eq!(ack.correction.unwrap().position, [1.0, 0.5, -2.0]);
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_not_an_error() {
        let decoded = decode::<ServerMessage>(&[200, 1, 2, 3]).unwrap();
        assert_eq!(decoded, Decoded::UnknownKind(200));
    }

    #[test]
    fn test_wrong_direction_kind_is_unknown() {
        let body = encode(&ClientMessage::Ping(Timestamp { millis: 5 })).unwrap();
        let decoded = decode::<ServerMessage>(&body).unwrap();
        assert_eq!(decoded, Decoded::UnknownKind(MessageKind::Ping as u8));
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        assert!(matches!(
            decode::<ServerMessage>(&[MessageKind::PlayerJoined as u8, 0xff]),
            Err(CodecError::Deserialize { .. })
        ));
        assert!(matches!(decode::<ServerMessage>(&[]), Err(CodecError::Empty)));
    }

    #[test]
    fn test_rotation_conversion() {
        let rotation = [0.1, 2.0, -0.2];
        let back = quat_to_rotation(rotation_to_quat(rotation));
        for i in 0..3 {
            assert!((back[i] - rotation[i]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_cap_chat() {
        assert_eq!(cap_chat("  hi  "), "hi");
        let long: String = "é".repeat(MAX_CHAT_CHARS + 10);
        assert_eq!(cap_chat(&long).chars().count(), MAX_CHAT_CHARS);
    }
}
