use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    PeerConnected {
        addr: SocketAddr,
    },
    PlayerJoined {
        id: String,
        name: String,
        addr: SocketAddr,
    },
    PlayerLeft {
        id: String,
        reason: DisconnectReason,
    },
    PeerDropped {
        addr: SocketAddr,
        reason: DisconnectReason,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Closed,
    Error,
    Timeout,
    Replaced,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Closed => "disconnected",
            DisconnectReason::Error => "dropped after an error",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Replaced => "replaced by a newer connection",
        }
    }
}
