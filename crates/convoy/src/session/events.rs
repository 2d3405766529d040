use crate::net::ConnectionState;
use crate::reconcile::Correction;

use super::collaborators::RosterEntry;

/// Outward notifications, drained by the consumer with
/// [`Session::drain_events`](super::Session::drain_events).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RosterChanged(Vec<RosterEntry>),
    ChatReceived {
        sender_id: String,
        sender_name: String,
        text: String,
    },
    Correction(Correction),
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    WorldSeed(u32),
}
