pub mod net;
pub mod reconcile;
pub mod session;
pub mod snapshot;
pub mod vehicle;

pub use net::{
    ClientMessage, ConnectionManager, ConnectionState, ControlState, DEFAULT_PORT, FixedDelay,
    LatencyTracker, MemoryRemote, MemoryTransport, NetworkStats, ReconnectPolicy, ServerMessage,
    TcpTransport, Transport, TransportError, TransportEvent,
};
pub use reconcile::{Correction, CorrectionBlend, InputReconciler, PendingInput, Transform};
pub use session::{
    LocalState, Notifier, ReconnectConfig, RemoteEntity, RemotePose, Renderer, Roster,
    RosterEntry, Session, SessionConfig, SessionError, SessionEvent, Severity,
};
pub use snapshot::{InterpolationConfig, Pose, Snapshot, SnapshotBuffer, SnapshotInterpolator};
pub use vehicle::{VehicleClass, VehicleStats};
