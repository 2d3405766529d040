use crate::snapshot::Pose;
use crate::vehicle::VehicleClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemotePose {
    pub id: String,
    pub pose: Pose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    pub vehicle: VehicleClass,
}

/// Draws remote vehicles. Receives copies of poses only.
pub trait Renderer {
    fn update_remote_entities(&mut self, poses: &[RemotePose]);

    fn remove_remote_entity(&mut self, id: &str);
}

/// User-facing surface for connectivity notices and the player list.
pub trait Notifier {
    fn notify(&mut self, message: &str, severity: Severity);

    fn refresh_roster(&mut self, entries: &[RosterEntry]);
}
