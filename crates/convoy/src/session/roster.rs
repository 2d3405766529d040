use std::collections::HashMap;

use crate::snapshot::{Pose, Snapshot, SnapshotBuffer, SnapshotInterpolator};
use crate::vehicle::VehicleClass;

use super::collaborators::{RemotePose, RosterEntry};

#[derive(Debug, Clone)]
pub struct RemoteEntity {
    pub id: String,
    pub name: String,
    pub vehicle: VehicleClass,
    buffer: SnapshotBuffer,
    last_pose: Option<Pose>,
}

impl RemoteEntity {
    pub fn new(id: String, name: String, vehicle: VehicleClass, buffer: SnapshotBuffer) -> Self {
        Self {
            id,
            name,
            vehicle,
            buffer,
            last_pose: None,
        }
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    /// Most recent pose handed to the renderer.
    pub fn last_pose(&self) -> Option<&Pose> {
        self.last_pose.as_ref()
    }

    pub fn entry(&self) -> RosterEntry {
        RosterEntry {
            id: self.id.clone(),
            name: self.name.clone(),
            vehicle: self.vehicle,
        }
    }
}

#[derive(Debug, Default)]
pub struct Roster {
    entities: HashMap<String, RemoteEntity>,
}

impl Roster {
    /// Inserts or replaces the entity with the same id. Returns true when
    /// the id was not known before.
    pub fn insert(&mut self, entity: RemoteEntity) -> bool {
        self.entities.insert(entity.id.clone(), entity).is_none()
    }

    pub fn remove(&mut self, id: &str) -> Option<RemoteEntity> {
        self.entities.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&RemoteEntity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn push_snapshot(
        &mut self,
        interpolator: &SnapshotInterpolator,
        id: &str,
        snapshot: Snapshot,
    ) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => interpolator.accept(&mut entity.buffer, snapshot),
            None => false,
        }
    }

    /// Samples every entity at `now` and records the result as its last pose.
    pub fn sample(&mut self, interpolator: &SnapshotInterpolator, now_ms: u64) -> Vec<RemotePose> {
        let mut poses = Vec::with_capacity(self.entities.len());
        for entity in self.entities.values_mut() {
            if let Some(sample) = interpolator.pose(&mut entity.buffer, now_ms) {
                entity.last_pose = Some(sample.pose);
                poses.push(RemotePose {
                    id: entity.id.clone(),
                    pose: sample.pose,
                });
            }
        }
        poses.sort_by(|a, b| a.id.cmp(&b.id));
        poses
    }

    /// Removes everything, returning the ids that were present.
    pub fn clear(&mut self) -> Vec<String> {
        let mut ids: Vec<String> = self.entities.drain().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }

    /// Listing sorted by id.
    pub fn entries(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<RosterEntry> = self.entities.values().map(RemoteEntity::entry).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
