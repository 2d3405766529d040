use std::collections::VecDeque;

use glam::{Quat, Vec3};

pub const DEFAULT_RETENTION_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub received_at: u64,
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
}

impl Snapshot {
    pub fn new(received_at: u64, position: Vec3, orientation: Quat, velocity: Vec3) -> Self {
        Self {
            received_at,
            position,
            orientation,
            velocity,
        }
    }
}

/// Time-windowed history of one remote entity, strictly increasing in
/// `received_at`.
#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    snapshots: VecDeque<Snapshot>,
    retention_ms: u64,
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_MS)
    }
}

impl SnapshotBuffer {
    pub fn new(retention_ms: u64) -> Self {
        Self {
            snapshots: VecDeque::new(),
            retention_ms,
        }
    }

    /// Appends a snapshot, rejecting it unless it is newer than the newest
    /// entry. Entries that fall outside the retention window are evicted.
    pub fn push(&mut self, snapshot: Snapshot) -> bool {
        if self
            .latest()
            .is_some_and(|newest| snapshot.received_at <= newest.received_at)
        {
            return false;
        }

        self.snapshots.push_back(snapshot);

        let cutoff = snapshot.received_at.saturating_sub(self.retention_ms);
        while self.snapshots.front().is_some_and(|s| s.received_at < cutoff) {
            self.snapshots.pop_front();
        }

        true
    }

    /// Drops entries older than `render_time` that can no longer bracket it,
    /// keeping the one just before it. The newest two always survive so a
    /// stalled stream can still be extrapolated.
    pub fn trim_before(&mut self, render_time: f64) {
        while self.snapshots.len() > 2 && (self.snapshots[1].received_at as f64) < render_time {
            self.snapshots.pop_front();
        }
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.snapshots.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_ms
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(received_at: u64, x: f32) -> Snapshot {
        Snapshot::new(received_at, Vec3::new(x, 0.0, 0.0), Quat::IDENTITY, Vec3::ZERO)
    }

    fn timestamps(buffer: &SnapshotBuffer) -> Vec<u64> {
        buffer.iter().map(|s| s.received_at).collect()
    }

    #[test]
    fn test_rejects_non_increasing_timestamps() {
        let mut buffer = SnapshotBuffer::default();

        assert!(buffer.push(at(100, 0.0)));
        assert!(!buffer.push(at(100, 1.0)));
        assert!(!buffer.push(at(50, 1.0)));
        assert!(buffer.push(at(150, 2.0)));
        assert!(!buffer.push(at(120, 3.0)));
        assert!(buffer.push(at(151, 3.0)));

        assert_eq!(timestamps(&buffer), vec![100, 150, 151]);
    }

    #[test]
    fn test_strictly_increasing_after_any_sequence() {
        let mut buffer = SnapshotBuffer::default();
        let arrivals = [30, 10, 40, 40, 35, 80, 79, 200, 150, 201];
        for t in arrivals {
            buffer.push(at(t, 0.0));
        }

        let stamps = timestamps(&buffer);
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(stamps, vec![30, 40, 80, 200, 201]);
    }

    #[test]
    fn test_retention_window() {
        let mut buffer = SnapshotBuffer::new(1000);
        for t in (0..=2000).step_by(250) {
            buffer.push(at(t, 0.0));
        }

        assert_eq!(timestamps(&buffer), vec![1000, 1250, 1500, 1750, 2000]);
    }

    #[test]
    fn test_trim_keeps_one_entry_before_render_time() {
        let mut buffer = SnapshotBuffer::default();
        for t in [0, 50, 100, 150, 200] {
            buffer.push(at(t, 0.0));
        }

        buffer.trim_before(120.0);
        assert_eq!(timestamps(&buffer), vec![100, 150, 200]);

        buffer.trim_before(500.0);
        assert_eq!(timestamps(&buffer), vec![150, 200]);
    }
}
