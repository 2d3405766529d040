use glam::{Quat, Vec3};

use super::buffer::{DEFAULT_RETENTION_MS, Snapshot, SnapshotBuffer};

pub const DEFAULT_INTERPOLATION_DELAY_MS: u64 = 100;
pub const DEFAULT_EXTRAPOLATION_LIMIT_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct InterpolationConfig {
    pub delay_ms: u64,
    pub retention_ms: u64,
    pub extrapolation_limit_ms: u64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_INTERPOLATION_DELAY_MS,
            retention_ms: DEFAULT_RETENTION_MS,
            extrapolation_limit_ms: DEFAULT_EXTRAPOLATION_LIMIT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
}

impl From<&Snapshot> for Pose {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            position: snapshot.position,
            orientation: snapshot.orientation,
            velocity: snapshot.velocity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// A single known snapshot returned unmodified.
    Passthrough,
    Interpolated,
    Extrapolated,
    /// Extrapolation hit its limit and holds there.
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub pose: Pose,
    pub kind: SampleKind,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotInterpolator {
    config: InterpolationConfig,
}

impl SnapshotInterpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    pub fn new_buffer(&self) -> SnapshotBuffer {
        SnapshotBuffer::new(self.config.retention_ms)
    }

    pub fn accept(&self, buffer: &mut SnapshotBuffer, snapshot: Snapshot) -> bool {
        let accepted = buffer.push(snapshot);
        if !accepted {
            log::debug!(
                "Rejected out-of-order snapshot at {} ms (newest {:?})",
                snapshot.received_at,
                buffer.latest().map(|s| s.received_at)
            );
        }
        accepted
    }

    pub fn render_time(&self, now_ms: u64) -> f64 {
        now_ms as f64 - self.config.delay_ms as f64
    }

    /// Samples the buffer at `now - delay`, evicting entries the render time
    /// has moved past.
    pub fn pose(&self, buffer: &mut SnapshotBuffer, now_ms: u64) -> Option<Sample> {
        let render_time = self.render_time(now_ms);
        buffer.trim_before(render_time);
        sample_at(buffer, render_time, self.config.extrapolation_limit_ms as f64)
    }
}

pub fn sample_at(buffer: &SnapshotBuffer, render_time: f64, extrapolation_limit_ms: f64) -> Option<Sample> {
    let first = buffer.oldest()?;
    if buffer.len() == 1 {
        return Some(passthrough(first));
    }

    let next_index = buffer
        .iter()
        .position(|s| s.received_at as f64 >= render_time);

    match next_index {
        Some(0) => Some(passthrough(first)),
        Some(index) => {
            let prev = buffer.get(index - 1)?;
            let next = buffer.get(index)?;
            Some(interpolate(prev, next, render_time))
        }
        None => {
            let len = buffer.len();
            let prev = buffer.get(len - 2)?;
            let newest = buffer.get(len - 1)?;
            Some(extrapolate(prev, newest, render_time, extrapolation_limit_ms))
        }
    }
}

fn passthrough(snapshot: &Snapshot) -> Sample {
    Sample {
        pose: Pose::from(snapshot),
        kind: SampleKind::Passthrough,
    }
}

fn interpolate(prev: &Snapshot, next: &Snapshot, render_time: f64) -> Sample {
    let span = (next.received_at - prev.received_at) as f64;
    let t = if span > 0.0 {
        ((render_time - prev.received_at as f64) / span).clamp(0.0, 1.0) as f32
    } else {
        1.0
    };

    Sample {
        pose: Pose {
            position: prev.position.lerp(next.position, t),
            orientation: slerp_shortest(prev.orientation, next.orientation, t),
            velocity: next.velocity,
        },
        kind: SampleKind::Interpolated,
    }
}

fn extrapolate(prev: &Snapshot, newest: &Snapshot, render_time: f64, limit_ms: f64) -> Sample {
    let ahead_ms = render_time - newest.received_at as f64;
    let (ahead_ms, kind) = if ahead_ms > limit_ms {
        (limit_ms, SampleKind::Frozen)
    } else {
        (ahead_ms, SampleKind::Extrapolated)
    };

    let span_ms = (newest.received_at - prev.received_at) as f64;
    let rate = if span_ms > 0.0 {
        (newest.position - prev.position) / span_ms as f32
    } else {
        Vec3::ZERO
    };

    Sample {
        pose: Pose {
            position: newest.position + rate * ahead_ms as f32,
            orientation: newest.orientation,
            velocity: newest.velocity,
        },
        kind,
    }
}

fn slerp_shortest(from: Quat, to: Quat, t: f32) -> Quat {
    if from.dot(to) < 0.0 {
        from.slerp(-to, t)
    } else {
        from.slerp(to, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn snapshot(received_at: u64, x: f32) -> Snapshot {
        Snapshot::new(
            received_at,
            Vec3::new(x, 0.0, 0.0),
            Quat::IDENTITY,
            Vec3::new(received_at as f32, 0.0, 0.0),
        )
    }

    fn buffer_with(snapshots: &[Snapshot]) -> SnapshotBuffer {
        let mut buffer = SnapshotBuffer::default();
        for s in snapshots {
            assert!(buffer.push(*s));
        }
        buffer
    }

    #[test]
    fn test_midpoint_interpolation() {
        let interpolator = SnapshotInterpolator::default();
        let mut buffer = buffer_with(&[snapshot(0, 0.0), snapshot(100, 10.0)]);

        let sample = interpolator.pose(&mut buffer, 150).unwrap();
        assert_eq!(sample.kind, SampleKind::Interpolated);
        assert!((sample.pose.position - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-5);
        // Velocity comes from the later snapshot, not a blend.
        assert_eq!(sample.pose.velocity, Vec3::new(100.0, 0.0, 0.0));
    }

    #[test]
    fn test_single_snapshot_passthrough() {
        let interpolator = SnapshotInterpolator::default();
        let only = Snapshot::new(
            500,
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(1.0),
            Vec3::new(4.0, 5.0, 6.0),
        );
        let mut buffer = buffer_with(&[only]);

        for now in [0, 550, 600, 10_000] {
            let sample = interpolator.pose(&mut buffer, now).unwrap();
            assert_eq!(sample.kind, SampleKind::Passthrough);
            assert_eq!(sample.pose, Pose::from(&only));
        }
    }

    #[test]
    fn test_empty_buffer_has_no_pose() {
        let interpolator = SnapshotInterpolator::default();
        let mut buffer = SnapshotBuffer::default();
        assert!(interpolator.pose(&mut buffer, 1000).is_none());
    }

    #[test]
    fn test_render_time_before_history_uses_oldest() {
        let interpolator = SnapshotInterpolator::default();
        let mut buffer = buffer_with(&[snapshot(1000, 1.0), snapshot(1050, 2.0)]);

        let sample = interpolator.pose(&mut buffer, 1000).unwrap();
        assert_eq!(sample.kind, SampleKind::Passthrough);
        assert_eq!(sample.pose.position.x, 1.0);
    }

    #[test]
    fn test_extrapolates_then_freezes() {
        let interpolator = SnapshotInterpolator::default();
        let mut buffer = buffer_with(&[snapshot(0, 0.0), snapshot(100, 10.0)]);

        // Render time 150, 50 ms past the newest at 0.1 units per ms.
        let sample = interpolator.pose(&mut buffer, 250).unwrap();
        assert_eq!(sample.kind, SampleKind::Extrapolated);
        assert!((sample.pose.position.x - 15.0).abs() < 1e-4);

        // Render time 1000 is far beyond the 250 ms limit.
        let frozen = interpolator.pose(&mut buffer, 1100).unwrap();
        assert_eq!(frozen.kind, SampleKind::Frozen);
        assert!((frozen.pose.position.x - 35.0).abs() < 1e-4);

        let later = interpolator.pose(&mut buffer, 5000).unwrap();
        assert_eq!(later.pose, frozen.pose);
    }

    #[test]
    fn test_orientation_crosses_wraparound_the_short_way() {
        let from = Quat::from_rotation_y(PI - 0.1);
        let to = Quat::from_rotation_y(-PI + 0.1);

        let mut a = snapshot(0, 0.0);
        a.orientation = from;
        let mut b = snapshot(100, 0.0);
        b.orientation = to;
        let mut buffer = buffer_with(&[a, b]);

        let sample = SnapshotInterpolator::default().pose(&mut buffer, 150).unwrap();
        let expected = Quat::from_rotation_y(PI);
        assert!(sample.pose.orientation.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn test_orientation_slerp_midpoint() {
        let mut a = snapshot(0, 0.0);
        a.orientation = Quat::IDENTITY;
        let mut b = snapshot(100, 0.0);
        b.orientation = Quat::from_rotation_y(FRAC_PI_2);
        let mut buffer = buffer_with(&[a, b]);

        let sample = SnapshotInterpolator::default().pose(&mut buffer, 150).unwrap();
        let expected = Quat::from_rotation_y(FRAC_PI_2 / 2.0);
        assert!(sample.pose.orientation.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn test_pose_evicts_consumed_history() {
        let interpolator = SnapshotInterpolator::default();
        let mut buffer = buffer_with(&[
            snapshot(0, 0.0),
            snapshot(50, 5.0),
            snapshot(100, 10.0),
            snapshot(150, 15.0),
        ]);

        let sample = interpolator.pose(&mut buffer, 225).unwrap();
        assert!((sample.pose.position.x - 12.5).abs() < 1e-4);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.oldest().unwrap().received_at, 100);
    }
}
