mod buffer;
mod interpolation;

pub use buffer::{DEFAULT_RETENTION_MS, Snapshot, SnapshotBuffer};
pub use interpolation::{
    DEFAULT_EXTRAPOLATION_LIMIT_MS, DEFAULT_INTERPOLATION_DELAY_MS, InterpolationConfig, Pose,
    Sample, SampleKind, SnapshotInterpolator, sample_at,
};
