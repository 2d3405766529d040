use std::time::Duration;

pub const DEFAULT_TICK_RATE: u32 = 20;
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_WRITE_BACKLOG: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub inactivity_timeout: Duration,
    pub stats_interval_ticks: u64,
    pub spawn_radius: f32,
    pub spawn_height: f32,
    /// Frames a peer may send before its `init`; further ones are dropped.
    pub max_held_messages: usize,
    /// Unsent bytes a peer may accumulate before it is dropped.
    pub max_write_backlog: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            inactivity_timeout: Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECS),
            stats_interval_ticks: 100,
            spawn_radius: 20.0,
            spawn_height: 0.5,
            max_held_messages: 64,
            max_write_backlog: DEFAULT_MAX_WRITE_BACKLOG,
        }
    }
}
