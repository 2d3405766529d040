use std::time::Duration;

use crate::net::{
    ClientInit, DEFAULT_PING_INTERVAL_MS, DEFAULT_RECONNECT_DELAY_MS, FixedDelay,
};
use crate::reconcile::{DEFAULT_CORRECTION_THRESHOLD, DEFAULT_INPUT_TIMEOUT_MS};
use crate::snapshot::InterpolationConfig;
use crate::vehicle::VehicleClass;

pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub delay_ms: u64,
    /// `None` retries for as long as the session is active.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> FixedDelay {
        FixedDelay {
            delay: Duration::from_millis(self.delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub participant_id: String,
    pub display_name: String,
    pub vehicle: VehicleClass,
    pub sync_interval_ms: u64,
    pub ping_interval_ms: u64,
    pub input_timeout_ms: u64,
    pub correction_threshold: f32,
    pub interpolation: InterpolationConfig,
    pub reconnect: ReconnectConfig,
}

impl SessionConfig {
    pub fn new(participant_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            vehicle: VehicleClass::Default,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            input_timeout_ms: DEFAULT_INPUT_TIMEOUT_MS,
            correction_threshold: DEFAULT_CORRECTION_THRESHOLD,
            interpolation: InterpolationConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_vehicle(mut self, vehicle: VehicleClass) -> Self {
        self.vehicle = vehicle;
        self
    }

    pub(crate) fn handshake(&self) -> ClientInit {
        ClientInit {
            participant_id: self.participant_id.clone(),
            display_name: self.display_name.clone(),
            vehicle_class: self.vehicle.as_str().to_string(),
        }
    }
}
