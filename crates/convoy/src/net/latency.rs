pub const DEFAULT_PING_INTERVAL_MS: u64 = 2000;

const SAMPLE_WEIGHT: f64 = 0.2;

/// Smoothed round-trip time from periodic ping/pong exchanges.
///
/// Pongs carry no correlation id; any pong that arrives while pinging is
/// active is folded into the average.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    interval_ms: u64,
    next_ping_at: Option<u64>,
    active: bool,
    estimate_ms: f64,
    samples: u64,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PING_INTERVAL_MS)
    }
}

impl LatencyTracker {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            next_ping_at: None,
            active: false,
            estimate_ms: 0.0,
            samples: 0,
        }
    }

    /// Returns the timestamp to put in a ping when one is due.
    pub fn poll(&mut self, now_ms: u64) -> Option<u64> {
        if self.next_ping_at.is_some_and(|at| now_ms < at) {
            return None;
        }

        self.next_ping_at = Some(now_ms + self.interval_ms);
        self.active = true;
        Some(now_ms)
    }

    pub fn record_pong(&mut self, now_ms: u64, echoed_ms: u64) -> Option<f64> {
        if !self.active {
            log::debug!("Ignoring pong for {} with no ping outstanding", echoed_ms);
            return None;
        }

        if echoed_ms > now_ms {
            log::warn!("Ignoring pong echoing a future timestamp {}", echoed_ms);
            return None;
        }

        let sample = (now_ms - echoed_ms) as f64;
        self.estimate_ms = SAMPLE_WEIGHT * sample + (1.0 - SAMPLE_WEIGHT) * self.estimate_ms;
        self.samples += 1;
        log::debug!("Ping RTT: {} ms (smoothed {:.1} ms)", sample, self.estimate_ms);

        Some(self.estimate_ms)
    }

    /// Stops pinging and forgets the in-flight ping. The estimate is kept.
    pub fn cancel(&mut self) {
        self.next_ping_at = None;
        self.active = false;
    }

    pub fn reset(&mut self) {
        self.cancel();
        self.estimate_ms = 0.0;
        self.samples = 0;
    }

    pub fn estimate_ms(&self) -> f64 {
        self.estimate_ms
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_interval() {
        let mut tracker = LatencyTracker::new(2000);

        assert_eq!(tracker.poll(100), Some(100));
        assert_eq!(tracker.poll(500), None);
        assert_eq!(tracker.poll(2099), None);
        assert_eq!(tracker.poll(2100), Some(2100));
    }

    #[test]
    fn test_ema_weights() {
        let mut tracker = LatencyTracker::default();
        tracker.poll(0);

        let first = tracker.record_pong(100, 0).unwrap();
        assert!((first - 20.0).abs() < 1e-9);

        let second = tracker.record_pong(150, 100).unwrap();
        assert!((second - (0.2 * 50.0 + 0.8 * 20.0)).abs() < 1e-9);
        assert_eq!(tracker.sample_count(), 2);
    }

    #[test]
    fn test_cancel_ignores_late_pong_but_keeps_estimate() {
        let mut tracker = LatencyTracker::default();
        tracker.poll(0);
        tracker.record_pong(50, 0);
        let estimate = tracker.estimate_ms();

        tracker.poll(2000);
        tracker.cancel();
        assert_eq!(tracker.record_pong(2100, 2000), None);
        assert_eq!(tracker.estimate_ms(), estimate);

        assert_eq!(tracker.poll(2101), Some(2101));
    }

    #[test]
    fn test_future_echo_rejected() {
        let mut tracker = LatencyTracker::default();
        tracker.poll(0);
        assert_eq!(tracker.record_pong(10, 20), None);
        assert_eq!(tracker.estimate_ms(), 0.0);
    }
}
