//! Heartbeat tracking for the event stream.
//!
//! The controller sends a `_0` event periodically, carrying the number of
//! seconds until the next one. The connection is considered dead once the
//! time since the last heartbeat exceeds that interval.

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

/// Tracks the last heartbeat and the interval the controller declared.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    last: Option<Instant>,
    last_wall: Option<DateTime<Local>>,
    wait: Duration,
    grace: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor with no grace period
    pub fn new() -> Self {
        Self::with_grace(Duration::ZERO)
    }

    /// Create a monitor that allows `grace` beyond the declared interval
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            last: None,
            last_wall: None,
            wait: Duration::ZERO,
            grace,
        }
    }

    /// Record a heartbeat seen at `at`.
    ///
    /// `wait` is the interval carried by the heartbeat; `None` keeps the
    /// previously declared interval.
    pub fn record(&mut self, at: Instant, wait: Option<Duration>) {
        self.last = Some(at);
        self.last_wall = Some(Local::now());
        if let Some(wait) = wait {
            self.wait = wait;
        }
    }

    /// Time since the last heartbeat, zero if none was recorded
    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        self.last
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the connection should still be considered alive
    pub fn is_alive(&self) -> bool {
        self.is_alive_at(Instant::now())
    }

    pub fn is_alive_at(&self, now: Instant) -> bool {
        self.elapsed_at(now) <= self.wait + self.grace
    }

    /// Interval declared by the most recent heartbeat
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Wall-clock time of the most recent heartbeat
    pub fn last_heartbeat(&self) -> Option<DateTime<Local>> {
        self.last_wall
    }

    /// Forget all heartbeats, as on a fresh connection
    pub fn reset(&mut self) {
        self.last = None;
        self.last_wall = None;
        self.wait = Duration::ZERO;
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alive_before_first_heartbeat() {
        let monitor = HeartbeatMonitor::new();
        let later = Instant::now() + Duration::from_secs(3600);

        assert_eq!(monitor.elapsed_at(later), Duration::ZERO);
        assert!(monitor.is_alive_at(later));
        assert!(monitor.last_heartbeat().is_none());
    }

    #[test]
    fn test_declared_wait_bounds_silence() {
        let mut monitor = HeartbeatMonitor::new();
        let t0 = Instant::now();
        monitor.record(t0, Some(Duration::from_secs(30)));

        assert!(monitor.is_alive_at(t0 + Duration::from_secs(29)));
        assert!(monitor.is_alive_at(t0 + Duration::from_secs(30)));
        assert!(!monitor.is_alive_at(t0 + Duration::from_secs(31)));
        assert!(monitor.last_heartbeat().is_some());
    }

    #[test]
    fn test_new_heartbeat_extends_deadline() {
        let mut monitor = HeartbeatMonitor::new();
        let t0 = Instant::now();
        monitor.record(t0, Some(Duration::from_secs(30)));
        monitor.record(t0 + Duration::from_secs(25), None);

        assert_eq!(monitor.wait(), Duration::from_secs(30));
        assert!(monitor.is_alive_at(t0 + Duration::from_secs(50)));
        assert!(!monitor.is_alive_at(t0 + Duration::from_secs(56)));
    }

    #[test]
    fn test_grace_period() {
        let mut monitor = HeartbeatMonitor::with_grace(Duration::from_secs(10));
        let t0 = Instant::now();
        monitor.record(t0, Some(Duration::from_secs(30)));

        assert!(monitor.is_alive_at(t0 + Duration::from_secs(39)));
        assert!(!monitor.is_alive_at(t0 + Duration::from_secs(41)));
    }

    #[test]
    fn test_default_grace_tolerates_a_late_heartbeat() {
        let grace = crate::config::StreamConfig::default().heartbeat_grace;
        let mut monitor = HeartbeatMonitor::with_grace(grace);
        let t0 = Instant::now();
        monitor.record(t0, Some(Duration::from_secs(30)));

        assert!(monitor.is_alive_at(t0 + Duration::from_millis(30_900)));
        assert!(!monitor.is_alive_at(t0 + Duration::from_millis(31_100)));
    }

    #[test]
    fn test_reset() {
        let mut monitor = HeartbeatMonitor::new();
        let t0 = Instant::now();
        monitor.record(t0, Some(Duration::from_secs(1)));
        assert!(!monitor.is_alive_at(t0 + Duration::from_secs(5)));

        monitor.reset();
        assert!(monitor.is_alive_at(t0 + Duration::from_secs(5)));
        assert_eq!(monitor.wait(), Duration::ZERO);
    }
}
