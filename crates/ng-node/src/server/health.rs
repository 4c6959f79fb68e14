//! Connection liveness

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Tracks when a connection was last heard from
pub struct HealthMonitor {
    /// Heartbeat interval
    pub interval: Duration,
    /// Silence allowed before the connection is considered dead
    pub timeout: Duration,
    last_seen: Instant,
}

impl HealthMonitor {
    /// Create a new health monitor
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_seen: Instant::now(),
        }
    }

    /// Ticker firing every `interval`, starting one interval from now
    pub fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Record inbound traffic
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Time since the last inbound packet
    pub fn idle(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// Whether the connection has been silent for longer than `timeout`
    pub fn is_expired(&self) -> bool {
        self.idle() > self.timeout
    }
}
