//! Connection health monitoring

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Tracks inbound activity on a control transport.
///
/// Any frame counts as activity. The tunnel's read loop asks
/// [`is_expired`](Self::is_expired) on every keepalive tick and closes the
/// tunnel once the peer has been silent for longer than `timeout`.
pub struct HealthMonitor {
    /// Keepalive interval
    pub interval: Duration,
    /// Silence that counts as a dead peer
    pub timeout: Duration,
    /// Reference point for `last_activity`
    started: Instant,
    /// Milliseconds since `started` at the last inbound frame
    last_activity: AtomicU64,
}

impl HealthMonitor {
    /// Create a new health monitor
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            started: Instant::now(),
            last_activity: AtomicU64::new(0),
        }
    }

    /// Note that something arrived from the peer
    pub fn record_activity(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_activity.fetch_max(now, Ordering::Relaxed);
    }

    /// Time since the peer was last heard from
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    /// Whether the peer has been silent for longer than the timeout
    pub fn is_expired(&self) -> bool {
        self.idle_for() > self.timeout
    }

    /// Keepalive ticker; the immediate first tick is skipped
    pub fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_silence() {
        let health = HealthMonitor::new(Duration::from_secs(1), Duration::from_secs(3));
        assert!(!health.is_expired());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!health.is_expired());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(health.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_idle() {
        let health = HealthMonitor::new(Duration::from_secs(1), Duration::from_secs(3));

        tokio::time::advance(Duration::from_secs(2)).await;
        health.record_activity();
        assert!(health.idle_for() < Duration::from_millis(10));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!health.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_skips_first_tick() {
        let health = HealthMonitor::new(Duration::from_secs(5), Duration::from_secs(15));
        let start = Instant::now();
        let mut ticker = health.ticker();

        ticker.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
