//! Clock Abstraction
//!
//! Quota windows, cache freshness and alert cool-downs are all wall-clock
//! driven. Components take an injected [`Clock`] so tests can move time
//! explicitly instead of sleeping.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock anchored to a wall-clock origin and advanced by the tokio timer.
///
/// Under `tokio::time::pause()` this clock moves together with
/// `tokio::time::advance` and auto-advance, which keeps quota resets and
/// scheduler sleeps consistent in tests.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    /// Create a clock starting at `origin`.
    #[must_use]
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().duration_since(self.started);
        self.origin + Duration::from_std(elapsed).unwrap_or_else(|_| Duration::zero())
    }
}

/// Manually driven clock.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.write() += by;
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.advance(Duration::seconds(61));

        assert_eq!(clock.now(), start + Duration::seconds(61));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
        let clock = TokioClock::starting_at(start);

        tokio::time::advance(std::time::Duration::from_secs(90)).await;

        assert_eq!(clock.now(), start + Duration::seconds(90));
    }
}
