//! Request Quota Tracking
//!
//! Tracks the outbound request budget in a fixed window. Every outbound
//! provider call must first win a [`QuotaTracker::consume`]; once the budget
//! is spent, calls are denied until the window resets.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Default number of requests allowed per window.
pub const DEFAULT_QUOTA_LIMIT: u32 = 60;

/// Default quota window length.
pub const DEFAULT_QUOTA_WINDOW: Duration = Duration::seconds(60);

/// Snapshot of the request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaState {
    /// Requests consumed in the current window.
    pub used: u32,
    /// Requests allowed per window.
    pub limit: u32,
    /// Requests still available in the current window.
    pub remaining: u32,
    /// When the current window ends.
    pub window_reset_at: DateTime<Utc>,
}

impl QuotaState {
    /// Whether the budget is spent for the current window.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// Fixed-window request budget.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    limit: u32,
    window: Duration,
    used: u32,
    window_reset_at: DateTime<Utc>,
}

impl QuotaTracker {
    /// Create a tracker whose first window starts at `now`.
    #[must_use]
    pub fn new(limit: u32, window: Duration, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            window,
            used: 0,
            window_reset_at: now + window,
        }
    }

    /// Try to take one request from the budget.
    ///
    /// Resets the window first if it has elapsed. Returns `false` without
    /// side effects when the budget is spent.
    pub fn consume(&mut self, now: DateTime<Utc>) -> bool {
        self.roll_window(now);

        if self.used >= self.limit {
            return false;
        }

        self.used += 1;
        true
    }

    /// Budget as seen at `now`, without mutating the tracker.
    ///
    /// An elapsed window is reported as a fresh one.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> QuotaState {
        let (used, window_reset_at) = if now >= self.window_reset_at {
            (0, self.next_reset_after(now))
        } else {
            (self.used, self.window_reset_at)
        };

        QuotaState {
            used,
            limit: self.limit,
            remaining: self.limit.saturating_sub(used),
            window_reset_at,
        }
    }

    /// Time until the current window resets (zero if already elapsed).
    #[must_use]
    pub fn time_until_reset(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.window_reset_at - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }

    /// Requests allowed per window.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    fn roll_window(&mut self, now: DateTime<Utc>) {
        if now >= self.window_reset_at {
            self.used = 0;
            self.window_reset_at = self.next_reset_after(now);
        }
    }

    fn next_reset_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.window
    }
}
