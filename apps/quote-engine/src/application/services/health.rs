//! Health Reporting
//!
//! Snapshot of quota, stream, cache and alert state with a coarse status:
//!
//! | connection open | quota available | status      |
//! |-----------------|-----------------|-------------|
//! | yes             | yes             | `healthy`   |
//! | yes             | no              | `degraded`  |
//! | no              | yes             | `degraded`  |
//! | no              | no              | `unhealthy` |

use serde::Serialize;

use crate::domain::quota::QuotaState;
use crate::domain::quote::Symbol;
use crate::domain::subscription::ConnectionState;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream open and request budget available.
    Healthy,
    /// One of the two data paths is unavailable.
    Degraded,
    /// Neither stream nor REST requests are available.
    Unhealthy,
}

/// Health report returned by `health_check` and `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Request budget.
    pub quota: QuotaState,
    /// Whether the stream socket is open.
    pub connection_open: bool,
    /// Stream connection state.
    pub connection_state: ConnectionState,
    /// Cached symbols.
    pub cache_size: usize,
    /// Symbols in the stream subscription set.
    pub subscribed_symbols: Vec<Symbol>,
    /// Active alerts across all owners.
    pub active_alerts: usize,
    /// Requests queued in the scheduler.
    pub pending_requests: usize,
    /// Whether the engine serves synthetic quotes only.
    pub demo_mode: bool,
}

/// Derive the status from the two data paths.
#[must_use]
pub const fn classify(connection_open: bool, quota: &QuotaState) -> HealthStatus {
    match (connection_open, quota.is_exhausted()) {
        (true, false) => HealthStatus::Healthy,
        (false, true) => HealthStatus::Unhealthy,
        _ => HealthStatus::Degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use test_case::test_case;

    fn quota(remaining: u32) -> QuotaState {
        QuotaState {
            used: 60 - remaining,
            limit: 60,
            remaining,
            window_reset_at: Utc.with_ymd_and_hms(2024, 9, 2, 16, 0, 0).unwrap(),
        }
    }

    #[test_case(true, 10, HealthStatus::Healthy ; "open with budget")]
    #[test_case(true, 0, HealthStatus::Degraded ; "open without budget")]
    #[test_case(false, 10, HealthStatus::Degraded ; "closed with budget")]
    #[test_case(false, 0, HealthStatus::Unhealthy ; "closed without budget")]
    fn classification(open: bool, remaining: u32, expected: HealthStatus) {
        assert_eq!(classify(open, &quota(remaining)), expected);
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }
}
