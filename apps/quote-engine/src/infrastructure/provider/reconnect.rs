//! Reconnection Policy
//!
//! Fixed-delay reconnection for the trade stream, plus the rules that decide
//! whether a close is worth reconnecting after at all.
//!
//! # Close Classification
//!
//! | Cause                              | Kind        |
//! |------------------------------------|-------------|
//! | Handshake HTTP 401 / 403           | permanent   |
//! | Close code 1008 (policy violation) | permanent   |
//! | Close codes 4001 / 4003            | permanent   |
//! | Auth error frame                   | permanent   |
//! | Anything else                      | transient   |

use std::time::Duration;

/// Close codes after which the provider will not accept us again.
pub const PERMANENT_CLOSE_CODES: [u16; 3] = [1008, 4001, 4003];

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before every reconnection attempt.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
        }
    }
}

/// Reconnection policy with a fixed delay and no attempt cap.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt.
    #[must_use]
    pub const fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.config.delay
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Consecutive attempts since the last successful connection.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}

/// Whether a WebSocket close code forbids reconnecting.
#[must_use]
pub fn is_permanent_close_code(code: u16) -> bool {
    PERMANENT_CLOSE_CODES.contains(&code)
}

/// Whether a handshake HTTP status forbids reconnecting.
#[must_use]
pub const fn is_permanent_handshake_status(status: u16) -> bool {
    matches!(status, 401 | 403)
}

/// Whether a provider error message reports rejected credentials.
#[must_use]
pub fn is_auth_error_message(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    ["api key", "unauthorized", "forbidden", "auth", "token"]
        .iter()
        .any(|needle| msg.contains(needle))
}
