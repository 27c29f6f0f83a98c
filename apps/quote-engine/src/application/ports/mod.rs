//! Port Interfaces
//!
//! Contracts between the application services and their adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`QuoteProvider`]: fetch one quote from the upstream market data API
//! - [`NotificationSink`]: deliver a fired price alert to its owner
//! - [`StreamSubscriber`]: manage the live trade stream's symbol set
//!
//! ## Driver Ports (Inbound)
//!
//! - [`StreamEvent`]: events the stream client pushes to the service

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::alert::AlertTrigger;
use crate::domain::quote::{Quote, Symbol};
use crate::domain::subscription::ConnectionState;

// =============================================================================
// Quote Provider
// =============================================================================

/// Errors returned by a [`QuoteProvider`].
///
/// Every variant is recoverable from the caller's point of view: the service
/// answers with a synthetic quote instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Credentials were rejected (HTTP 401/403).
    #[error("provider rejected credentials")]
    Unauthorized,

    /// Provider-side rate limit hit (HTTP 429).
    #[error("provider rate limit exceeded")]
    RateLimited,

    /// Response body could not be parsed or failed validation.
    #[error("invalid provider payload: {0}")]
    InvalidPayload(String),

    /// Provider answered but has no price for the symbol.
    #[error("no data for symbol {0}")]
    NoData(String),

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Unexpected HTTP status.
    #[error("unexpected HTTP status {0}")]
    Http(u16),
}

impl ProviderError {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::NoData(_) => "no_data",
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::Http(_) => "http",
        }
    }
}

/// Source of single-symbol quotes.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetch the latest quote for `symbol`.
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ProviderError>;
}

// =============================================================================
// Notification Sink
// =============================================================================

/// Receiver of fired alerts.
///
/// Called from a dedicated notifier task, never while engine locks are held.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one trigger.
    async fn notify(&self, trigger: AlertTrigger);
}

// =============================================================================
// Streaming
// =============================================================================

/// Control surface of the live trade stream.
///
/// Calls are non-blocking: the symbol set is updated immediately and the
/// wire frame is sent only while the socket is open.
pub trait StreamSubscriber: Send + Sync {
    /// Add `symbol` to the subscription set.
    fn subscribe(&self, symbol: &str);

    /// Remove `symbol` from the subscription set.
    fn unsubscribe(&self, symbol: &str);

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Symbols in the subscription set, sorted.
    fn subscribed_symbols(&self) -> Vec<Symbol>;
}

/// A single trade print from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeTick {
    /// Traded symbol.
    pub symbol: Symbol,
    /// Trade price.
    pub price: Decimal,
    /// Trade size, if reported.
    pub volume: Option<u64>,
    /// Exchange timestamp, if reported.
    pub traded_at: Option<DateTime<Utc>>,
}

/// Events emitted by the stream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A trade print arrived.
    Trade(TradeTick),
    /// The connection moved to a new state.
    StateChanged(ConnectionState),
    /// The provider closed the connection for good; no more reconnects.
    PermanentlyClosed {
        /// Close reason.
        reason: String,
    },
}
