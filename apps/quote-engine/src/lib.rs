#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Quote Engine - Market Data Ingestion and Alerting
//!
//! Keeps a freshness-bounded cache of the latest quote per symbol, fed by a
//! rate-limited REST poller and a persistent WebSocket trade stream, and
//! evaluates user price alerts on every update.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure rules and value types
//!   - `quote`, `quota`, `cache`: quotes, request budget, latest-quote store
//!   - `alert`: alert registration, evaluation and cooldown
//!   - `subscription`: per-symbol stream reference counts
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: quote provider, trade stream and notification sink traits
//!   - `services`: request scheduler, fallback generator, market data service
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `provider`: REST quote client and WebSocket trade stream
//!   - `http`: health, metrics and the JSON query API
//!   - `config`, `metrics`, `telemetry`, `notify`
//!
//! # Data Flow
//!
//! ```text
//! REST quote API ─► RequestScheduler ─┐
//!                                     ├─► PriceCache ─► AlertEngine ─► NotificationSink
//! WebSocket trades ─► StreamClient ───┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quote, quota, cache and alert rules.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::alert::{Alert, AlertError, AlertId, AlertTrigger, Direction};
pub use domain::clock::{Clock, ManualClock, SharedClock, SystemClock, TokioClock};
pub use domain::quota::QuotaState;
pub use domain::quote::{Quote, Symbol};
pub use domain::subscription::ConnectionState;

// Ports
pub use application::ports::{
    NotificationSink, ProviderError, QuoteProvider, StreamEvent, StreamSubscriber, TradeTick,
};

// Services
pub use application::services::{
    BatchConfig, HealthReport, HealthStatus, MarketDataService, RequestScheduler, SchedulerError,
    ServiceSettings, SyntheticQuoteGenerator,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, Credentials, EngineConfig};

// HTTP server
pub use infrastructure::http::{HttpServer, HttpServerError, HttpServerState};

// Provider adapters
pub use infrastructure::provider::{
    HttpQuoteProvider, StreamClient, StreamClientConfig, StreamClientError,
};

// Notification sinks
pub use infrastructure::notify::{ChannelNotificationSink, LogNotificationSink};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
