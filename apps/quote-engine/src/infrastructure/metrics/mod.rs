//! Prometheus Metrics Module
//!
//! Exposes engine metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Quotes**: quotes served by source, fallback quotes by reason
//! - **Provider**: REST requests by outcome
//! - **Stream**: trade ticks, reconnects, connection state
//! - **Alerts**: triggered alerts
//! - **Gauges**: cache entries, quota remaining, pending requests
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the existing handle.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_engine_quotes_served_total",
        "Quotes returned to callers by source"
    );
    describe_counter!(
        "quote_engine_fallback_quotes_total",
        "Synthetic quotes generated by reason"
    );
    describe_counter!(
        "quote_engine_provider_requests_total",
        "Quote provider requests by outcome"
    );
    describe_counter!(
        "quote_engine_stream_ticks_total",
        "Trade ticks received from the stream"
    );
    describe_counter!(
        "quote_engine_stream_reconnects_total",
        "Stream reconnection attempts"
    );
    describe_counter!(
        "quote_engine_alerts_triggered_total",
        "Price alerts triggered"
    );

    describe_gauge!("quote_engine_cache_entries", "Symbols in the price cache");
    describe_gauge!(
        "quote_engine_quota_remaining",
        "Provider requests left in the current window"
    );
    describe_gauge!(
        "quote_engine_stream_connected",
        "1 when the stream socket is open"
    );
    describe_gauge!(
        "quote_engine_pending_requests",
        "Requests queued in the scheduler"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Where a served quote came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSource {
    /// Fresh cache entry.
    Cache,
    /// Provider REST response.
    Provider,
    /// Synthetic generator.
    Fallback,
}

impl QuoteSource {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Provider => "provider",
            Self::Fallback => "fallback",
        }
    }
}

/// Record a quote returned to a caller.
pub fn record_quote_served(source: QuoteSource) {
    counter!(
        "quote_engine_quotes_served_total",
        "source" => source.as_str()
    )
    .increment(1);
}

/// Record a synthetic quote.
pub fn record_fallback(reason: &'static str) {
    counter!(
        "quote_engine_fallback_quotes_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a provider request outcome (`ok` or an error reason).
pub fn record_provider_request(outcome: &'static str) {
    counter!(
        "quote_engine_provider_requests_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a trade tick from the stream.
pub fn record_stream_tick() {
    counter!("quote_engine_stream_ticks_total").increment(1);
}

/// Record a stream reconnection attempt.
pub fn record_reconnect() {
    counter!("quote_engine_stream_reconnects_total").increment(1);
}

/// Record triggered alerts.
pub fn record_alerts_triggered(count: usize) {
    counter!("quote_engine_alerts_triggered_total").increment(count as u64);
}

/// Update the cache size gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_cache_entries(count: usize) {
    gauge!("quote_engine_cache_entries").set(count as f64);
}

/// Update the remaining quota gauge.
pub fn set_quota_remaining(remaining: u32) {
    gauge!("quote_engine_quota_remaining").set(f64::from(remaining));
}

/// Update the stream connection gauge.
pub fn set_stream_connected(connected: bool) {
    gauge!("quote_engine_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the pending requests gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_requests(count: usize) {
    gauge!("quote_engine_pending_requests").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_source_as_str() {
        assert_eq!(QuoteSource::Cache.as_str(), "cache");
        assert_eq!(QuoteSource::Provider.as_str(), "provider");
        assert_eq!(QuoteSource::Fallback.as_str(), "fallback");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_quote_served(QuoteSource::Cache);
        record_fallback("unauthorized");
        set_stream_connected(true);
    }
}
