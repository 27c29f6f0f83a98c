//! Stream Subscription Reference Counting
//!
//! Many alerts (from many owners) can watch the same symbol while the
//! provider stream only needs one subscription per symbol. This module keeps
//! an explicit `symbol -> count` map:
//!
//! - `acquire` increments and reports when the count went 0→1
//!   (subscribe upstream)
//! - `release` decrements and reports when the count went 1→0
//!   (unsubscribe upstream)
//!
//! It also defines the stream [`ConnectionState`], owned by the stream client
//! and read by health reporting.

use std::collections::HashMap;

use serde::Serialize;

use crate::domain::quote::Symbol;

/// Lifecycle of the provider stream connection.
///
/// `Disconnected → Connecting → Connected → (Degraded | Disconnected)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open and delivering trades.
    Connected,
    /// Socket open but the provider reported an error frame.
    Degraded,
}

impl ConnectionState {
    /// Whether a socket is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
        }
    }
}

/// Upstream action required after a reference count change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionChange {
    /// First reference taken: subscribe the symbol upstream.
    Subscribe(Symbol),
    /// Last reference dropped: unsubscribe the symbol upstream.
    Unsubscribe(Symbol),
}

/// Reference counts per symbol.
#[derive(Debug, Default, Clone)]
pub struct SymbolRefCounts {
    counts: HashMap<Symbol, usize>,
}

impl SymbolRefCounts {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference on `symbol`.
    ///
    /// Returns `Some(Subscribe)` when this is the first reference.
    pub fn acquire(&mut self, symbol: &str) -> Option<SubscriptionChange> {
        let count = self.counts.entry(symbol.to_string()).or_insert(0);
        *count += 1;

        (*count == 1).then(|| SubscriptionChange::Subscribe(symbol.to_string()))
    }

    /// Drop a reference on `symbol`.
    ///
    /// Returns `Some(Unsubscribe)` when this was the last reference. Releasing
    /// an unknown symbol is a no-op.
    pub fn release(&mut self, symbol: &str) -> Option<SubscriptionChange> {
        let count = self.counts.get_mut(symbol)?;
        *count = count.saturating_sub(1);

        if *count == 0 {
            self.counts.remove(symbol);
            return Some(SubscriptionChange::Unsubscribe(symbol.to_string()));
        }

        None
    }

    /// Current reference count for `symbol`.
    #[must_use]
    pub fn count(&self, symbol: &str) -> usize {
        self.counts.get(symbol).copied().unwrap_or(0)
    }

    /// Symbols with at least one reference.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.counts.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Number of referenced symbols.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_acquire_subscribes() {
        let mut refs = SymbolRefCounts::new();

        assert_eq!(
            refs.acquire("AAPL"),
            Some(SubscriptionChange::Subscribe("AAPL".to_string()))
        );
        assert_eq!(refs.acquire("AAPL"), None);
        assert_eq!(refs.count("AAPL"), 2);
    }

    #[test]
    fn last_release_unsubscribes() {
        let mut refs = SymbolRefCounts::new();
        refs.acquire("AAPL");
        refs.acquire("AAPL");

        assert_eq!(refs.release("AAPL"), None);
        assert_eq!(
            refs.release("AAPL"),
            Some(SubscriptionChange::Unsubscribe("AAPL".to_string()))
        );
        assert_eq!(refs.count("AAPL"), 0);
        assert_eq!(refs.symbol_count(), 0);
    }

    #[test]
    fn release_unknown_symbol_is_noop() {
        let mut refs = SymbolRefCounts::new();
        refs.acquire("MSFT");

        assert_eq!(refs.release("AAPL"), None);
        assert_eq!(refs.active_symbols(), vec!["MSFT".to_string()]);
    }

    #[test]
    fn open_states() {
        assert!(!ConnectionState::Disconnected.is_open());
        assert!(!ConnectionState::Connecting.is_open());
        assert!(ConnectionState::Connected.is_open());
        assert!(ConnectionState::Degraded.is_open());
        assert_eq!(
            serde_json::to_string(&ConnectionState::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn symbols_are_independent() {
        let mut refs = SymbolRefCounts::new();
        refs.acquire("AAPL");
        refs.acquire("MSFT");
        refs.acquire("GOOG");

        refs.release("MSFT");

        assert_eq!(
            refs.active_symbols(),
            vec!["AAPL".to_string(), "GOOG".to_string()]
        );
    }
}
