//! Price Cache
//!
//! Holds the latest known [`Quote`] per symbol. Entries are valid for a TTL
//! measured from `observed_at`; expired entries read as absent so callers
//! trigger a fetch. The cache is the single source of truth shared by the
//! polling and streaming paths.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::quote::{Quote, Symbol};

/// Default freshness bound.
pub const DEFAULT_CACHE_TTL: Duration = Duration::seconds(30);

/// Result of a [`PriceCache::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// First entry for the symbol.
    Inserted,
    /// Replaced an older (or equally old) entry.
    Replaced,
    /// Discarded: the cached entry was observed later than the incoming one.
    Stale,
}

impl PutOutcome {
    /// Whether the quote is now the cached value.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        !matches!(self, Self::Stale)
    }
}

/// Latest quote per symbol with a freshness bound.
#[derive(Debug, Clone)]
pub struct PriceCache {
    ttl: Duration,
    entries: HashMap<Symbol, Quote>,
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl PriceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Fresh quote for `symbol`, or `None` if missing or older than the TTL.
    #[must_use]
    pub fn get(&self, symbol: &str, now: DateTime<Utc>) -> Option<&Quote> {
        self.entries
            .get(symbol)
            .filter(|quote| self.is_fresh(quote, now))
    }

    /// Cached quote for `symbol` regardless of age.
    #[must_use]
    pub fn peek(&self, symbol: &str) -> Option<&Quote> {
        self.entries.get(symbol)
    }

    /// Store `quote` as the latest value for its symbol.
    ///
    /// `observed_at` never moves backwards for a symbol: an incoming quote
    /// older than the cached one is dropped.
    pub fn put(&mut self, quote: Quote) -> PutOutcome {
        match self.entries.get(&quote.symbol) {
            Some(existing) if existing.observed_at > quote.observed_at => PutOutcome::Stale,
            Some(_) => {
                self.entries.insert(quote.symbol.clone(), quote);
                PutOutcome::Replaced
            }
            None => {
                self.entries.insert(quote.symbol.clone(), quote);
                PutOutcome::Inserted
            }
        }
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, quote| now - quote.observed_at <= ttl);
        before - self.entries.len()
    }

    /// Number of cached symbols (fresh or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached symbols.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.entries.keys().cloned().collect()
    }

    /// Freshness bound.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, quote: &Quote, now: DateTime<Utc>) -> bool {
        now - quote.observed_at <= self.ttl
    }
}
