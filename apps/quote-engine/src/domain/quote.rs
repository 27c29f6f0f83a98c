//! Quote Types
//!
//! A [`Quote`] is a single point-in-time price observation for a symbol.
//! Quotes are immutable: the price cache replaces an entry wholesale instead
//! of patching individual fields.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ticker symbol (e.g. "AAPL").
pub type Symbol = String;

/// Normalize a user supplied symbol: trim surrounding whitespace and upper-case.
#[must_use]
pub fn normalize_symbol(raw: &str) -> Symbol {
    raw.trim().to_ascii_uppercase()
}

/// Latest known price data for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Last traded price.
    pub current_price: Decimal,
    /// Absolute change against the previous close.
    pub change: Decimal,
    /// Percentage change against the previous close.
    pub change_percent: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Session open.
    pub open: Decimal,
    /// Previous session close.
    pub previous_close: Decimal,
    /// Traded volume, when the source reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    /// When this observation was made.
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    /// Build a quote from a single trade print.
    ///
    /// Session fields carry over from `previous` (the last cached quote for
    /// the symbol) and are widened to include the new price. Without a
    /// previous quote the trade price seeds open, high, low and previous close.
    #[must_use]
    pub fn from_trade(
        previous: Option<&Self>,
        symbol: Symbol,
        price: Decimal,
        volume: Option<u64>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let (previous_close, open, high, low) = previous.map_or(
            (price, price, price, price),
            |prev| {
                (
                    prev.previous_close,
                    prev.open,
                    prev.high.max(price),
                    prev.low.min(price),
                )
            },
        );

        let change = price - previous_close;

        Self {
            symbol,
            current_price: price,
            change,
            change_percent: percent_change(change, previous_close),
            high,
            low,
            open,
            previous_close,
            volume,
            observed_at,
        }
    }

    /// Whether the quote carries a usable price.
    #[must_use]
    pub fn has_price(&self) -> bool {
        self.current_price > Decimal::ZERO
    }
}

/// Percentage `change / base * 100`, rounded to four decimal places.
///
/// Returns zero when the base is zero.
#[must_use]
pub fn percent_change(change: Decimal, base: Decimal) -> Decimal {
    if base.is_zero() {
        return Decimal::ZERO;
    }
    (change / base * Decimal::ONE_HUNDRED).round_dp(4)
}
