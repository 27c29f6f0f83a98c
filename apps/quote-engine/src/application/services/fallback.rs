//! Synthetic Quote Generator
//!
//! Produces plausible demo quotes when real data is unavailable: no API key,
//! rejected credentials, invalid or empty provider payloads, and any other
//! fetch failure. Callers always get a quote with a positive price.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::domain::quote::{Quote, percent_change};

/// Base prices for well known symbols.
const BASE_PRICES: &[(&str, i64)] = &[
    ("AAPL", 190),
    ("MSFT", 420),
    ("GOOGL", 170),
    ("AMZN", 185),
    ("TSLA", 250),
    ("META", 500),
    ("NVDA", 120),
    ("NFLX", 650),
    ("SPY", 550),
    ("QQQ", 480),
];

/// Maximum jitter applied to the base price, in basis points (±2 %).
const MAX_JITTER_BPS: i64 = 200;

/// Maximum extra range added above the high and below the low, in basis points.
const MAX_RANGE_BPS: i64 = 50;

/// Range of derived base prices for unknown symbols, in cents.
const DERIVED_BASE_MIN_CENTS: u64 = 5_000;
const DERIVED_BASE_SPAN_CENTS: u64 = 45_000;

/// Generator of synthetic quotes.
#[derive(Debug)]
pub struct SyntheticQuoteGenerator {
    rng: Mutex<StdRng>,
}

impl Default for SyntheticQuoteGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticQuoteGenerator {
    /// Create a generator seeded from the OS.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Create a deterministic generator.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Unjittered reference price for `symbol`.
    ///
    /// Known symbols use a fixed table; anything else gets a stable price
    /// derived from the symbol text, between 50.00 and 499.99.
    #[must_use]
    pub fn base_price(symbol: &str) -> Decimal {
        BASE_PRICES
            .iter()
            .find(|(known, _)| *known == symbol)
            .map_or_else(|| derived_base(symbol), |(_, price)| Decimal::from(*price))
    }

    /// Generate a quote for `symbol` observed at `now`.
    #[must_use]
    pub fn synthetic_quote(&self, symbol: &str, now: DateTime<Utc>) -> Quote {
        let (jitter_bps, high_bps, low_bps, volume) = {
            let mut rng = self.rng.lock();
            (
                rng.random_range(-MAX_JITTER_BPS..=MAX_JITTER_BPS),
                rng.random_range(0..=MAX_RANGE_BPS),
                rng.random_range(0..=MAX_RANGE_BPS),
                rng.random_range(100_000..=5_000_000_u64),
            )
        };

        let previous_close = Self::base_price(symbol);
        let current_price = scale_bps(previous_close, jitter_bps);
        let change = current_price - previous_close;
        let open = previous_close;

        Quote {
            symbol: symbol.to_string(),
            current_price,
            change,
            change_percent: percent_change(change, previous_close),
            high: scale_bps(current_price.max(open), high_bps),
            low: scale_bps(current_price.min(open), -low_bps),
            open,
            previous_close,
            volume: Some(volume),
            observed_at: now,
        }
    }
}

/// `value * (1 + bps / 10_000)`, rounded to cents.
fn scale_bps(value: Decimal, bps: i64) -> Decimal {
    (value * (Decimal::ONE + Decimal::new(bps, 4))).round_dp(2)
}

fn derived_base(symbol: &str) -> Decimal {
    let hash = symbol
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |acc, byte| {
            (acc ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        });
    let cents = DERIVED_BASE_MIN_CENTS + hash % DERIVED_BASE_SPAN_CENTS;
    Decimal::new(i64::try_from(cents).unwrap_or(i64::MAX), 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 12, 15, 30, 0).unwrap()
    }

    #[test]
    fn known_symbols_use_table() {
        assert_eq!(SyntheticQuoteGenerator::base_price("AAPL"), dec!(190));
        assert_eq!(SyntheticQuoteGenerator::base_price("NFLX"), dec!(650));
    }

    #[test]
    fn unknown_symbol_base_is_stable_and_bounded() {
        let first = SyntheticQuoteGenerator::base_price("ZZZZ");
        let second = SyntheticQuoteGenerator::base_price("ZZZZ");

        assert_eq!(first, second);
        assert!(first >= dec!(50) && first < dec!(500));
    }

    #[test]
    fn jitter_stays_within_two_percent() {
        let generator = SyntheticQuoteGenerator::with_seed(7);

        for _ in 0..500 {
            let quote = generator.synthetic_quote("AAPL", now());
            assert!(quote.current_price >= dec!(186.2));
            assert!(quote.current_price <= dec!(193.8));
        }
    }

    #[test]
    fn session_fields_are_consistent() {
        let generator = SyntheticQuoteGenerator::with_seed(42);
        let quote = generator.synthetic_quote("MSFT", now());

        assert_eq!(quote.previous_close, dec!(420));
        assert_eq!(quote.change, quote.current_price - quote.previous_close);
        assert!(quote.high >= quote.current_price && quote.high >= quote.open);
        assert!(quote.low <= quote.current_price && quote.low <= quote.open);
        assert_eq!(quote.observed_at, now());
        assert_eq!(quote.symbol, "MSFT");
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = SyntheticQuoteGenerator::with_seed(99);
        let b = SyntheticQuoteGenerator::with_seed(99);

        assert_eq!(a.synthetic_quote("TSLA", now()), b.synthetic_quote("TSLA", now()));
    }

    proptest! {
        #[test]
        fn every_symbol_gets_a_positive_price(symbol in "[A-Z]{1,6}", seed in any::<u64>()) {
            let generator = SyntheticQuoteGenerator::with_seed(seed);
            let quote = generator.synthetic_quote(&symbol, now());

            prop_assert!(quote.current_price > Decimal::ZERO);
            prop_assert!(quote.low > Decimal::ZERO);
            prop_assert_eq!(quote.symbol, symbol);
        }
    }
}
