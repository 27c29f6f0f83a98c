//! Provider Payload Codec
//!
//! Parse-and-validate at the provider boundary: raw payloads either become a
//! well-formed [`Quote`] / [`TradeTick`] or a typed [`QuoteParseError`].
//! Nothing downstream ever sees a zero or missing price.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::messages::{RawQuote, StreamFrame, TradePrint};
use crate::application::ports::{ProviderError, TradeTick};
use crate::domain::quote::{Quote, normalize_symbol, percent_change};

/// Payload validation errors.
#[derive(Debug, thiserror::Error)]
pub enum QuoteParseError {
    /// Body is not valid JSON for the expected shape.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// Price is zero: the provider has no data for the symbol.
    #[error("zero price for {0}")]
    ZeroPrice(String),

    /// Price is negative.
    #[error("negative price {price} for {symbol}")]
    NegativePrice {
        /// Symbol.
        symbol: String,
        /// Reported price.
        price: Decimal,
    },
}

impl From<QuoteParseError> for ProviderError {
    fn from(error: QuoteParseError) -> Self {
        match error {
            QuoteParseError::ZeroPrice(symbol) => Self::NoData(symbol),
            other => Self::InvalidPayload(other.to_string()),
        }
    }
}

/// Decode and validate a REST quote body.
///
/// # Errors
///
/// Returns `QuoteParseError` for malformed JSON or an unusable price.
pub fn parse_quote(
    symbol: &str,
    body: &str,
    observed_at: DateTime<Utc>,
) -> Result<Quote, QuoteParseError> {
    let raw: RawQuote = serde_json::from_str(body)?;
    validate_quote(symbol, &raw, observed_at)
}

/// Validate a decoded REST quote.
///
/// Missing session fields are filled from the current price and previous
/// close; high and low are widened to include the current price.
///
/// # Errors
///
/// Returns `QuoteParseError` when the current price is missing, zero or
/// negative.
pub fn validate_quote(
    symbol: &str,
    raw: &RawQuote,
    observed_at: DateTime<Utc>,
) -> Result<Quote, QuoteParseError> {
    let symbol = normalize_symbol(symbol);
    let current = raw.current.ok_or(QuoteParseError::MissingField("c"))?;

    if current.is_zero() {
        return Err(QuoteParseError::ZeroPrice(symbol));
    }
    if current.is_sign_negative() {
        return Err(QuoteParseError::NegativePrice {
            symbol,
            price: current,
        });
    }

    let positive = |value: Option<Decimal>| value.filter(|v| *v > Decimal::ZERO);

    let previous_close = positive(raw.previous_close).unwrap_or(current);
    let change = raw.change.unwrap_or(current - previous_close);
    let change_percent = raw
        .change_percent
        .unwrap_or_else(|| percent_change(change, previous_close));

    Ok(Quote {
        symbol,
        current_price: current,
        change,
        change_percent,
        high: positive(raw.high).map_or(current, |high| high.max(current)),
        low: positive(raw.low).map_or(current, |low| low.min(current)),
        open: positive(raw.open).unwrap_or(previous_close),
        previous_close,
        volume: None,
        observed_at,
    })
}

/// Decode one stream text frame.
///
/// # Errors
///
/// Returns `QuoteParseError::Json` if the frame is not a known shape.
pub fn decode_frame(text: &str) -> Result<StreamFrame, QuoteParseError> {
    Ok(serde_json::from_str(text.trim())?)
}

/// Convert trade prints into ticks, dropping prints without a positive price.
#[must_use]
pub fn trade_ticks(prints: Vec<TradePrint>) -> Vec<TradeTick> {
    prints
        .into_iter()
        .filter(|print| print.price > Decimal::ZERO && !print.symbol.trim().is_empty())
        .map(|print| TradeTick {
            symbol: normalize_symbol(&print.symbol),
            price: print.price,
            volume: print.volume.and_then(|v| v.trunc().to_u64()),
            traded_at: print.timestamp.and_then(DateTime::from_timestamp_millis),
        })
        .collect()
}
