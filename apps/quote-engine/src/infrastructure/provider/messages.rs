//! Provider Wire Types
//!
//! Serde representations of the market data provider's payloads.
//!
//! # REST
//!
//! `GET {rest_url}/quote?symbol=AAPL` returns compact keys:
//!
//! ```json
//! {"c":195.12,"d":1.3,"dp":0.67,"h":196.0,"l":193.4,"o":194.0,"pc":193.82,"t":1717430400}
//! ```
//!
//! # Streaming
//!
//! Control frames (client → server):
//!
//! ```json
//! {"action":"subscribe","symbol":"AAPL"}
//! ```
//!
//! Event frames (server → client):
//!
//! ```json
//! {"type":"trade","data":[{"s":"AAPL","p":195.1,"t":1717430400123,"v":100}]}
//! {"type":"ping"}
//! {"type":"error","msg":"Invalid API key"}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// REST
// =============================================================================

/// Quote response body. Unknown symbols come back with `c = 0` and nulls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawQuote {
    /// Current price.
    #[serde(rename = "c", default)]
    pub current: Option<Decimal>,
    /// Change against previous close.
    #[serde(rename = "d", default)]
    pub change: Option<Decimal>,
    /// Percent change against previous close.
    #[serde(rename = "dp", default)]
    pub change_percent: Option<Decimal>,
    /// Session high.
    #[serde(rename = "h", default)]
    pub high: Option<Decimal>,
    /// Session low.
    #[serde(rename = "l", default)]
    pub low: Option<Decimal>,
    /// Session open.
    #[serde(rename = "o", default)]
    pub open: Option<Decimal>,
    /// Previous close.
    #[serde(rename = "pc", default)]
    pub previous_close: Option<Decimal>,
    /// Last trade time (Unix seconds).
    #[serde(rename = "t", default)]
    pub timestamp: Option<i64>,
}

// =============================================================================
// Streaming: Control
// =============================================================================

/// Subscription action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Start receiving trades for a symbol.
    Subscribe,
    /// Stop receiving trades for a symbol.
    Unsubscribe,
}

/// Control frame sent to the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlFrame {
    /// Requested action.
    pub action: ControlAction,
    /// Target symbol.
    pub symbol: String,
}

impl ControlFrame {
    /// Subscribe frame for `symbol`.
    #[must_use]
    pub fn subscribe(symbol: impl Into<String>) -> Self {
        Self {
            action: ControlAction::Subscribe,
            symbol: symbol.into(),
        }
    }

    /// Unsubscribe frame for `symbol`.
    #[must_use]
    pub fn unsubscribe(symbol: impl Into<String>) -> Self {
        Self {
            action: ControlAction::Unsubscribe,
            symbol: symbol.into(),
        }
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Streaming: Events
// =============================================================================

/// Event frame received from the stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    /// Batch of trade prints.
    Trade {
        /// Trade prints.
        #[serde(default)]
        data: Vec<TradePrint>,
    },
    /// Keep-alive.
    Ping,
    /// Provider-side error.
    Error {
        /// Error message.
        #[serde(default)]
        msg: String,
    },
    /// Any other frame type.
    #[serde(other)]
    Other,
}

/// A single trade print. Short and long field names are both accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TradePrint {
    /// Symbol.
    #[serde(rename = "s", alias = "symbol")]
    pub symbol: String,
    /// Trade price.
    #[serde(rename = "p", alias = "price")]
    pub price: Decimal,
    /// Trade time (Unix milliseconds).
    #[serde(rename = "t", alias = "timestamp", default)]
    pub timestamp: Option<i64>,
    /// Trade size.
    #[serde(rename = "v", alias = "volume", default)]
    pub volume: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn control_frame_serialization() {
        assert_eq!(
            ControlFrame::subscribe("AAPL").to_json().unwrap(),
            r#"{"action":"subscribe","symbol":"AAPL"}"#
        );
        assert_eq!(
            ControlFrame::unsubscribe("MSFT").to_json().unwrap(),
            r#"{"action":"unsubscribe","symbol":"MSFT"}"#
        );
    }

    #[test]
    fn trade_frame_short_names() {
        let frame: StreamFrame = serde_json::from_str(
            r#"{"type":"trade","data":[{"s":"AAPL","p":195.1,"t":1717430400123,"v":100}]}"#,
        )
        .unwrap();

        let StreamFrame::Trade { data } = frame else {
            panic!("expected trade frame");
        };
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].symbol, "AAPL");
        assert_eq!(data[0].price, dec!(195.1));
        assert_eq!(data[0].timestamp, Some(1_717_430_400_123));
        assert_eq!(data[0].volume, Some(dec!(100)));
    }

    #[test]
    fn trade_frame_long_names() {
        let frame: StreamFrame = serde_json::from_str(
            r#"{"type":"trade","data":[{"symbol":"MSFT","price":"420.5","timestamp":1717430400000}]}"#,
        )
        .unwrap();

        let StreamFrame::Trade { data } = frame else {
            panic!("expected trade frame");
        };
        assert_eq!(data[0].symbol, "MSFT");
        assert_eq!(data[0].price, dec!(420.5));
        assert_eq!(data[0].volume, None);
    }

    #[test]
    fn control_and_unknown_frames() {
        assert_eq!(
            serde_json::from_str::<StreamFrame>(r#"{"type":"ping"}"#).unwrap(),
            StreamFrame::Ping
        );
        assert_eq!(
            serde_json::from_str::<StreamFrame>(r#"{"type":"error","msg":"Invalid API key"}"#)
                .unwrap(),
            StreamFrame::Error {
                msg: "Invalid API key".to_string()
            }
        );
        assert_eq!(
            serde_json::from_str::<StreamFrame>(r#"{"type":"news","data":[]}"#).unwrap(),
            StreamFrame::Other
        );
    }

    #[test]
    fn raw_quote_with_nulls() {
        let raw: RawQuote =
            serde_json::from_str(r#"{"c":0,"d":null,"dp":null,"h":0,"l":0,"o":0,"pc":0,"t":0}"#)
                .unwrap();

        assert_eq!(raw.current, Some(Decimal::ZERO));
        assert_eq!(raw.change, None);
        assert_eq!(raw.change_percent, None);
    }
}
