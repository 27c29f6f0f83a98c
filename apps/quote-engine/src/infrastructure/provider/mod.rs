//! Market Data Provider Adapters
//!
//! - **REST**: [`HttpQuoteProvider`], one quote per request
//! - **Streaming**: [`StreamClient`], trade prints over WebSocket (JSON frames)

pub mod codec;
pub mod http;
pub mod messages;
pub mod reconnect;
pub mod stream;

pub use codec::{QuoteParseError, decode_frame, parse_quote, trade_ticks, validate_quote};
pub use http::{API_KEY_HEADER, HttpQuoteProvider};
pub use messages::{ControlAction, ControlFrame, RawQuote, StreamFrame, TradePrint};
pub use reconnect::{PERMANENT_CLOSE_CODES, ReconnectConfig, ReconnectPolicy};
pub use stream::{StreamClient, StreamClientConfig, StreamClientError};
