//! Trade Stream Client
//!
//! Keeps one WebSocket connection to the provider's trade stream and feeds
//! [`StreamEvent`]s to the market data service.
//!
//! # Lifecycle
//!
//! ```text
//! DISCONNECTED ──connect──► CONNECTING ──open──► CONNECTED ◄──trade── DEGRADED
//!      ▲                                            │   ╲──error frame──►╯
//!      └────────── transient close (fixed delay) ◄──┘
//! ```
//!
//! A permanent close (handshake 401/403, close codes 1008/4001/4003, or an
//! auth error frame) ends the run loop; the process then relies on polling.
//!
//! # Subscriptions
//!
//! The client owns a symbol *set*. `subscribe`/`unsubscribe` always update
//! the set and only send a frame while the socket is open. Every
//! (re)connect re-sends one subscribe frame per symbol in the set.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::codec::{decode_frame, trade_ticks};
use super::messages::{ControlFrame, StreamFrame};
use super::reconnect::{
    ReconnectConfig, ReconnectPolicy, is_auth_error_message, is_permanent_close_code,
    is_permanent_handshake_status,
};
use crate::application::ports::{StreamEvent, StreamSubscriber};
use crate::domain::quote::{Symbol, normalize_symbol};
use crate::domain::subscription::ConnectionState;
use crate::infrastructure::config::Credentials;
use crate::infrastructure::metrics::{record_reconnect, set_stream_connected};

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a stream connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// The server refused the WebSocket upgrade.
    #[error("handshake rejected with HTTP {status}")]
    Handshake {
        /// HTTP status of the upgrade response.
        status: u16,
    },

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The server closed the connection.
    #[error("connection closed (code {code:?}): {reason}")]
    Closed {
        /// Close code, if the server sent a close frame.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// The provider rejected the credentials in an error frame.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// Control frame could not be encoded.
    #[error("failed to encode control frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// The event receiver was dropped.
    #[error("event channel closed")]
    EventChannelClosed,

    /// `run` was called twice.
    #[error("stream client already running")]
    AlreadyRunning,
}

impl StreamClientError {
    /// Whether reconnecting is pointless after this error.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Handshake { status } => is_permanent_handshake_status(*status),
            Self::Closed {
                code: Some(code), ..
            } => is_permanent_close_code(*code),
            Self::AuthRejected(_) => true,
            _ => false,
        }
    }

    fn from_connect(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::Http(response) => Self::Handshake {
                status: response.status().as_u16(),
            },
            other => Self::WebSocket(other),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// WebSocket URL without credentials.
    pub url: String,
    /// API credentials, sent as the `token` query parameter.
    pub credentials: Credentials,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl StreamClientConfig {
    /// Create a new configuration with the default reconnect policy.
    #[must_use]
    pub fn new(url: String, credentials: Credentials) -> Self {
        Self {
            url,
            credentials,
            reconnect: ReconnectConfig::default(),
        }
    }

    fn connect_url(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}token={}",
            self.url,
            self.credentials.api_key()
        )
    }
}

// =============================================================================
// Stream Client
// =============================================================================

#[derive(Debug)]
enum Command {
    Subscribe(Symbol),
    Unsubscribe(Symbol),
}

/// WebSocket client for the provider's trade stream.
pub struct StreamClient {
    config: StreamClientConfig,
    state: RwLock<ConnectionState>,
    symbols: RwLock<BTreeSet<Symbol>>,
    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    permanently_closed: AtomicBool,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("url", &self.config.url)
            .field("state", &*self.state.read())
            .field("symbols", &*self.symbols.read())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a new stream client.
    #[must_use]
    pub fn new(
        config: StreamClientConfig,
        event_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            symbols: RwLock::new(BTreeSet::new()),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            event_tx,
            cancel,
            permanently_closed: AtomicBool::new(false),
        }
    }

    /// Whether a permanent close has disabled reconnects.
    #[must_use]
    pub fn is_permanently_closed(&self) -> bool {
        self.permanently_closed.load(Ordering::Relaxed)
    }

    /// Run the connection loop until cancelled or permanently closed.
    ///
    /// # Errors
    ///
    /// Returns the error that closed the stream for good.
    pub async fn run(self: Arc<Self>) -> Result<(), StreamClientError> {
        let mut commands = self
            .command_rx
            .lock()
            .take()
            .ok_or(StreamClientError::AlreadyRunning)?;
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                self.set_state(ConnectionState::Disconnected);
                tracing::info!("Stream client cancelled");
                return Ok(());
            }

            match self
                .connect_and_run(&mut commands, &mut reconnect_policy)
                .await
            {
                Ok(()) => {
                    self.set_state(ConnectionState::Disconnected);
                    tracing::info!("Stream connection closed gracefully");
                    return Ok(());
                }
                Err(e) if e.is_permanent() => {
                    self.set_state(ConnectionState::Disconnected);
                    self.permanently_closed.store(true, Ordering::Relaxed);
                    tracing::error!(error = %e, "Stream closed permanently, reconnects disabled");

                    let _ = self
                        .event_tx
                        .send(StreamEvent::PermanentlyClosed {
                            reason: e.to_string(),
                        })
                        .await;
                    return Err(e);
                }
                Err(StreamClientError::EventChannelClosed) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(StreamClientError::EventChannelClosed);
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    tracing::warn!(error = %e, "Stream connection error");

                    let delay = reconnect_policy.next_delay();

                    record_reconnect();
                    tracing::info!(
                        attempt = reconnect_policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting to trade stream"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Stream client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect to the stream and pump messages until error or cancellation.
    async fn connect_and_run(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), StreamClientError> {
        self.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "Connecting to trade stream");

        let connected = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(self.config.connect_url()) => connected,
        };
        let (ws_stream, _response) = connected.map_err(StreamClientError::from_connect)?;
        let (mut write, mut read) = ws_stream.split();

        reconnect_policy.reset();
        self.set_state(ConnectionState::Connected);
        tracing::info!("Trade stream connected");

        // The restore below covers anything queued while disconnected.
        while commands.try_recv().is_ok() {}

        let symbols = self.subscribed_symbols();
        for symbol in &symbols {
            send_frame(&mut write, &ControlFrame::subscribe(symbol.as_str())).await?;
        }
        if !symbols.is_empty() {
            tracing::debug!(count = symbols.len(), "Restored stream subscriptions");
        }

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                command = commands.recv() => {
                    if let Some(command) = command {
                        self.send_command(&mut write, command).await?;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame.map_or((None, String::new()), |f| {
                                (Some(u16::from(f.code)), f.reason.as_str().to_string())
                            });
                            tracing::info!(?code, %reason, "Server sent close frame");
                            return Err(StreamClientError::Closed { code, reason });
                        }
                        Some(Ok(_)) => {
                            // Ignore other message types
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            return Err(StreamClientError::Closed {
                                code: None,
                                reason: "stream ended".to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Handle a text frame from the stream.
    async fn handle_text_message(&self, text: &str) -> Result<(), StreamClientError> {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring undecodable stream frame");
                return Ok(());
            }
        };

        match frame {
            StreamFrame::Trade { data } => {
                if self.connection_state() == ConnectionState::Degraded {
                    self.set_state(ConnectionState::Connected);
                }

                for tick in trade_ticks(data) {
                    self.event_tx
                        .send(StreamEvent::Trade(tick))
                        .await
                        .map_err(|_| StreamClientError::EventChannelClosed)?;
                }
            }
            StreamFrame::Ping => {
                tracing::trace!("Stream ping");
            }
            StreamFrame::Error { msg } => {
                if is_auth_error_message(&msg) {
                    return Err(StreamClientError::AuthRejected(msg));
                }
                tracing::warn!(%msg, "Stream reported an error");
                self.set_state(ConnectionState::Degraded);
            }
            StreamFrame::Other => {
                tracing::trace!("Ignoring unhandled frame type");
            }
        }

        Ok(())
    }

    async fn send_command<W>(&self, write: &mut W, command: Command) -> Result<(), StreamClientError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        // The set may have changed since the command was queued.
        let frame = match command {
            Command::Subscribe(symbol) if self.symbols.read().contains(&symbol) => {
                ControlFrame::subscribe(symbol)
            }
            Command::Unsubscribe(symbol) if !self.symbols.read().contains(&symbol) => {
                ControlFrame::unsubscribe(symbol)
            }
            _ => return Ok(()),
        };

        send_frame(write, &frame).await
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous == state {
            return;
        }

        set_stream_connected(state.is_open());
        tracing::debug!(from = previous.as_str(), to = state.as_str(), "Stream state changed");
        let _ = self.event_tx.try_send(StreamEvent::StateChanged(state));
    }
}

impl StreamSubscriber for StreamClient {
    fn subscribe(&self, symbol: &str) {
        let symbol = normalize_symbol(symbol);
        if !self.symbols.write().insert(symbol.clone()) {
            return;
        }

        if self.connection_state().is_open() {
            let _ = self.command_tx.send(Command::Subscribe(symbol));
        }
    }

    fn unsubscribe(&self, symbol: &str) {
        let symbol = normalize_symbol(symbol);
        if !self.symbols.write().remove(&symbol) {
            return;
        }

        if self.connection_state().is_open() {
            let _ = self.command_tx.send(Command::Unsubscribe(symbol));
        }
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn subscribed_symbols(&self) -> Vec<Symbol> {
        self.symbols.read().iter().cloned().collect()
    }
}

async fn send_frame<W>(write: &mut W, frame: &ControlFrame) -> Result<(), StreamClientError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = frame.to_json()?;
    tracing::debug!(action = ?frame.action, symbol = %frame.symbol, "Sending control frame");
    write.send(Message::Text(json.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn client() -> (StreamClient, mpsc::Receiver<StreamEvent>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let config = StreamClientConfig::new(
            "wss://stream.example.test".to_string(),
            Credentials::new("key".to_string()),
        );
        (
            StreamClient::new(config, event_tx, CancellationToken::new()),
            event_rx,
        )
    }

    fn queued_commands(client: &StreamClient) -> Vec<String> {
        let mut guard = client.command_rx.lock();
        let rx = guard.as_mut().unwrap();
        let mut out = Vec::new();
        while let Ok(command) = rx.try_recv() {
            out.push(format!("{command:?}"));
        }
        out
    }

    #[test]
    fn connect_url_carries_token() {
        let config = StreamClientConfig::new(
            "wss://ws.example.test".to_string(),
            Credentials::new("abc".to_string()),
        );
        assert_eq!(config.connect_url(), "wss://ws.example.test?token=abc");

        let config = StreamClientConfig::new(
            "wss://ws.example.test/?v=2".to_string(),
            Credentials::new("abc".to_string()),
        );
        assert_eq!(config.connect_url(), "wss://ws.example.test/?v=2&token=abc");
    }

    #[test]
    fn subscribe_while_disconnected_only_updates_set() {
        let (client, _events) = client();

        client.subscribe("msft");
        client.subscribe("AAPL");
        client.subscribe("AAPL");

        assert_eq!(
            client.subscribed_symbols(),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );
        assert!(queued_commands(&client).is_empty());
    }

    #[test]
    fn subscribe_while_connected_queues_frame_once() {
        let (client, _events) = client();
        client.set_state(ConnectionState::Connected);

        client.subscribe("AAPL");
        client.subscribe("AAPL");
        client.unsubscribe("AAPL");
        client.unsubscribe("AAPL");

        assert_eq!(
            queued_commands(&client),
            vec![
                "Subscribe(\"AAPL\")".to_string(),
                "Unsubscribe(\"AAPL\")".to_string()
            ]
        );
        assert!(client.subscribed_symbols().is_empty());
    }

    #[test]
    fn state_changes_are_published_once() {
        let (client, mut events) = client();

        client.set_state(ConnectionState::Connecting);
        client.set_state(ConnectionState::Connecting);
        client.set_state(ConnectionState::Connected);

        assert_eq!(
            events.try_recv().unwrap(),
            StreamEvent::StateChanged(ConnectionState::Connecting)
        );
        assert_eq!(
            events.try_recv().unwrap(),
            StreamEvent::StateChanged(ConnectionState::Connected)
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn error_frame_degrades_and_trade_recovers() {
        let (client, mut events) = client();
        client.set_state(ConnectionState::Connected);
        let _ = events.try_recv();

        client
            .handle_text_message(r#"{"type":"error","msg":"Subscribing to too many symbols"}"#)
            .await
            .unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Degraded);

        client
            .handle_text_message(r#"{"type":"trade","data":[{"s":"AAPL","p":195.5,"t":1,"v":3}]}"#)
            .await
            .unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);

        let mut trades = 0;
        while let Ok(event) = events.try_recv() {
            if let StreamEvent::Trade(tick) = event {
                assert_eq!(tick.symbol, "AAPL");
                trades += 1;
            }
        }
        assert_eq!(trades, 1);
    }

    #[tokio::test]
    async fn auth_error_frame_is_permanent() {
        let (client, _events) = client();

        let error = client
            .handle_text_message(r#"{"type":"error","msg":"Invalid API key"}"#)
            .await
            .unwrap_err();

        assert!(error.is_permanent());
    }

    #[tokio::test]
    async fn malformed_frames_are_ignored() {
        let (client, _events) = client();
        assert!(client.handle_text_message("garbage").await.is_ok());
    }

    #[test_case(StreamClientError::Handshake { status: 401 }, true ; "handshake 401")]
    #[test_case(StreamClientError::Handshake { status: 403 }, true ; "handshake 403")]
    #[test_case(StreamClientError::Handshake { status: 502 }, false ; "handshake 502")]
    #[test_case(StreamClientError::Closed { code: Some(1008), reason: String::new() }, true ; "policy violation")]
    #[test_case(StreamClientError::Closed { code: Some(4001), reason: String::new() }, true ; "close 4001")]
    #[test_case(StreamClientError::Closed { code: Some(1006), reason: String::new() }, false ; "abnormal close")]
    #[test_case(StreamClientError::Closed { code: None, reason: String::new() }, false ; "stream ended")]
    #[test_case(StreamClientError::AuthRejected(String::new()), true ; "auth frame")]
    fn permanence(error: StreamClientError, permanent: bool) {
        assert_eq!(error.is_permanent(), permanent);
    }
}
