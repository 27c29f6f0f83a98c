//! Stream Client Integration Tests
//!
//! Runs the client against a local WebSocket server: subscription restore
//! after reconnect, trade delivery, and permanent close handling.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use quote_engine::infrastructure::provider::ReconnectConfig;
use quote_engine::{
    ConnectionState, Credentials, StreamClient, StreamClientConfig, StreamEvent, StreamSubscriber,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    listener: TcpListener,
    client: Arc<StreamClient>,
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
}

async fn harness() -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = StreamClientConfig {
        url: format!("ws://{addr}"),
        credentials: Credentials::new("test-key".to_string()),
        reconnect: ReconnectConfig {
            delay: Duration::from_millis(50),
        },
    };
    let (event_tx, events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let client = Arc::new(StreamClient::new(config, event_tx, cancel.clone()));

    Harness {
        listener,
        client,
        events,
        cancel,
    }
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (tcp, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    tokio_tungstenite::accept_async(tcp).await.unwrap()
}

/// Read `count` control frames as `(action, symbol)` pairs.
async fn read_controls(ws: &mut WebSocketStream<TcpStream>, count: usize) -> Vec<(String, String)> {
    let mut frames = Vec::new();
    while frames.len() < count {
        let msg = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            frames.push((
                value["action"].as_str().unwrap().to_string(),
                value["symbol"].as_str().unwrap().to_string(),
            ));
        }
    }
    frames.sort();
    frames
}

async fn next_trade(events: &mut mpsc::Receiver<StreamEvent>) -> quote_engine::TradeTick {
    loop {
        match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            StreamEvent::Trade(tick) => return tick,
            _ => continue,
        }
    }
}

fn subscribe(symbol: &str) -> (String, String) {
    ("subscribe".to_string(), symbol.to_string())
}

#[tokio::test]
async fn subscriptions_are_restored_once_per_reconnect() {
    let Harness {
        listener,
        client,
        mut events,
        cancel,
    } = harness().await;

    client.subscribe("AAPL");
    client.subscribe("msft");
    client.subscribe("AAPL");

    let run = tokio::spawn(Arc::clone(&client).run());

    let mut ws = accept(&listener).await;
    assert_eq!(
        read_controls(&mut ws, 2).await,
        vec![subscribe("AAPL"), subscribe("MSFT")]
    );

    for _ in 0..4 {
        ws.close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "restarting".into(),
        }))
        .await
        .unwrap();

        ws = accept(&listener).await;
        assert_eq!(
            read_controls(&mut ws, 2).await,
            vec![subscribe("AAPL"), subscribe("MSFT")]
        );
        assert_eq!(
            client.subscribed_symbols(),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );
    }

    // Live changes go out as single frames
    client.subscribe("TSLA");
    client.unsubscribe("AAPL");
    assert_eq!(
        read_controls(&mut ws, 2).await,
        vec![
            subscribe("TSLA"),
            ("unsubscribe".to_string(), "AAPL".to_string())
        ]
    );

    ws.send(Message::Text(
        r#"{"type":"trade","data":[{"s":"TSLA","p":250.5,"t":1717430400123,"v":7}]}"#.into(),
    ))
    .await
    .unwrap();

    let tick = next_trade(&mut events).await;
    assert_eq!(tick.symbol, "TSLA");
    assert_eq!(tick.volume, Some(7));
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(
        client.subscribed_symbols(),
        vec!["MSFT".to_string(), "TSLA".to_string()]
    );

    cancel.cancel();
    assert!(timeout(WAIT, run).await.unwrap().unwrap().is_ok());
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn auth_close_code_stops_reconnecting() {
    let Harness {
        listener,
        client,
        mut events,
        cancel: _cancel,
    } = harness().await;

    let run = tokio::spawn(Arc::clone(&client).run());

    let mut ws = accept(&listener).await;
    ws.close(Some(CloseFrame {
        code: CloseCode::from(4001),
        reason: "invalid token".into(),
    }))
    .await
    .unwrap();

    let error = timeout(WAIT, run).await.unwrap().unwrap().unwrap_err();
    assert!(error.is_permanent());
    assert!(client.is_permanently_closed());

    let mut closed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, StreamEvent::PermanentlyClosed { .. }) {
            closed = true;
        }
    }
    assert!(closed);

    // No reconnect attempt follows
    assert!(
        timeout(Duration::from_millis(200), listener.accept())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn rejected_handshake_is_permanent() {
    let Harness {
        listener,
        client,
        cancel: _cancel,
        ..
    } = harness().await;

    let server = tokio::spawn(async move {
        let (mut tcp, _) = listener.accept().await.unwrap();
        let mut buf = [0_u8; 2048];
        let _ = tcp.read(&mut buf).await.unwrap();
        tcp.write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        tcp.shutdown().await.unwrap();
        listener
    });

    let error = timeout(WAIT, Arc::clone(&client).run())
        .await
        .unwrap()
        .unwrap_err();
    assert!(error.is_permanent());
    assert!(client.is_permanently_closed());

    server.await.unwrap();
}

#[tokio::test]
async fn error_frame_degrades_until_next_trade() {
    let Harness {
        listener,
        client,
        mut events,
        cancel,
    } = harness().await;

    let run = tokio::spawn(Arc::clone(&client).run());
    let mut ws = accept(&listener).await;

    ws.send(Message::Text(
        r#"{"type":"error","msg":"Subscribing to too many symbols"}"#.into(),
    ))
    .await
    .unwrap();

    loop {
        match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            StreamEvent::StateChanged(ConnectionState::Degraded) => break,
            _ => continue,
        }
    }

    ws.send(Message::Text(
        r#"{"type":"trade","data":[{"s":"AAPL","p":195.1}]}"#.into(),
    ))
    .await
    .unwrap();

    let tick = next_trade(&mut events).await;
    assert_eq!(tick.symbol, "AAPL");
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    cancel.cancel();
    assert!(timeout(WAIT, run).await.unwrap().unwrap().is_ok());
}
