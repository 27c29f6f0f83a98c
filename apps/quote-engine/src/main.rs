//! Quote Engine Binary
//!
//! Starts the quote cache, alert engine and HTTP API.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-engine
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_DATA_API_KEY`: Provider API key (unset = demo mode)
//! - `MARKET_DATA_REST_URL`, `MARKET_DATA_STREAM_URL`: Provider endpoints
//! - `QUOTE_ENGINE_*`: Quota, cache, scheduler, alert and port tunables
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: quote-engine)
//! - `RUST_LOG`: Log filter (default: `quote_engine=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_engine::infrastructure::provider::ReconnectConfig;
use quote_engine::infrastructure::telemetry;
use quote_engine::{
    EngineConfig, HttpQuoteProvider, HttpServer, HttpServerState, LogNotificationSink,
    MarketDataService, SharedClock, StreamClient, StreamClientConfig, SystemClock, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the stream event channel.
const STREAM_EVENT_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Quote Engine");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, metrics disabled");
    }

    let config = EngineConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let clock: SharedClock = Arc::new(SystemClock);

    let mut service = MarketDataService::new(
        config.service.clone(),
        Arc::clone(&clock),
        Arc::new(LogNotificationSink),
    );

    if let Some(credentials) = config.provider.credentials.clone() {
        let provider = HttpQuoteProvider::new(
            &config.provider.rest_url,
            credentials,
            config.service.request_timeout,
            Arc::clone(&clock),
        )?;
        service = service.with_provider(Arc::new(provider));
    }

    let stream_client = match (config.stream_enabled(), &config.provider.credentials) {
        (true, Some(credentials)) => {
            let (event_tx, event_rx) = mpsc::channel(STREAM_EVENT_CAPACITY);
            let stream_config = StreamClientConfig {
                url: config.provider.stream_url.clone(),
                credentials: credentials.clone(),
                reconnect: ReconnectConfig {
                    delay: config.provider.reconnect_delay,
                },
            };
            let client = Arc::new(StreamClient::new(
                stream_config,
                event_tx,
                shutdown_token.clone(),
            ));
            service = service.with_stream(client.clone(), event_rx);
            Some(client)
        }
        _ => None,
    };

    let service = Arc::new(service);
    service.start()?;

    // Spawn stream client
    if let Some(client) = stream_client {
        tokio::spawn(async move {
            if let Err(e) = client.run().await {
                tracing::error!(error = %e, "Stream client stopped");
            }
        });
    }

    // Spawn HTTP server
    let http_state = Arc::new(HttpServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&service),
    ));
    let http_server = HttpServer::new(
        config.server.http_port,
        http_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!(demo_mode = service.demo_mode(), "Quote engine ready");

    await_shutdown(shutdown_token).await?;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, service.stop())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Service tasks did not stop in time"
        );
    }

    tracing::info!("Quote engine stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        demo_mode = config.demo_mode(),
        stream_enabled = config.stream_enabled(),
        http_port = config.server.http_port,
        quota_limit = config.service.quota_limit,
        quota_window_secs = config.service.quota_window.num_seconds(),
        cache_ttl_secs = config.service.cache_ttl.num_seconds(),
        "Configuration loaded"
    );
    tracing::debug!(
        rest_url = %config.provider.rest_url,
        stream_url = %config.provider.stream_url,
        "Provider endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM or SIGINT, then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    Ok(())
}
