//! Logging and OpenTelemetry Tracing
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` (`RUST_LOG`,
//! default `quote_engine=info`), a fmt layer, and an optional OTLP span
//! exporter.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: Set to "false" to disable OTLP export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: quote-engine)

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "quote-engine";
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";
const DEFAULT_DIRECTIVES: [&str; 4] = ["quote_engine=info", "h2=warn", "hyper=warn", "tungstenite=warn"];

/// Telemetry setup errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A filter directive did not parse.
    #[error("invalid log directive: {0}")]
    Directive(#[from] tracing_subscriber::filter::ParseError),

    /// The OTLP exporter could not be built.
    #[error("failed to create OTLP exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    /// A global subscriber is already installed.
    #[error("failed to install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Shuts down the tracer provider when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Whether spans are exported over OTLP.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            enabled: lookup("OTEL_ENABLED").is_none_or(|v| !v.eq_ignore_ascii_case("false")),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            service_name: lookup("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }
}

/// Install the subscriber using the environment configuration.
///
/// # Errors
///
/// See [`init_with_config`].
pub fn init() -> Result<TelemetryGuard, TelemetryError> {
    init_with_config(TelemetryConfig::from_env())
}

/// Install the subscriber. Keep the guard alive for the whole run.
///
/// # Errors
///
/// Returns `TelemetryError` if the exporter cannot be built or a subscriber
/// is already installed.
pub fn init_with_config(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let mut env_filter = EnvFilter::from_default_env();
    for directive in DEFAULT_DIRECTIVES {
        env_filter = env_filter.add_directive(directive.parse::<Directive>()?);
    }

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        return Ok(TelemetryGuard {
            tracer_provider: None,
        });
    }

    let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    let tracer = tracer_provider.tracer(config.service_name);
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    })
}
