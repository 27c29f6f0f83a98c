//! Engine Configuration Settings
//!
//! Configuration types for the quote engine, loaded from environment
//! variables. Every variable is optional; without an API key the engine runs
//! in demo mode.

use std::time::Duration;

use crate::application::services::market_data::ServiceSettings;
use crate::application::services::scheduler::BatchConfig;

/// Default REST base URL of the market data provider.
pub const DEFAULT_REST_URL: &str = "https://finnhub.io/api/v1";

/// Default WebSocket URL of the market data provider.
pub const DEFAULT_STREAM_URL: &str = "wss://ws.finnhub.io";

/// Market data API credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Upstream provider settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// API credentials (`None` = demo mode).
    pub credentials: Option<Credentials>,
    /// REST base URL.
    pub rest_url: String,
    /// WebSocket URL.
    pub stream_url: String,
    /// Whether to open the trade stream.
    pub stream_enabled: bool,
    /// Fixed delay before reconnecting after a transient close.
    pub reconnect_delay: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            credentials: None,
            rest_url: DEFAULT_REST_URL.to_string(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
            stream_enabled: true,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP API, health and metrics port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8083 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Upstream provider settings.
    pub provider: ProviderSettings,
    /// Service tunables.
    pub service: ServiceSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unusable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let credentials = match env.get("MARKET_DATA_API_KEY") {
            Some(key) if key.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("MARKET_DATA_API_KEY".to_string()));
            }
            Some(key) => Some(Credentials::new(key.trim().to_string())),
            None => None,
        };

        let provider_defaults = ProviderSettings::default();
        let provider = ProviderSettings {
            credentials,
            rest_url: env
                .get("MARKET_DATA_REST_URL")
                .unwrap_or(provider_defaults.rest_url),
            stream_url: env
                .get("MARKET_DATA_STREAM_URL")
                .unwrap_or(provider_defaults.stream_url),
            stream_enabled: env.bool(
                "QUOTE_ENGINE_STREAM_ENABLED",
                provider_defaults.stream_enabled,
            ),
            reconnect_delay: env.duration_secs(
                "QUOTE_ENGINE_RECONNECT_DELAY_SECS",
                provider_defaults.reconnect_delay,
            ),
        };

        let defaults = ServiceSettings::default();
        let service = ServiceSettings {
            quota_limit: env.parse("QUOTE_ENGINE_QUOTA_LIMIT", defaults.quota_limit),
            quota_window: env.chrono_secs("QUOTE_ENGINE_QUOTA_WINDOW_SECS", defaults.quota_window),
            cache_ttl: env.chrono_secs("QUOTE_ENGINE_CACHE_TTL_SECS", defaults.cache_ttl),
            request_spacing: env.duration_millis(
                "QUOTE_ENGINE_REQUEST_SPACING_MS",
                defaults.request_spacing,
            ),
            request_timeout: env.duration_secs(
                "QUOTE_ENGINE_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            ),
            batch: BatchConfig {
                size: env.parse("QUOTE_ENGINE_BATCH_SIZE", defaults.batch.size),
                pause: env.duration_millis("QUOTE_ENGINE_BATCH_PAUSE_MS", defaults.batch.pause),
            },
            alert_cooldown: env.chrono_secs(
                "QUOTE_ENGINE_ALERT_COOLDOWN_SECS",
                defaults.alert_cooldown,
            ),
            poll_interval: env.duration_secs(
                "QUOTE_ENGINE_POLL_INTERVAL_SECS",
                defaults.poll_interval,
            ),
        };

        if service.quota_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "QUOTE_ENGINE_QUOTA_LIMIT".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        if service.batch.size == 0 {
            return Err(ConfigError::InvalidValue(
                "QUOTE_ENGINE_BATCH_SIZE".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let server = ServerSettings {
            http_port: env.parse("QUOTE_ENGINE_HTTP_PORT", ServerSettings::default().http_port),
        };

        Ok(Self {
            provider,
            service,
            server,
        })
    }

    /// Whether no credentials are configured.
    #[must_use]
    pub const fn demo_mode(&self) -> bool {
        self.provider.credentials.is_none()
    }

    /// Whether the trade stream should be opened.
    #[must_use]
    pub const fn stream_enabled(&self) -> bool {
        self.provider.stream_enabled && !self.demo_mode()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable holds a value the engine cannot run with.
    #[error("environment variable {0} is invalid: {1}")]
    InvalidValue(String, String),
}

/// Variable lookup with typed, defaulting accessors.
///
/// Unparseable values fall back to the default.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map_or(default, |v| match v.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => default,
            })
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn chrono_secs(&self, key: &str, default: chrono::Duration) -> chrono::Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(chrono::Duration::try_seconds)
            .filter(|d| *d >= chrono::Duration::zero())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config(&[]).unwrap();

        assert!(config.demo_mode());
        assert!(!config.stream_enabled());
        assert_eq!(config.provider.rest_url, DEFAULT_REST_URL);
        assert_eq!(config.provider.stream_url, DEFAULT_STREAM_URL);
        assert_eq!(config.provider.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.service.quota_limit, 60);
        assert_eq!(config.service.quota_window, chrono::Duration::seconds(60));
        assert_eq!(config.service.cache_ttl, chrono::Duration::seconds(30));
        assert_eq!(config.service.request_spacing, Duration::from_secs(1));
        assert_eq!(config.service.request_timeout, Duration::from_secs(10));
        assert_eq!(config.service.batch.size, 5);
        assert_eq!(config.service.batch.pause, Duration::from_millis(250));
        assert_eq!(config.service.alert_cooldown, chrono::Duration::hours(1));
        assert_eq!(config.server.http_port, 8083);
    }

    #[test]
    fn api_key_enables_live_mode() {
        let config = config(&[("MARKET_DATA_API_KEY", " abc123 ")]).unwrap();

        assert!(!config.demo_mode());
        assert!(config.stream_enabled());
        assert_eq!(
            config.provider.credentials.as_ref().map(Credentials::api_key),
            Some("abc123")
        );
    }

    #[test]
    fn stream_can_be_disabled() {
        let config = config(&[
            ("MARKET_DATA_API_KEY", "abc123"),
            ("QUOTE_ENGINE_STREAM_ENABLED", "false"),
        ])
        .unwrap();

        assert!(!config.stream_enabled());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("QUOTE_ENGINE_QUOTA_LIMIT", "30"),
            ("QUOTE_ENGINE_CACHE_TTL_SECS", "5"),
            ("QUOTE_ENGINE_REQUEST_SPACING_MS", "200"),
            ("QUOTE_ENGINE_BATCH_SIZE", "10"),
            ("QUOTE_ENGINE_HTTP_PORT", "9000"),
        ])
        .unwrap();

        assert_eq!(config.service.quota_limit, 30);
        assert_eq!(config.service.cache_ttl, chrono::Duration::seconds(5));
        assert_eq!(config.service.request_spacing, Duration::from_millis(200));
        assert_eq!(config.service.batch.size, 10);
        assert_eq!(config.server.http_port, 9000);
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let config = config(&[
            ("QUOTE_ENGINE_QUOTA_LIMIT", "lots"),
            ("QUOTE_ENGINE_STREAM_ENABLED", "maybe"),
        ])
        .unwrap();

        assert_eq!(config.service.quota_limit, 60);
        assert!(config.provider.stream_enabled);
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(
            config(&[("MARKET_DATA_API_KEY", "  ")]),
            Err(ConfigError::EmptyValue(key)) if key == "MARKET_DATA_API_KEY"
        ));
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(matches!(
            config(&[("QUOTE_ENGINE_QUOTA_LIMIT", "0")]),
            Err(ConfigError::InvalidValue(key, _)) if key == "QUOTE_ENGINE_QUOTA_LIMIT"
        ));
        assert!(matches!(
            config(&[("QUOTE_ENGINE_BATCH_SIZE", "0")]),
            Err(ConfigError::InvalidValue(key, _)) if key == "QUOTE_ENGINE_BATCH_SIZE"
        ));
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("key123".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(debug.contains("[REDACTED]"));
    }
}
