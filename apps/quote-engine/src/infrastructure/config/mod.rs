//! Configuration Module
//!
//! Environment-driven configuration for the quote engine.

mod settings;

pub use settings::{
    ConfigError, Credentials, DEFAULT_REST_URL, DEFAULT_STREAM_URL, EngineConfig,
    ProviderSettings, ServerSettings,
};
