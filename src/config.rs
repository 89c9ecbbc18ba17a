//! Ledger configuration
//!
//! Layered loading: built-in defaults, then an optional TOML file
//! (`ledger.toml`, or the path in `LEDGER_CONFIG`), then `LEDGER__*`
//! environment variables (e.g. `LEDGER__WRITER__LOCK_TIMEOUT_MS=500`).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;

use crate::error::LedgerError;
use crate::ledger::stream::StreamId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub writer: WriterConfig,
    pub verifier: VerifierConfig,
    pub streams: StreamsConfig,
}

/// Append path tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// How long an append waits for the per-stream lock before giving up.
    pub lock_timeout_ms: u64,
    /// Full read-compute-write cycles attempted before `WriterUnavailable`.
    pub max_attempts: u32,
    /// Linear backoff unit between attempts.
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Records fetched per storage round trip; also caps `read_range`.
    pub page_size: u64,
    pub schedule_enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamsConfig {
    /// Streams registered at startup in addition to the built-in domains.
    #[serde(default)]
    pub known: Vec<String>,
    /// Reject appends to streams that were never registered.
    pub strict: bool,
}

/// The subset of configuration the ledger itself consumes.
#[derive(Debug, Clone, Default)]
pub struct LedgerConfig {
    pub writer: WriterConfig,
    pub verifier: VerifierConfig,
    pub streams: StreamsConfig,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            max_attempts: 5,
            retry_backoff_ms: 20,
        }
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            schedule_enabled: true,
            interval_secs: 3_600,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ledger.db?mode=rwc".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            writer: WriterConfig::default(),
            verifier: VerifierConfig::default(),
            streams: StreamsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `LEDGER_CONFIG` (default `ledger.toml`) and the environment.
    pub fn load() -> Result<Self, LedgerError> {
        let path = env::var("LEDGER_CONFIG").unwrap_or_else(|_| "ledger.toml".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, LedgerError> {
        let config = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("streams.known"),
            )
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        info!("Configuration loaded from defaults, {} and environment", path);
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.database_url.trim().is_empty() {
            return Err(LedgerError::ConfigError("database_url must not be empty".to_string()));
        }
        if self.writer.lock_timeout_ms == 0 {
            return Err(LedgerError::ConfigError(
                "writer.lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.writer.max_attempts == 0 {
            return Err(LedgerError::ConfigError(
                "writer.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.verifier.page_size == 0 {
            return Err(LedgerError::ConfigError(
                "verifier.page_size must be greater than zero".to_string(),
            ));
        }
        if self.verifier.schedule_enabled && self.verifier.interval_secs == 0 {
            return Err(LedgerError::ConfigError(
                "verifier.interval_secs must be greater than zero when the schedule is enabled"
                    .to_string(),
            ));
        }
        for name in &self.streams.known {
            StreamId::new(name.as_str())
                .map_err(|e| LedgerError::ConfigError(format!("streams.known: {}", e)))?;
        }
        Ok(())
    }

    pub fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            writer: self.writer.clone(),
            verifier: self.verifier.clone(),
            streams: self.streams.clone(),
        }
    }
}
