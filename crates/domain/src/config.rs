//! Environment-driven configuration structures shared by all binaries.

use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MIN_HEADROOM_MB: f64 = 100.0;
const DEFAULT_CANDIDATE_LIMIT: u64 = 100;
const DEFAULT_RAIL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_STALE_AFTER_SECS: u64 = 300;
const DEFAULT_BATCH_SIZE: u64 = 50;

/// API-specific configuration (HTTP bind, shared database, relay knobs) so the
/// HTTP surface does not depend on monitor-only environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    database_url: String,
    api_bind_address: String,
    api_unix_socket: Option<String>,
    internal_bind_address: Option<String>,
    internal_unix_socket: Option<String>,
    relay: RelayConfig,
    payout_rail: Option<PayoutRailConfig>,
}

impl ApiConfig {
    /// Loads only the environment variables required by the API binary.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            api_bind_address: get_required_var("API_BIND_ADDRESS")?,
            api_unix_socket: get_optional_var("API_UNIX_SOCKET"),
            internal_bind_address: get_optional_var("API_INTERNAL_BIND_ADDRESS"),
            internal_unix_socket: get_optional_var("API_INTERNAL_UNIX_SOCKET"),
            relay: RelayConfig::from_env()?,
            payout_rail: PayoutRailConfig::from_env_optional()?,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn api_unix_socket(&self) -> Option<&str> {
        self.api_unix_socket.as_deref()
    }

    pub fn internal_bind_address(&self) -> Option<&str> {
        self.internal_bind_address.as_deref()
    }

    pub fn internal_unix_socket(&self) -> Option<&str> {
        self.internal_unix_socket.as_deref()
    }

    pub fn has_internal_listener(&self) -> bool {
        self.internal_bind_address.is_some() || self.internal_unix_socket.is_some()
    }

    pub fn relay(&self) -> &RelayConfig {
        &self.relay
    }

    /// `None` when no synchronous payout rail is configured; email payouts are
    /// then refused before any payout row is written.
    pub fn payout_rail(&self) -> Option<&PayoutRailConfig> {
        self.payout_rail.as_ref()
    }
}

/// Knobs for routing partner traffic through contributors.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    timeout: Duration,
    proxy_url: Option<String>,
    min_headroom_mb: f64,
    candidate_limit: u64,
}

impl RelayConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            timeout: Duration::from_secs(parse_or(
                "RELAY_TIMEOUT_SECS",
                DEFAULT_RELAY_TIMEOUT_SECS,
            )?),
            proxy_url: get_optional_var("RELAY_PROXY_URL"),
            min_headroom_mb: parse_or("RELAY_MIN_HEADROOM_MB", DEFAULT_MIN_HEADROOM_MB)?,
            candidate_limit: parse_or("RELAY_CANDIDATE_LIMIT", DEFAULT_CANDIDATE_LIMIT)?.max(1),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    /// Routes relayed traffic through an upstream proxy.
    pub fn with_proxy_url(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn min_headroom_mb(&self) -> f64 {
        self.min_headroom_mb
    }

    pub fn candidate_limit(&self) -> u64 {
        self.candidate_limit
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_RELAY_TIMEOUT_SECS),
            proxy_url: None,
            min_headroom_mb: DEFAULT_MIN_HEADROOM_MB,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }
}

/// Connection details for the synchronous payout-by-email rail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRailConfig {
    base_url: String,
    client_id: String,
    client_secret: String,
    timeout: Duration,
}

impl PayoutRailConfig {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout,
        }
    }

    fn from_env_required() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: get_required_var("PAYOUT_RAIL_URL")?,
            client_id: get_required_var("PAYOUT_RAIL_CLIENT_ID")?,
            client_secret: get_required_var("PAYOUT_RAIL_CLIENT_SECRET")?,
            timeout: Duration::from_secs(parse_or(
                "PAYOUT_RAIL_TIMEOUT_SECS",
                DEFAULT_RAIL_TIMEOUT_SECS,
            )?),
        })
    }

    fn from_env_optional() -> Result<Option<Self>, ConfigError> {
        if get_optional_var("PAYOUT_RAIL_URL").is_none() {
            return Ok(None);
        }
        Self::from_env_required().map(Some)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Configuration for the payout reconciliation worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    database_url: String,
    payout_rail: PayoutRailConfig,
    poll_interval: Duration,
    stale_after: Duration,
    batch_size: u64,
}

impl MonitorConfig {
    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// required process variables. Missing or malformed entries surface as
    /// `ConfigError` so binaries can respond gracefully.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            payout_rail: PayoutRailConfig::from_env_required()?,
            poll_interval: Duration::from_secs(
                parse_or("MONITOR_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?.max(1),
            ),
            stale_after: Duration::from_secs(parse_or(
                "MONITOR_STALE_AFTER_SECS",
                DEFAULT_STALE_AFTER_SECS,
            )?),
            batch_size: parse_or("MONITOR_BATCH_SIZE", DEFAULT_BATCH_SIZE)?.max(1),
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn payout_rail(&self) -> &PayoutRailConfig {
        &self.payout_rail
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::MissingVar { key })
            } else {
                Ok(trimmed.to_string())
            }
        }
        Err(_) => Err(ConfigError::MissingVar { key }),
    }
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_optional_var(key) {
        Some(raw) => raw.parse().map_err(|err: T::Err| ConfigError::InvalidNumber {
            key,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("BANDSHARE_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid number in `{key}`: {reason}")]
    InvalidNumber { key: &'static str, reason: String },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
