//! Process-wide logging and metrics setup, plus the failed-credential
//! tracker the authenticators feed.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use moka::sync::Cache;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::hydrate_env_file;

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_HANDLE: OnceCell<Arc<PrometheusHandle>> = OnceCell::new();

const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_AUTH_FAILURE_THRESHOLD: u16 = 5;
const DEFAULT_AUTH_FAILURE_WINDOW_SECS: u64 = 15 * 60;
const AUTH_FAILURE_CAPACITY: u64 = 100_000;

/// Logging and metrics options for one binary, read from
/// `<PREFIX>_`-namespaced environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    log_filter: String,
    metrics_address: Option<String>,
    failure_threshold: u16,
    failure_window: Duration,
}

impl TelemetryConfig {
    /// Reads `<PREFIX>_LOG_FILTER`, `<PREFIX>_METRICS_ADDRESS`,
    /// `<PREFIX>_AUTH_FAILURE_THRESHOLD` and `<PREFIX>_AUTH_FAILURE_WINDOW_SECS`. Unset,
    /// blank or unparsable values fall back to defaults.
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let prefix = prefix.trim().to_ascii_uppercase();
        let read = |suffix: &str| {
            env::var(format!("{prefix}_{suffix}"))
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        Self {
            log_filter: read("LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_owned()),
            metrics_address: read("METRICS_ADDRESS"),
            failure_threshold: read("AUTH_FAILURE_THRESHOLD")
                .and_then(|value| value.parse::<u16>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_AUTH_FAILURE_THRESHOLD),
            failure_window: Duration::from_secs(
                read("AUTH_FAILURE_WINDOW_SECS")
                    .and_then(|value| value.parse::<u64>().ok())
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_AUTH_FAILURE_WINDOW_SECS),
            ),
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Standalone Prometheus listener; when unset, metrics are only served
    /// through the API's `/metrics` route.
    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }

    pub fn failure_threshold(&self) -> u16 {
        self.failure_threshold
    }

    pub fn failure_window(&self) -> Duration {
        self.failure_window
    }
}

/// Handle kept by a binary once telemetry is installed.
#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: Arc<PrometheusHandle>,
    auth_failures: AuthFailureTracker,
}

impl TelemetryGuard {
    /// Prometheus text exposition of every recorded metric.
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }

    /// Tracker shared by every authenticator built from this guard.
    pub fn failure_tracker(&self) -> AuthFailureTracker {
        self.auth_failures.clone()
    }
}

/// Installs the tracing subscriber and the Prometheus recorder. Both are
/// process-global; later calls reuse what the first call installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics = install_metrics(config)?;

    Ok(TelemetryGuard {
        metrics,
        auth_failures: AuthFailureTracker::new(config.failure_threshold(), config.failure_window()),
    })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

fn install_metrics(config: &TelemetryConfig) -> Result<Arc<PrometheusHandle>, TelemetryError> {
    METRICS_HANDLE
        .get_or_try_init(|| {
            let mut builder = PrometheusBuilder::new();
            if let Some(addr) = config.metrics_address() {
                let socket = addr.parse::<SocketAddr>().map_err(|err| {
                    TelemetryError::InvalidMetricsAddress(addr.to_owned(), err.to_string())
                })?;
                builder = builder.with_http_listener(socket);
            }

            builder
                .install_recorder()
                .map(Arc::new)
                .map_err(|err| TelemetryError::Metrics(err.to_string()))
        })
        .cloned()
}

/// Counts failed credential checks per API key or token hash inside a
/// sliding window, so repeated guessing against one identity is logged.
#[derive(Clone)]
pub struct AuthFailureTracker {
    threshold: u16,
    failures: Cache<String, u16>,
}

impl AuthFailureTracker {
    pub fn new(threshold: u16, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: Cache::builder()
                .max_capacity(AUTH_FAILURE_CAPACITY)
                .time_to_live(window)
                .build(),
        }
    }

    /// Records one failure for `identity`.
    pub fn record_failure(&self, identity: impl AsRef<str>) -> FailureVerdict {
        let identity = identity.as_ref().to_owned();
        let failures = self
            .failures
            .entry(identity.clone())
            .and_upsert_with(|existing| {
                existing
                    .map(|entry| entry.into_value())
                    .unwrap_or(0)
                    .saturating_add(1)
            })
            .into_value();
        counter!("credential_failures_total", "state" => "recorded").increment(1);

        if failures < self.threshold {
            return FailureVerdict::Below;
        }
        counter!("credential_failures_total", "state" => "tripped").increment(1);
        warn!(identity = %identity, failures, "repeated credential failures");
        FailureVerdict::Tripped { failures }
    }

    /// Forgets `identity` after a successful check.
    pub fn clear(&self, identity: impl AsRef<str>) {
        self.failures.invalidate(identity.as_ref());
    }
}

impl Default for AuthFailureTracker {
    fn default() -> Self {
        Self::new(
            DEFAULT_AUTH_FAILURE_THRESHOLD,
            Duration::from_secs(DEFAULT_AUTH_FAILURE_WINDOW_SECS),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    Below,
    Tripped { failures: u16 },
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 4] = [
        "LEDGERTEST_LOG_FILTER",
        "LEDGERTEST_METRICS_ADDRESS",
        "LEDGERTEST_AUTH_FAILURE_THRESHOLD",
        "LEDGERTEST_AUTH_FAILURE_WINDOW_SECS",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear_env();

        let cfg = TelemetryConfig::from_env("ledgertest");
        assert_eq!(cfg.log_filter(), "info");
        assert_eq!(cfg.metrics_address(), None);
        assert_eq!(cfg.failure_threshold(), 5);
        assert_eq!(cfg.failure_window(), Duration::from_secs(900));
    }

    #[test]
    fn prefixed_variables_are_honored() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear_env();
        env::set_var("LEDGERTEST_LOG_FILTER", "bandshare_domain=debug");
        env::set_var("LEDGERTEST_METRICS_ADDRESS", "127.0.0.1:9898");
        env::set_var("LEDGERTEST_AUTH_FAILURE_THRESHOLD", "9");
        env::set_var("LEDGERTEST_AUTH_FAILURE_WINDOW_SECS", "60");

        let cfg = TelemetryConfig::from_env("LEDGERTEST");
        assert_eq!(cfg.log_filter(), "bandshare_domain=debug");
        assert_eq!(cfg.metrics_address(), Some("127.0.0.1:9898"));
        assert_eq!(cfg.failure_threshold(), 9);
        assert_eq!(cfg.failure_window(), Duration::from_secs(60));
        clear_env();
    }

    #[test]
    fn blank_or_zero_values_are_ignored() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear_env();
        env::set_var("LEDGERTEST_METRICS_ADDRESS", "  ");
        env::set_var("LEDGERTEST_AUTH_FAILURE_THRESHOLD", "0");
        env::set_var("LEDGERTEST_AUTH_FAILURE_WINDOW_SECS", "soon");

        let cfg = TelemetryConfig::from_env("LEDGERTEST");
        assert_eq!(cfg.metrics_address(), None);
        assert_eq!(cfg.failure_threshold(), 5);
        assert_eq!(cfg.failure_window(), Duration::from_secs(900));
        clear_env();
    }

    #[test]
    fn failures_expire_with_the_window() {
        let tracker = AuthFailureTracker::new(2, Duration::from_millis(50));
        assert_eq!(tracker.record_failure("key"), FailureVerdict::Below);
        std::thread::sleep(Duration::from_millis(120));
        tracker.failures.run_pending_tasks();
        assert_eq!(tracker.record_failure("key"), FailureVerdict::Below);
    }

    #[test]
    fn repeated_failures_trip_per_identity() {
        let tracker = AuthFailureTracker::new(2, Duration::from_secs(60));
        assert_eq!(tracker.record_failure("api-key"), FailureVerdict::Below);
        assert_eq!(tracker.record_failure("other"), FailureVerdict::Below);
        assert_eq!(
            tracker.record_failure("api-key"),
            FailureVerdict::Tripped { failures: 2 }
        );
        tracker.clear("api-key");
        assert_eq!(tracker.record_failure("api-key"), FailureVerdict::Below);
    }
}
