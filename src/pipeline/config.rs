//! Pipeline configuration from environment variables

use super::buckets::TimeRange;
use super::trend::ErrorPolicy;
use std::env;
use std::time::Duration;

/// Configuration for the aggregation pipeline
///
/// Loaded from environment variables with sensible defaults. Unparseable
/// values are logged and replaced by the default.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Window buffer capacity (raw records kept for the detail view)
    pub window_capacity: usize,

    /// Number of recent records requested from the history endpoint
    pub history_limit: usize,

    /// Range the chart starts with
    pub default_range: TimeRange,

    /// Which status classes count toward the errors trend
    pub error_policy: ErrorPolicy,

    /// Per-request timeout for historical fetches
    pub fetch_timeout_secs: u64,

    /// Channel buffer between connection task and ingestion loop
    pub channel_buffer: usize,

    /// Snapshot/throughput log interval in milliseconds
    pub snapshot_log_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_capacity: 256,
            history_limit: 1024,
            default_range: TimeRange::Days90,
            error_policy: ErrorPolicy::ServerErrorsOnly,
            fetch_timeout_secs: 10,
            channel_buffer: 1024,
            snapshot_log_interval_ms: 10_000,
        }
    }
}

fn parse_positive(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(v) if v > 0 => v,
            _ => {
                log::warn!("Invalid {} '{}', defaulting to {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `LOGPULSE_WINDOW_CAPACITY` (default: 256)
    /// - `LOGPULSE_HISTORY_LIMIT` (default: 1024)
    /// - `LOGPULSE_DEFAULT_RANGE` (default: 90d)
    /// - `LOGPULSE_ERROR_POLICY` (default: 5xx)
    /// - `LOGPULSE_FETCH_TIMEOUT_SECS` (default: 10)
    /// - `LOGPULSE_CHANNEL_BUFFER` (default: 1024)
    /// - `LOGPULSE_SNAPSHOT_LOG_INTERVAL_MS` (default: 10000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let default_range = match env::var("LOGPULSE_DEFAULT_RANGE") {
            Ok(raw) => TimeRange::from_str(raw.trim()).unwrap_or_else(|| {
                log::warn!("Invalid LOGPULSE_DEFAULT_RANGE '{}', defaulting to 90d", raw);
                defaults.default_range
            }),
            Err(_) => defaults.default_range,
        };

        let error_policy = match env::var("LOGPULSE_ERROR_POLICY") {
            Ok(raw) => ErrorPolicy::from_str(&raw).unwrap_or_else(|| {
                log::warn!("Invalid LOGPULSE_ERROR_POLICY '{}', defaulting to 5xx", raw);
                defaults.error_policy
            }),
            Err(_) => defaults.error_policy,
        };

        Self {
            window_capacity: parse_positive("LOGPULSE_WINDOW_CAPACITY", defaults.window_capacity as u64)
                as usize,
            history_limit: parse_positive("LOGPULSE_HISTORY_LIMIT", defaults.history_limit as u64)
                as usize,
            default_range,
            error_policy,
            fetch_timeout_secs: parse_positive(
                "LOGPULSE_FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout_secs,
            ),
            channel_buffer: parse_positive("LOGPULSE_CHANNEL_BUFFER", defaults.channel_buffer as u64)
                as usize,
            snapshot_log_interval_ms: parse_positive(
                "LOGPULSE_SNAPSHOT_LOG_INTERVAL_MS",
                defaults.snapshot_log_interval_ms,
            ),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
