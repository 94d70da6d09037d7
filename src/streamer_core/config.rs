use super::backoff::ExponentialBackoff;
use std::env;
use thiserror::Error;

pub const DEFAULT_WS_PATH: &str = "/api/ws/";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub server_url: String,
    pub ws_path: String,
    pub authorization: Option<String>,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub rust_log: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = lookup("LOGPULSE_SERVER_URL")
            .ok_or_else(|| ConfigError::MissingVariable("LOGPULSE_SERVER_URL".to_string()))?;

        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "LOGPULSE_SERVER_URL must start with http:// or https://".to_string(),
            ));
        }

        let ws_path = lookup("LOGPULSE_WS_PATH").unwrap_or_else(|| DEFAULT_WS_PATH.to_string());

        let authorization = lookup("LOGPULSE_AUTHORIZATION").filter(|s| !s.trim().is_empty());

        let mut backoff_base_ms = lookup("LOGPULSE_BACKOFF_BASE_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(1_000);

        let backoff_max_ms = lookup("LOGPULSE_BACKOFF_MAX_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30_000);

        if backoff_max_ms < backoff_base_ms {
            log::warn!(
                "LOGPULSE_BACKOFF_MAX_MS ({}) below base ({}), clamping base",
                backoff_max_ms,
                backoff_base_ms
            );
            backoff_base_ms = backoff_max_ms.max(1);
        }

        let rust_log = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            server_url,
            ws_path,
            authorization,
            backoff_base_ms,
            backoff_max_ms: backoff_max_ms.max(backoff_base_ms),
            rust_log,
        })
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::from_millis(self.backoff_base_ms, self.backoff_max_ms)
    }
}
