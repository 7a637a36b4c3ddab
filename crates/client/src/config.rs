use std::time::Duration;

use medflow_realtime::channel::HeartbeatConfig;
use medflow_realtime::session::SessionConfig;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL, e.g. `https://emr.local/api`.
    pub api_url: String,
    /// Push channel URL, e.g. `wss://emr.local/ws/notifications`.
    pub ws_url: String,
    /// Bearer token. Without it the push channel stays disconnected.
    pub token: Option<String>,
    /// Seconds between heartbeat pings, at least 1 (default: `25`).
    pub heartbeat_interval_secs: u64,
    /// Seconds of silence before the connection counts as dropped (default: `60`).
    pub heartbeat_timeout_secs: u64,
    /// Client-side job timeout in seconds, `0` disables it (default: `300`).
    pub job_timeout_secs: u64,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} must be a non-negative integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("HEARTBEAT_TIMEOUT_SECS ({timeout}) must be greater than HEARTBEAT_INTERVAL_SECS ({interval})")]
    HeartbeatWindow { interval: u64, timeout: u64 },
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `MEDFLOW_API_URL`         | required |
    /// | `MEDFLOW_WS_URL`          | required |
    /// | `MEDFLOW_TOKEN`           | none    |
    /// | `HEARTBEAT_INTERVAL_SECS` | `25`    |
    /// | `HEARTBEAT_TIMEOUT_SECS`  | `60`    |
    /// | `JOB_TIMEOUT_SECS`        | `300`   |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let number = |name: &'static str, default: u64| match lookup(name) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        };

        let api_url = required("MEDFLOW_API_URL")?;
        let ws_url = required("MEDFLOW_WS_URL")?;
        let token = lookup("MEDFLOW_TOKEN")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let positive = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            match number(name, default)? {
                0 => Err(ConfigError::Zero(name)),
                value => Ok(value),
            }
        };

        let heartbeat_interval_secs = positive("HEARTBEAT_INTERVAL_SECS", 25)?;
        let heartbeat_timeout_secs = positive("HEARTBEAT_TIMEOUT_SECS", 60)?;
        if heartbeat_timeout_secs <= heartbeat_interval_secs {
            return Err(ConfigError::HeartbeatWindow {
                interval: heartbeat_interval_secs,
                timeout: heartbeat_timeout_secs,
            });
        }

        Ok(Self {
            api_url,
            ws_url,
            token,
            heartbeat_interval_secs,
            heartbeat_timeout_secs,
            job_timeout_secs: number("JOB_TIMEOUT_SECS", 300)?,
            request_timeout_secs: number("REQUEST_TIMEOUT_SECS", 30)?,
        })
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(self.heartbeat_interval_secs),
                timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            },
            job_timeout: self.job_timeout(),
            ..Default::default()
        }
    }
}
