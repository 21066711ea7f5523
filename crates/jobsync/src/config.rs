use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::reconnect::ReconnectConfig;

/// Client configuration.
///
/// [`SyncConfig::new`] fills every tunable with its default; in deployed
/// builds load it with [`SyncConfig::from_env`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base HTTP URL of the job service, e.g. `http://host:8000`.
    pub api_url: String,
    /// Base WebSocket URL, e.g. `ws://host:8000`.
    pub ws_url: String,
    /// User whose channel and job list this client follows.
    pub user_id: String,
    /// Interval between heartbeat pings while connected.
    pub heartbeat_interval: Duration,
    /// Force a reconnect if a ping stays unanswered this long. `None`
    /// tolerates a missing pong indefinitely.
    pub pong_timeout: Option<Duration>,
    /// Upper bound on opening the WebSocket.
    pub connect_timeout: Duration,
    /// Upper bound on each REST call.
    pub request_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Number of terminal jobs kept in the registry before the oldest are
    /// evicted.
    pub max_terminal_jobs: usize,
}

impl SyncConfig {
    /// Default heartbeat interval in seconds.
    pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_MAX_TERMINAL_JOBS: usize = 200;

    pub fn new(
        api_url: impl Into<String>,
        ws_url: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            api_url: trim_base(api_url.into()),
            ws_url: trim_base(ws_url.into()),
            user_id: user_id.into(),
            heartbeat_interval: Duration::from_secs(Self::DEFAULT_HEARTBEAT_SECS),
            pong_timeout: None,
            connect_timeout: Duration::from_secs(Self::DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(Self::DEFAULT_REQUEST_TIMEOUT_SECS),
            reconnect: ReconnectConfig::default(),
            max_terminal_jobs: Self::DEFAULT_MAX_TERMINAL_JOBS,
        }
    }

    /// Per-user channel endpoint.
    pub fn channel_url(&self) -> String {
        format!("{}/ws/jobs/{}", self.ws_url, self.user_id)
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                 |
    /// |--------------------------------|-------------------------|
    /// | `JOBSYNC_API_URL`              | `http://localhost:8000` |
    /// | `JOBSYNC_WS_URL`               | `ws://localhost:8000`   |
    /// | `JOBSYNC_USER_ID`              | required                |
    /// | `JOBSYNC_HEARTBEAT_SECS`       | `30`                    |
    /// | `JOBSYNC_RECONNECT_DELAY_SECS` | `5`                     |
    /// | `JOBSYNC_RECONNECT_MULTIPLIER` | `1.0`                   |
    /// | `JOBSYNC_RECONNECT_MAX_SECS`   | `60`                    |
    /// | `JOBSYNC_RECONNECT_JITTER`     | `0.0`                   |
    /// | `JOBSYNC_PONG_TIMEOUT_SECS`    | unset                   |
    /// | `JOBSYNC_CONNECT_TIMEOUT_SECS` | `10`                    |
    /// | `JOBSYNC_REQUEST_TIMEOUT_SECS` | `30`                    |
    /// | `JOBSYNC_MAX_TERMINAL_JOBS`    | `200`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("JOBSYNC_API_URL").unwrap_or_else(|| "http://localhost:8000".into());
        let ws_url = lookup("JOBSYNC_WS_URL").unwrap_or_else(|| "ws://localhost:8000".into());
        let user_id = lookup("JOBSYNC_USER_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("JOBSYNC_USER_ID"))?;

        let mut config = Self::new(api_url, ws_url, user_id);
        let defaults = ReconnectConfig::default();

        config.heartbeat_interval = Duration::from_secs(parse_or(
            &lookup,
            "JOBSYNC_HEARTBEAT_SECS",
            Self::DEFAULT_HEARTBEAT_SECS,
        )?);
        config.pong_timeout =
            parse_opt::<u64>(&lookup, "JOBSYNC_PONG_TIMEOUT_SECS")?.map(Duration::from_secs);
        config.connect_timeout = Duration::from_secs(parse_or(
            &lookup,
            "JOBSYNC_CONNECT_TIMEOUT_SECS",
            Self::DEFAULT_CONNECT_TIMEOUT_SECS,
        )?);
        config.request_timeout = Duration::from_secs(parse_or(
            &lookup,
            "JOBSYNC_REQUEST_TIMEOUT_SECS",
            Self::DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        config.max_terminal_jobs = parse_or(
            &lookup,
            "JOBSYNC_MAX_TERMINAL_JOBS",
            Self::DEFAULT_MAX_TERMINAL_JOBS,
        )?;
        config.reconnect = ReconnectConfig {
            initial_delay: Duration::from_secs(parse_or(
                &lookup,
                "JOBSYNC_RECONNECT_DELAY_SECS",
                defaults.initial_delay.as_secs(),
            )?),
            max_delay: Duration::from_secs(parse_or(
                &lookup,
                "JOBSYNC_RECONNECT_MAX_SECS",
                defaults.max_delay.as_secs(),
            )?),
            multiplier: parse_or(&lookup, "JOBSYNC_RECONNECT_MULTIPLIER", defaults.multiplier)?,
            jitter: parse_or(&lookup, "JOBSYNC_RECONNECT_JITTER", defaults.jitter)?,
        };

        if config.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "JOBSYNC_HEARTBEAT_SECS",
                value: "0".into(),
            });
        }
        if config.reconnect.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                var: "JOBSYNC_RECONNECT_MULTIPLIER",
                value: config.reconnect.multiplier.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&config.reconnect.jitter) {
            return Err(ConfigError::Invalid {
                var: "JOBSYNC_RECONNECT_JITTER",
                value: config.reconnect.jitter.to_string(),
            });
        }

        Ok(config)
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_opt<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(lookup, var)?.unwrap_or(default))
}
