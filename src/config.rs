//! Application-level configuration loading, shared by the relay and the client library.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::client::{SyncOptions, WritePolicy};

/// Default location on disk where the configuration is looked up.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZPOINT_SYNC_CONFIG_PATH";

const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2_000;
const DEFAULT_STALENESS_WINDOW_MS: u64 = 10_000;
const DEFAULT_SSE_KEEP_ALIVE_SECS: u64 = 15;
const DEFAULT_SESSION_CHANNEL_CAPACITY: usize = 16;
const DEFAULT_MAX_REBASE_ATTEMPTS: u32 = 3;

/// Immutable runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// How often a Monitor stamps its heartbeat.
    pub heartbeat_interval: Duration,
    /// Age after which a heartbeat no longer counts as presence.
    pub staleness_window: Duration,
    /// Conflict handling used by clients when publishing.
    pub write_policy: WritePolicy,
    /// Retries of a conflicting versioned publish before giving up.
    pub max_rebase_attempts: u32,
    /// Keep-alive interval of the relay SSE streams.
    pub sse_keep_alive: Duration,
    /// Buffer between a session snapshot feed and a slow subscriber.
    pub session_channel_capacity: usize,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), policy = ?config.write_policy, "loaded config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "config file not found; using built-in defaults");
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON configuration document; absent keys take their defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Client synchronization options derived from this configuration.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            write_policy: self.write_policy,
            heartbeat_interval: self.heartbeat_interval,
            staleness_window: self.staleness_window,
            max_rebase_attempts: self.max_rebase_attempts,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

/// JSON representation of the configuration file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawConfig {
    heartbeat_interval_ms: u64,
    staleness_window_ms: u64,
    write_policy: WritePolicy,
    max_rebase_attempts: u32,
    sse_keep_alive_secs: u64,
    session_channel_capacity: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            staleness_window_ms: DEFAULT_STALENESS_WINDOW_MS,
            write_policy: WritePolicy::default(),
            max_rebase_attempts: DEFAULT_MAX_REBASE_ATTEMPTS,
            sse_keep_alive_secs: DEFAULT_SSE_KEEP_ALIVE_SECS,
            session_channel_capacity: DEFAULT_SESSION_CHANNEL_CAPACITY,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(value.heartbeat_interval_ms.max(1)),
            staleness_window: Duration::from_millis(value.staleness_window_ms),
            write_policy: value.write_policy,
            max_rebase_attempts: value.max_rebase_attempts,
            sse_keep_alive: Duration::from_secs(value.sse_keep_alive_secs.max(1)),
            session_channel_capacity: value.session_channel_capacity.max(1),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_presence_protocol() {
        let config = AppConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.staleness_window, Duration::from_secs(10));
        assert_eq!(config.write_policy, WritePolicy::Replace);
    }

    #[test]
    fn partial_json_overrides_only_given_keys() {
        let config =
            AppConfig::from_json(r#"{ "writePolicy": "versioned", "staleness_window_ms": 1 }"#);
        // Unknown keys are ignored, so the snake_case key above has no effect.
        let config = config.unwrap();
        assert_eq!(config.write_policy, WritePolicy::Versioned);
        assert_eq!(config.staleness_window, Duration::from_secs(10));
        assert_eq!(config.sync_options().max_rebase_attempts, 3);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(AppConfig::from_json(r#"{ "writePolicy": "merge" }"#).is_err());
    }
}
