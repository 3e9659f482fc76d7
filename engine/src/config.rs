//! Engine configuration.
//!
//! Every field has a default, so an empty environment yields a working
//! configuration. Values can also be deserialized from JSON (camelCase).
//!
//! | variable                     | field                      |
//! |------------------------------|----------------------------|
//! | `FERRY_WRITE_MODE`           | `write_mode` (`queued`, `immediate`) |
//! | `FERRY_MERGE_STRATEGY`       | `merge_strategy` (`preserveLocal`, `remoteWins`, `newestWins`) |
//! | `FERRY_REMOTE_URL`           | `remote_url`               |
//! | `FERRY_DATABASE_URL`         | `database_url`             |
//! | `FERRY_SYNC_INTERVAL_MS`     | `sync_interval_ms`         |
//! | `FERRY_MAX_BACKOFF_MS`       | `max_backoff_ms`           |
//! | `FERRY_PROBE_INTERVAL_MS`    | `probe_interval_ms`        |
//! | `FERRY_RETRY_MAX_ATTEMPTS`   | `retry.max_attempts`       |
//! | `FERRY_RETRY_BASE_DELAY_MS`  | `retry.base_delay_ms`      |
//! | `FERRY_RETRY_MAX_DELAY_MS`   | `retry.max_delay_ms`       |
//! | `FERRY_QUOTA_BYTES`          | `quota.quota_bytes`        |
//! | `FERRY_QUOTA_THRESHOLD`      | `quota.threshold`          |
//! | `FERRY_EVICTION_BATCH`       | `quota.batch_size`         |
//! | `FERRY_RETENTION_MS`         | `quota.retention_ms`       |

use crate::error::ConfigError;
use crate::merge::MergeStrategy;
use crate::quota::QuotaConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// When local writes reach the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteMode {
    /// Every write goes through the outbox and waits for the next cycle
    #[default]
    Queued,
    /// Online writes are sent at once; failures fall back to the outbox
    Immediate,
}

impl FromStr for WriteMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "queued" => Ok(WriteMode::Queued),
            "immediate" => Ok(WriteMode::Immediate),
            _ => Err(()),
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "preservelocal" => Ok(MergeStrategy::PreserveLocal),
            "remotewins" => Ok(MergeStrategy::RemoteWins),
            "newestwins" => Ok(MergeStrategy::NewestWins),
            _ => Err(()),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub write_mode: WriteMode,
    /// Default merge strategy; collections may override it in the schema
    pub merge_strategy: MergeStrategy,
    /// Base URL of the remote, e.g. `http://localhost:3000`
    pub remote_url: Option<String>,
    /// sqlx SQLite URL of the local database
    pub database_url: String,
    /// Pause between scheduled cycles after a clean one
    pub sync_interval_ms: u64,
    /// Upper bound for the scheduler's pause after failed cycles
    pub max_backoff_ms: u64,
    /// Interval of the reachability probe; `None` leaves connectivity to the host
    pub probe_interval_ms: Option<u64>,
    pub retry: RetryPolicy,
    pub quota: QuotaConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::default(),
            merge_strategy: MergeStrategy::default(),
            remote_url: None,
            database_url: "sqlite://ferry.db".to_string(),
            sync_interval_ms: 30_000,
            max_backoff_ms: 300_000,
            probe_interval_ms: None,
            retry: RetryPolicy::default(),
            quota: QuotaConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `FERRY_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from any key/value source on top of the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = parsed(&lookup, "FERRY_WRITE_MODE")? {
            config.write_mode = mode;
        }
        if let Some(strategy) = parsed(&lookup, "FERRY_MERGE_STRATEGY")? {
            config.merge_strategy = strategy;
        }
        if let Some(url) = lookup("FERRY_REMOTE_URL").filter(|v| !v.trim().is_empty()) {
            config.remote_url = Some(url);
        }
        if let Some(url) = lookup("FERRY_DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            config.database_url = url;
        }
        if let Some(ms) = parsed(&lookup, "FERRY_SYNC_INTERVAL_MS")? {
            config.sync_interval_ms = ms;
        }
        if let Some(ms) = parsed(&lookup, "FERRY_MAX_BACKOFF_MS")? {
            config.max_backoff_ms = ms;
        }
        if let Some(ms) = parsed(&lookup, "FERRY_PROBE_INTERVAL_MS")? {
            config.probe_interval_ms = Some(ms);
        }
        if let Some(attempts) = parsed(&lookup, "FERRY_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = parsed(&lookup, "FERRY_RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay_ms = ms;
        }
        if let Some(ms) = parsed(&lookup, "FERRY_RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay_ms = ms;
        }
        if let Some(bytes) = parsed(&lookup, "FERRY_QUOTA_BYTES")? {
            config.quota.quota_bytes = bytes;
        }
        if let Some(threshold) = parsed(&lookup, "FERRY_QUOTA_THRESHOLD")? {
            config.quota.threshold = threshold;
        }
        if let Some(batch) = parsed(&lookup, "FERRY_EVICTION_BATCH")? {
            config.quota.batch_size = batch;
        }
        if let Some(ms) = parsed(&lookup, "FERRY_RETENTION_MS")? {
            config.quota.retention_ms = Some(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.quota.threshold > 0.0 && self.quota.threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "FERRY_QUOTA_THRESHOLD",
                value: self.quota.threshold.to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FERRY_RETRY_MAX_ATTEMPTS",
                value: "0".into(),
            });
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.multiplier",
                value: self.retry.multiplier.to_string(),
            });
        }
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FERRY_SYNC_INTERVAL_MS",
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.sync_interval_ms))
    }
}

fn parsed<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.write_mode, WriteMode::Queued);
        assert_eq!(config.merge_strategy, MergeStrategy::PreserveLocal);
        assert_eq!(config.retry.max_attempts, 3);
        assert!((config.quota.threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn reads_ferry_variables() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("FERRY_WRITE_MODE", "Immediate"),
            ("FERRY_MERGE_STRATEGY", "newest_wins"),
            ("FERRY_REMOTE_URL", "http://sync.local:3000"),
            ("FERRY_RETRY_MAX_ATTEMPTS", "5"),
            ("FERRY_QUOTA_BYTES", "1048576"),
            ("FERRY_RETENTION_MS", "60000"),
        ]))
        .unwrap();

        assert_eq!(config.write_mode, WriteMode::Immediate);
        assert_eq!(config.merge_strategy, MergeStrategy::NewestWins);
        assert_eq!(config.remote_url.as_deref(), Some("http://sync.local:3000"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.quota.quota_bytes, 1_048_576);
        assert_eq!(config.quota.retention_ms, Some(60_000));
    }

    #[test]
    fn rejects_garbage() {
        let err = EngineConfig::from_lookup(lookup(&[("FERRY_SYNC_INTERVAL_MS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "FERRY_SYNC_INTERVAL_MS",
                value: "soon".into()
            }
        );

        assert!(EngineConfig::from_lookup(lookup(&[("FERRY_QUOTA_THRESHOLD", "1.5")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("FERRY_WRITE_MODE", "eventually")])).is_err());
    }

    #[test]
    fn deserializes_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"writeMode":"immediate","quota":{"quotaBytes":2048}}"#)
                .unwrap();
        assert_eq!(config.write_mode, WriteMode::Immediate);
        assert_eq!(config.quota.quota_bytes, 2048);
        assert_eq!(config.quota.batch_size, 50);
        assert_eq!(config.sync_interval_ms, 30_000);
    }
}
