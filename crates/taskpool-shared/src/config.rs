//! Pool configuration: the nine options from the original `PoolConfig`
//! schema, with the same defaults, plus layered loading via the `config`
//! crate (TOML file overlaid by `TASKPOOL_`-prefixed environment
//! variables), matching how `tasker-shared` layers its own TOML config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_size() -> usize {
    4
}

fn default_heartbeat_init_window_secs() -> u64 {
    1800
}

fn default_worker_inactivity_threshold_secs() -> u64 {
    300
}

fn default_heartbeats_miss_limit() -> u32 {
    3
}

fn default_task_retries_limit() -> u32 {
    3
}

fn default_max_active_loop_sleep_ms() -> u64 {
    5_000
}

fn default_active_loop_sleep_ms() -> u64 {
    10
}

fn default_recv_poll_interval_ms() -> u64 {
    50
}

/// Pool configuration. Mirrors `testplan.runners.pools.base.PoolConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,

    #[serde(default = "default_size")]
    pub size: usize,

    /// Seconds between heartbeats a worker must send; `None` disables the
    /// health monitor entirely (no fault tolerance for workers).
    #[serde(default)]
    pub worker_heartbeat_secs: Option<f64>,

    #[serde(default = "default_heartbeat_init_window_secs")]
    pub heartbeat_init_window_secs: u64,

    #[serde(default = "default_worker_inactivity_threshold_secs")]
    pub worker_inactivity_threshold_secs: u64,

    #[serde(default = "default_heartbeats_miss_limit")]
    pub heartbeats_miss_limit: u32,

    #[serde(default = "default_task_retries_limit")]
    pub task_retries_limit: u32,

    #[serde(default = "default_max_active_loop_sleep_ms")]
    pub max_active_loop_sleep_ms: u64,

    /// Not present in the original schema as a top-level option (there it's
    /// a fixed sleep inside `Worker._loop`/`Pool._loop`); exposed here so
    /// tests can run the dispatcher and worker loops fast without starving
    /// other threads.
    #[serde(default = "default_active_loop_sleep_ms")]
    pub active_loop_sleep_ms: u64,

    /// In-process transport recv polling interval (the original's
    /// `Transport(recv_sleep=0.05)`).
    #[serde(default = "default_recv_poll_interval_ms")]
    pub recv_poll_interval_ms: u64,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: default_size(),
            worker_heartbeat_secs: None,
            heartbeat_init_window_secs: default_heartbeat_init_window_secs(),
            worker_inactivity_threshold_secs: default_worker_inactivity_threshold_secs(),
            heartbeats_miss_limit: default_heartbeats_miss_limit(),
            task_retries_limit: default_task_retries_limit(),
            max_active_loop_sleep_ms: default_max_active_loop_sleep_ms(),
            active_loop_sleep_ms: default_active_loop_sleep_ms(),
            recv_poll_interval_ms: default_recv_poll_interval_ms(),
        }
    }

    pub fn worker_heartbeat(&self) -> Option<Duration> {
        self.worker_heartbeat_secs.map(Duration::from_secs_f64)
    }

    pub fn heartbeat_init_window(&self) -> Duration {
        Duration::from_secs(self.heartbeat_init_window_secs)
    }

    pub fn worker_inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.worker_inactivity_threshold_secs)
    }

    pub fn active_loop_sleep(&self) -> Duration {
        Duration::from_millis(self.active_loop_sleep_ms)
    }

    /// Upper bound the dispatcher's adaptive idle backoff (§6.2,
    /// "max_active_loop_sleep") may grow to. `active_loop_sleep` is the
    /// floor it resets to the moment there's work again.
    pub fn max_active_loop_sleep(&self) -> Duration {
        Duration::from_millis(self.max_active_loop_sleep_ms)
    }

    pub fn recv_poll_interval(&self) -> Duration {
        Duration::from_millis(self.recv_poll_interval_ms)
    }

    /// Load configuration from an optional TOML file, overlaid by
    /// `TASKPOOL_*` environment variables (e.g. `TASKPOOL_SIZE=8`).
    pub fn load(name: &str, file: Option<&Path>) -> Result<Self, config::ConfigError> {
        tracing::debug!(pool = name, file = ?file, "loading pool configuration");
        let mut builder = config::Config::builder().set_default("name", name)?;
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("TASKPOOL"));
        builder.build()?.try_deserialize()
    }
}

/// Portable snapshot of one level of the pool's configuration chain, sent
/// in response to `ConfigRequest`. The original walks `cfg.parent` links
/// and denormalizes each level; this rewrite has no nested executor/suite
/// config hierarchy, so the chain is always exactly one level long.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub name: String,
    pub values: serde_json::Value,
}

impl PoolConfig {
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            name: self.name.clone(),
            values: serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_schema() {
        let cfg = PoolConfig::new("pool");
        assert_eq!(cfg.size, 4);
        assert!(cfg.worker_heartbeat().is_none());
        assert_eq!(cfg.heartbeat_init_window_secs, 1800);
        assert_eq!(cfg.worker_inactivity_threshold_secs, 300);
        assert_eq!(cfg.heartbeats_miss_limit, 3);
        assert_eq!(cfg.task_retries_limit, 3);
        assert_eq!(cfg.max_active_loop_sleep_ms, 5_000);
    }

    #[test]
    fn load_without_file_uses_env_and_defaults() {
        let cfg = PoolConfig::load("env-pool", None).unwrap();
        assert_eq!(cfg.name, "env-pool");
        assert_eq!(cfg.size, 4);
    }

    #[test]
    fn load_overlays_a_toml_file_over_the_defaults() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "size = 8\ntask_retries_limit = 5").unwrap();

        let cfg = PoolConfig::load("file-pool", Some(file.path())).unwrap();
        assert_eq!(cfg.name, "file-pool");
        assert_eq!(cfg.size, 8);
        assert_eq!(cfg.task_retries_limit, 5);
        assert_eq!(cfg.heartbeats_miss_limit, 3);
    }
}
