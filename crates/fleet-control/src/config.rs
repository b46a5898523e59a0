//! Service configuration for the `fleet-control` binary.

use std::time::Duration;

use serde::Deserialize;

use crate::types::ControlConfig;

/// Configuration for the control plane service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Listen address (e.g., "0.0.0.0:8080").
    #[serde(default = "ServiceConfig::default_listen_addr")]
    pub listen_addr: String,

    /// `RocksDB` data directory.
    #[serde(default = "ServiceConfig::default_data_dir")]
    pub data_dir: String,

    /// Seconds between two sweeps for expired jobs.
    #[serde(default = "ServiceConfig::default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Seconds between two health check rounds.
    #[serde(default = "ServiceConfig::default_health_check_interval")]
    pub health_check_interval_seconds: u64,

    /// Minimum seconds between two "high" resource notifications for a server.
    #[serde(default = "ServiceConfig::default_alert_cooldown")]
    pub alert_cooldown_seconds: u64,

    /// Deadline for ordinary jobs in seconds.
    #[serde(default = "ServiceConfig::default_job_timeout")]
    pub job_timeout_seconds: u64,
}

impl ServiceConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_data_dir() -> String {
        "/data".to_string()
    }

    const fn default_sweep_interval() -> u64 {
        30
    }

    const fn default_health_check_interval() -> u64 {
        15
    }

    const fn default_alert_cooldown() -> u64 {
        300 // 5 minutes
    }

    const fn default_job_timeout() -> u64 {
        600 // 10 minutes
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for unset or unparsable values.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Some(val) = lookup("DATA_DIR") {
            config.data_dir = val;
        }

        let seconds = |key: &str, current: u64| -> u64 {
            match lookup(key).map(|val| val.trim().parse::<u64>()) {
                Some(Ok(n)) if n > 0 => n,
                Some(_) => {
                    tracing::warn!(key, "Ignoring invalid value, using default");
                    current
                }
                None => current,
            }
        };
        config.sweep_interval_seconds =
            seconds("SWEEP_INTERVAL_SECONDS", config.sweep_interval_seconds);
        config.health_check_interval_seconds = seconds(
            "HEALTH_CHECK_INTERVAL_SECONDS",
            config.health_check_interval_seconds,
        );
        config.alert_cooldown_seconds =
            seconds("ALERT_COOLDOWN_SECONDS", config.alert_cooldown_seconds);
        config.job_timeout_seconds = seconds("JOB_TIMEOUT_SECONDS", config.job_timeout_seconds);

        config
    }

    /// Get the sweep interval as a `Duration`.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Get the health check interval as a `Duration`.
    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    /// The library configuration this service runs with.
    #[must_use]
    pub fn control_config(&self) -> ControlConfig {
        let mut config = ControlConfig {
            alert_cooldown_seconds: self.alert_cooldown_seconds,
            ..ControlConfig::default()
        };
        config.job_timeouts.default_seconds = self.job_timeout_seconds;
        config
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            data_dir: Self::default_data_dir(),
            sweep_interval_seconds: Self::default_sweep_interval(),
            health_check_interval_seconds: Self::default_health_check_interval(),
            alert_cooldown_seconds: Self::default_alert_cooldown(),
            job_timeout_seconds: Self::default_job_timeout(),
        }
    }
}
