//! Worker process configuration.

use std::time::Duration;

use parallax_core::autoscale::DEFAULT_PREEMPTIBLE_FRACTION;

/// Worker configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Initial CPU pool size (default: `2`).
    pub cpu_workers: usize,
    /// Initial GPU pool size (default: `1`).
    pub gpu_workers: usize,
    /// Lease duration in seconds; heartbeats renew at half this (default: `120`).
    pub lease_secs: u64,
    /// Idle queue poll interval in milliseconds (default: `500`).
    pub poll_interval_ms: u64,
    /// Target fraction of GPU slots on preemptible capacity (default: `0.7`).
    pub preemptible_fraction: f64,
    /// Autoscaler sample interval in seconds (default: `30`).
    pub autoscale_interval_secs: u64,
    /// Webhook URL for terminal job notifications, if any.
    pub webhook_url: Option<String>,
    /// Postgres connection string; in-memory stores are used when unset.
    pub database_url: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `CPU_WORKERS`             | `2`     |
    /// | `GPU_WORKERS`             | `1`     |
    /// | `LEASE_SECS`              | `120`   |
    /// | `POLL_INTERVAL_MS`        | `500`   |
    /// | `PREEMPTIBLE_FRACTION`    | `0.7`   |
    /// | `AUTOSCALE_INTERVAL_SECS` | `30`    |
    /// | `WEBHOOK_URL`             | unset   |
    /// | `DATABASE_URL`            | unset   |
    pub fn from_env() -> Self {
        Self {
            cpu_workers: env_parse("CPU_WORKERS", 2),
            gpu_workers: env_parse("GPU_WORKERS", 1),
            lease_secs: env_parse("LEASE_SECS", 120),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", 500),
            preemptible_fraction: env_parse("PREEMPTIBLE_FRACTION", DEFAULT_PREEMPTIBLE_FRACTION),
            autoscale_interval_secs: env_parse("AUTOSCALE_INTERVAL_SECS", 30),
            webhook_url: std::env::var("WEBHOOK_URL").ok(),
            database_url: std::env::var("DATABASE_URL").ok(),
        }
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn autoscale_interval(&self) -> Duration {
        Duration::from_secs(self.autoscale_interval_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        // Not setting any vars in the test process; defaults must hold.
        let config = WorkerConfig::from_env();
        assert_eq!(config.cpu_workers, 2);
        assert_eq!(config.gpu_workers, 1);
        assert_eq!(config.lease_duration(), Duration::from_secs(120));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
    }
}
