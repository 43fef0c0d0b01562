//! Process-level configuration keys for the ranged loop (spec.md §6).

use serde::Deserialize;
use std::time::Duration;

/// Mirrors the teacher's `Config`/`LOW_LATENCY_CONFIG` shape, generalized
/// from `Copy` primitives to a `serde`-deserializable struct so it can be
/// loaded from a TOML file by the demo binary.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Number of range workers spawned per cycle.
    pub parallelism: u32,
    /// Maximum segments per `Process` batch.
    pub batch_size: usize,
    /// Minimum wall-clock time between the start of consecutive cycles.
    #[serde(with = "duration_secs")]
    pub coalesce_duration: Duration,
    /// Delay before the first cycle after `Service::run` is called.
    #[serde(with = "duration_secs")]
    pub initial_delay: Duration,
    /// Negative offset into the past used by the source for its read
    /// snapshot, e.g. "10s ago". Stored as a positive magnitude.
    #[serde(with = "duration_secs")]
    pub as_of_system_interval: Duration,
    /// Ratio below which a cycle is marked anomalous. `0.0` disables the
    /// check entirely (spec.md §8 boundary behaviour).
    pub suspicious_processed_ratio: f64,
}

impl ServiceConfig {
    #[must_use]
    pub const fn anomaly_disabled(&self) -> bool {
        self.suspicious_processed_ratio <= 0.0
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            parallelism: 8,
            batch_size: 1000,
            coalesce_duration: Duration::from_secs(5 * 60),
            initial_delay: Duration::from_secs(0),
            as_of_system_interval: Duration::from_secs(10),
            suspicious_processed_ratio: 0.95,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_anomaly_detection_enabled() {
        let config = ServiceConfig::default();
        assert!(!config.anomaly_disabled());
    }

    #[test]
    fn zero_ratio_disables_anomaly_detection() {
        let config = ServiceConfig {
            suspicious_processed_ratio: 0.0,
            ..ServiceConfig::default()
        };
        assert!(config.anomaly_disabled());
    }

    #[test]
    fn deserializes_from_toml() {
        let toml_str = r#"
            parallelism = 16
            batch_size = 500
            coalesce_duration = 30.0
            initial_delay = 0.0
            as_of_system_interval = 5.0
            suspicious_processed_ratio = 0.9
        "#;
        let config: ServiceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.parallelism, 16);
        assert_eq!(config.coalesce_duration, Duration::from_secs(30));
    }
}
