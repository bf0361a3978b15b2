use crate::strategy::StrategyKind;
use caremesh_core::{CaremeshError, CaremeshResult};
use serde::Deserialize;
use std::time::Duration;

/// Tunables for one orchestrator instance.
///
/// Every field has a deployment-sensible default, so an empty TOML table
/// (or no file at all) yields a working configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Seconds without a heartbeat before an agent is swept offline.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// Seconds between health sweeps. Rule of thumb: a third of the
    /// heartbeat timeout.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Milliseconds between assignment attempts when no submission wakes
    /// the loop earlier.
    #[serde(default = "default_assign_interval_ms")]
    pub assign_interval_ms: u64,

    /// Concurrency limit for agents that do not declare their own.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,

    /// Automatic retries granted to a failing task before it fails
    /// terminally.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Events kept in the bus inspection ring, all topics combined.
    #[serde(default = "default_bus_history")]
    pub bus_history: usize,

    /// Per-subscriber buffered events before the oldest are dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Routing policy used until an operator swaps it.
    #[serde(default)]
    pub default_strategy: StrategyKind,

    /// Whether tasks may omit `required_capabilities` and match any
    /// available agent.
    #[serde(default = "default_true")]
    pub allow_unrestricted_tasks: bool,
}

fn default_heartbeat_timeout_secs() -> u64 {
    60
}
fn default_sweep_interval_secs() -> u64 {
    20
}
fn default_assign_interval_ms() -> u64 {
    100
}
fn default_max_concurrent_tasks() -> u32 {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_bus_history() -> usize {
    1000
}
fn default_subscriber_buffer() -> usize {
    64
}
fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            assign_interval_ms: default_assign_interval_ms(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_retries: default_max_retries(),
            bus_history: default_bus_history(),
            subscriber_buffer: default_subscriber_buffer(),
            default_strategy: StrategyKind::default(),
            allow_unrestricted_tasks: default_true(),
        }
    }
}

impl OrchestratorConfig {
    /// Parses a TOML document, filling omitted fields with defaults.
    pub fn from_toml_str(raw: &str) -> CaremeshResult<Self> {
        toml::from_str(raw).map_err(|e| CaremeshError::Config(e.to_string()))
    }

    /// Heartbeat timeout as a chrono duration for sweep comparisons.
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_secs as i64)
    }

    /// Health-sweep cadence.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Assignment-loop cadence.
    pub fn assign_interval(&self) -> Duration {
        Duration::from_millis(self.assign_interval_ms.max(1))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.heartbeat_timeout_secs, 60);
        assert_eq!(config.assign_interval_ms, 100);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.bus_history, 1000);
        assert_eq!(config.default_strategy, StrategyKind::LeastLoaded);
        assert!(config.allow_unrestricted_tasks);
    }

    #[test]
    fn test_empty_toml_is_defaults() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config.sweep_interval_secs, 20);
        assert_eq!(config.max_concurrent_tasks, 5);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            heartbeat_timeout_secs = 15
            default_strategy = "fastest"
            allow_unrestricted_tasks = false
            "#,
        )
        .unwrap();
        assert_eq!(config.heartbeat_timeout_secs, 15);
        assert_eq!(config.default_strategy, StrategyKind::Fastest);
        assert!(!config.allow_unrestricted_tasks);
        // Untouched fields keep their defaults.
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = OrchestratorConfig::from_toml_str("default_strategy = \"psychic\"").unwrap_err();
        assert!(matches!(err, CaremeshError::Config(_)));
    }

    #[test]
    fn test_duration_accessors() {
        let config = OrchestratorConfig {
            assign_interval_ms: 0,
            ..OrchestratorConfig::default()
        };
        // Zero intervals are clamped so tickers never spin.
        assert_eq!(config.assign_interval(), Duration::from_millis(1));
        assert_eq!(config.heartbeat_timeout(), chrono::Duration::seconds(60));
    }
}
