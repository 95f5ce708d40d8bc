//! Pipeline configuration.

use serde::{Deserialize, Serialize};

/// Limits applied by the orchestrator to each run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Total adjustment attempts per order across all runs.
    /// Reaching it marks the order permanently failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Attempts per order within a single run.
    #[serde(default = "default_max_attempts_per_run")]
    pub max_attempts_per_run: u32,

    /// Orders processed per run; the rest wait for the next run.
    #[serde(default = "default_max_orders_per_run")]
    pub max_orders_per_run: usize,

    /// Login attempts before the run is aborted.
    #[serde(default = "default_login_attempts")]
    pub login_attempts: u32,

    /// Days after purchase during which an adjustment may be requested.
    #[serde(default = "default_window_days")]
    pub eligibility_window_days: u32,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_attempts_per_run() -> u32 {
    3
}

fn default_max_orders_per_run() -> usize {
    10
}

fn default_login_attempts() -> u32 {
    3
}

fn default_window_days() -> u32 {
    crate::order::ELIGIBILITY_WINDOW_DAYS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_attempts_per_run: default_max_attempts_per_run(),
            max_orders_per_run: default_max_orders_per_run(),
            login_attempts: default_login_attempts(),
            eligibility_window_days: default_window_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.max_attempts_per_run, 3);
        assert_eq!(config.max_orders_per_run, 10);
        assert_eq!(config.login_attempts, 3);
        assert_eq!(config.eligibility_window_days, 30);
    }

    #[test]
    fn test_config_serialization() {
        let config = PipelineConfig {
            max_orders_per_run: 2,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let parsed: PipelineConfig = serde_json::from_str(r#"{"max_attempts": 8}"#).unwrap();
        assert_eq!(parsed.max_attempts, 8);
        assert_eq!(parsed.max_attempts_per_run, 3);
    }
}
