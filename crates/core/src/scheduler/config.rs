//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Which success model drives slot selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Logistic regression over cyclic time features and recent success rate.
    #[default]
    Logistic,
    /// Smoothed per-hour and per-weekday success frequencies.
    Frequency,
}

/// Configuration for the adaptive run scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub model: ModelKind,

    /// Interval used without history or when the model cannot answer.
    #[serde(default = "default_interval")]
    pub default_interval_hours: u32,

    /// How far ahead candidate slots are considered.
    #[serde(default = "default_horizon")]
    pub horizon_hours: u32,

    /// No slot starts sooner than this after now.
    #[serde(default = "default_min_spacing")]
    pub min_spacing_hours: u32,

    /// Inclusive `[start, end]` local hours a run may start in.
    #[serde(default = "default_active_hours")]
    pub active_hours: [u32; 2],

    /// Upper bound of the random offset added inside the chosen slot.
    #[serde(default = "default_slot_jitter")]
    pub slot_jitter_minutes: u32,

    /// Number of previous runs behind the "recent success rate" feature.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    /// Offset of local time from UTC; the host's offset when unset.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

fn default_interval() -> u32 {
    24
}

fn default_horizon() -> u32 {
    24
}

fn default_min_spacing() -> u32 {
    4
}

fn default_active_hours() -> [u32; 2] {
    [9, 21]
}

fn default_slot_jitter() -> u32 {
    15
}

fn default_recent_window() -> usize {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::default(),
            default_interval_hours: default_interval(),
            horizon_hours: default_horizon(),
            min_spacing_hours: default_min_spacing(),
            active_hours: default_active_hours(),
            slot_jitter_minutes: default_slot_jitter(),
            recent_window: default_recent_window(),
            utc_offset_minutes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.model, ModelKind::Logistic);
        assert_eq!(config.default_interval_hours, 24);
        assert_eq!(config.active_hours, [9, 21]);
        assert!(config.utc_offset_minutes.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            model = "frequency"
            active_hours = [8, 22]
        "#;
        let config: SchedulerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.model, ModelKind::Frequency);
        assert_eq!(config.active_hours, [8, 22]);
        assert_eq!(config.horizon_hours, 24);
    }
}
