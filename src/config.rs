use crate::error::{ExpenseError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MOVING_AVERAGE_WINDOW: usize = 10;
pub const DEFAULT_HEATMAP_QUANTILE: f64 = 0.96;
pub const DEFAULT_HOUSING_LABEL: &str = "housing";

/// How days without any transaction affect a category streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StreakGapPolicy {
    #[schemars(description = "Only days present in the data are considered; absent days are skipped and never break a streak")]
    #[default]
    SkipAbsentDays,

    #[schemars(description = "A calendar day with no transactions ends the current streak")]
    BreakOnGaps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    #[schemars(description = "Trailing window (in data-bearing days) of the moving average")]
    pub moving_average_window: usize,

    #[schemars(description = "Quantile above which single amounts are clipped from the heatmap view (0 < q <= 1)")]
    pub heatmap_quantile: f64,

    pub streak_gap_policy: StreakGapPolicy,

    #[schemars(description = "Raw category dropped by the 'exclude recurring housing' toggle (compared case-insensitively)")]
    pub housing_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            moving_average_window: DEFAULT_MOVING_AVERAGE_WINDOW,
            heatmap_quantile: DEFAULT_HEATMAP_QUANTILE,
            streak_gap_policy: StreakGapPolicy::default(),
            housing_label: DEFAULT_HOUSING_LABEL.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.moving_average_window == 0 {
            return Err(ExpenseError::InvalidConfig(
                "moving_average_window must be at least 1".to_string(),
            ));
        }
        if !(self.heatmap_quantile > 0.0 && self.heatmap_quantile <= 1.0) {
            return Err(ExpenseError::InvalidConfig(format!(
                "heatmap_quantile {} must be in (0, 1]",
                self.heatmap_quantile
            )));
        }
        if self.housing_label.trim().is_empty() {
            return Err(ExpenseError::InvalidConfig(
                "housing_label must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
