use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::models::Metric;

pub const HIGH_PRESSURE_THRESHOLD: f64 = 0.85;
pub const ROLLING_WINDOW_DAYS: u32 = 7;
pub const LAG_DAYS: u32 = 1;
pub const SCENARIO_MULTIPLIER: f64 = 1.2;

pub const DEFAULT_TREND_KEYWORDS: [&str; 5] = [
    "flu symptoms",
    "fever",
    "A&E wait times",
    "emergency room",
    "cold and flu",
];

/// Maps a raw "<sheet>_<column>" metric name onto a wide column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMapping {
    pub source: String,
    pub metric: Metric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub high_pressure_threshold: f64,
    pub rolling_window_days: u32,
    pub lag_days: u32,
    pub lag_metric: Metric,
    pub scenario_multiplier: f64,
    pub scenario_metric: Metric,
    pub trend_keywords: Vec<String>,
    pub recognized_metrics: Vec<MetricMapping>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            high_pressure_threshold: HIGH_PRESSURE_THRESHOLD,
            rolling_window_days: ROLLING_WINDOW_DAYS,
            lag_days: LAG_DAYS,
            lag_metric: Metric::GaOccupied,
            scenario_multiplier: SCENARIO_MULTIPLIER,
            scenario_metric: Metric::GaOccupied,
            trend_keywords: DEFAULT_TREND_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            recognized_metrics: default_recognized_metrics(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.rolling_window_days >= 1,
            "rolling_window_days must be at least 1"
        );
        anyhow::ensure!(self.lag_days >= 1, "lag_days must be at least 1");
        anyhow::ensure!(
            self.high_pressure_threshold.is_finite() && self.high_pressure_threshold > 0.0,
            "high_pressure_threshold must be a positive number"
        );
        anyhow::ensure!(
            self.scenario_multiplier.is_finite(),
            "scenario_multiplier must be finite"
        );
        anyhow::ensure!(
            !self.recognized_metrics.is_empty(),
            "recognized_metrics cannot be empty"
        );
        Ok(())
    }

    pub fn lag_column(&self) -> String {
        format!("{}_lag_{}", self.lag_metric.column(), self.lag_days)
    }

    pub fn rolling_column(&self) -> String {
        format!("occupancy_rate_{}d_avg", self.rolling_window_days)
    }

    pub fn scenario_column(&self) -> String {
        format!("scenario_{}_surge", self.scenario_metric.column())
    }
}

pub fn trend_column(keyword: &str) -> String {
    let slug: String = keyword
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let parts: Vec<&str> = slug.split('_').filter(|p| !p.is_empty()).collect();
    format!("trend_{}", parts.join("_"))
}

pub fn default_recognized_metrics() -> Vec<MetricMapping> {
    [
        ("Total G&A beds_Total G&A beds open", Metric::GaOpen),
        ("Total G&A beds_Total G&A beds occupied", Metric::GaOccupied),
        ("Adult G&A beds_Adult G&A beds open", Metric::AdultGaOpen),
        ("Adult G&A beds_Adult G&A beds occupied", Metric::AdultGaOccupied),
        ("Adult critical care_Adult critical care beds open", Metric::CcOpen),
        ("Adult critical care_Adult critical care beds occupied", Metric::CcOccupied),
        ("Flu_Flu G&A beds occupied", Metric::FluOccupied),
        ("RSV_RSV G&A beds occupied", Metric::RsvOccupied),
    ]
    .into_iter()
    .map(|(source, metric)| MetricMapping {
        source: source.to_string(),
        metric,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_columns_are_business_names() {
        let config = PipelineConfig::default();
        assert_eq!(config.lag_column(), "ga_occupied_lag_1");
        assert_eq!(config.rolling_column(), "occupancy_rate_7d_avg");
        assert_eq!(config.scenario_column(), "scenario_ga_occupied_surge");
    }

    #[test]
    fn lag_column_for_open_metric() {
        let config = PipelineConfig {
            lag_metric: Metric::CcOpen,
            lag_days: 7,
            ..PipelineConfig::default()
        };
        assert_eq!(config.lag_column(), "cc_open_lag_7");
    }

    #[test]
    fn trend_columns_are_slugged() {
        assert_eq!(trend_column("A&E wait times"), "trend_a_e_wait_times");
        assert_eq!(trend_column("flu symptoms"), "trend_flu_symptoms");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"high_pressure_threshold": 0.9, "lag_metric": "cc_occupied"}"#)
                .unwrap();
        assert_eq!(config.high_pressure_threshold, 0.9);
        assert_eq!(config.lag_metric, Metric::CcOccupied);
        assert_eq!(config.rolling_window_days, ROLLING_WINDOW_DAYS);
        assert_eq!(config.recognized_metrics.len(), 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_window_is_rejected() {
        let config = PipelineConfig {
            rolling_window_days: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
