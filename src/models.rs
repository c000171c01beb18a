use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Wide bed-pressure columns produced by pivoting raw SitRep metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    GaOpen,
    GaOccupied,
    AdultGaOpen,
    AdultGaOccupied,
    CcOpen,
    CcOccupied,
    FluOccupied,
    RsvOccupied,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::GaOpen,
        Metric::GaOccupied,
        Metric::AdultGaOpen,
        Metric::AdultGaOccupied,
        Metric::CcOpen,
        Metric::CcOccupied,
        Metric::FluOccupied,
        Metric::RsvOccupied,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Metric::GaOpen => "ga_open",
            Metric::GaOccupied => "ga_occupied",
            Metric::AdultGaOpen => "adult_ga_open",
            Metric::AdultGaOccupied => "adult_ga_occupied",
            Metric::CcOpen => "cc_open",
            Metric::CcOccupied => "cc_occupied",
            Metric::FluOccupied => "flu_occupied",
            Metric::RsvOccupied => "rsv_occupied",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// One long-format fact as delivered by the SitRep extraction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricRecord {
    #[serde(rename = "trust_code")]
    pub entity_id: String,
    #[serde(deserialize_with = "crate::io::deserialize_date")]
    pub date: NaiveDate,
    #[serde(rename = "metric")]
    pub metric_name: String,
    pub value: f64,
}

/// One row per (entity, date); absent metrics were not reported.
#[derive(Debug, Clone, PartialEq)]
pub struct WideDailyRecord {
    pub entity_id: String,
    pub date: NaiveDate,
    pub values: BTreeMap<Metric, f64>,
}

impl WideDailyRecord {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Entity {
    #[serde(rename = "trust_code")]
    pub id: String,
    #[serde(rename = "trust_name")]
    pub display_name: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WeatherObservation {
    #[serde(rename = "city")]
    pub site_id: String,
    #[serde(deserialize_with = "crate::io::deserialize_date")]
    pub date: NaiveDate,
    #[serde(rename = "temp_mean")]
    pub temperature_mean: Option<f64>,
    pub precipitation_sum: Option<f64>,
    #[serde(rename = "wind_speed_max")]
    pub wind_max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrendObservation {
    pub keyword: String,
    #[serde(rename = "date", deserialize_with = "crate::io::deserialize_date")]
    pub week_start_date: NaiveDate,
    pub search_volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedTrendRecord {
    pub keyword: String,
    pub date: NaiveDate,
    pub search_volume: Option<f64>,
}

/// A what-if projection. Kept apart from `f64` so it cannot be mixed into
/// measured aggregates by accident.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scenario(pub f64);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeatherContext {
    pub site_id: String,
    pub proxy_used: bool,
    pub temperature_mean: Option<f64>,
    pub precipitation_sum: Option<f64>,
    pub wind_max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedFeatureRecord {
    pub entity_id: String,
    pub display_name: String,
    pub region: String,
    pub date: NaiveDate,
    pub metrics: BTreeMap<Metric, f64>,
    pub occupancy_rate: Option<f64>,
    pub cc_occupancy_rate: Option<f64>,
    pub flu_share_of_occupied: Option<f64>,
    pub is_high_pressure: bool,
    pub rolling_occupancy_rate: Option<f64>,
    pub rolling_observations: usize,
    pub lag_value: Option<f64>,
    pub weather: WeatherContext,
    pub trends: BTreeMap<String, Option<f64>>,
    pub scenario: Option<Scenario>,
}

impl EnrichedFeatureRecord {
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.metrics.get(&metric).copied()
    }
}

/// Additive and averaged pressure figures shared by region and system rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PressureAggregate {
    pub trusts_reporting: usize,
    pub bed_reporting: usize,
    pub ga_open_total: f64,
    pub ga_occupied_total: f64,
    /// `None` when no trust reported both G&A figures.
    pub occupancy_rate: Option<f64>,
    pub cc_reporting: usize,
    pub cc_open_total: f64,
    pub cc_occupied_total: f64,
    pub cc_occupancy_rate: Option<f64>,
    pub flu_occupied_total: Option<f64>,
    pub rsv_occupied_total: Option<f64>,
    pub high_pressure_count: usize,
    pub high_pressure_share: Option<f64>,
    pub peak_trust_occupancy_rate: Option<f64>,
    pub temperature_mean: Option<f64>,
    pub precipitation_sum: Option<f64>,
    pub wind_max: Option<f64>,
    pub trends: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionalSummary {
    pub region: String,
    pub date: NaiveDate,
    pub aggregate: PressureAggregate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemSummary {
    pub date: NaiveDate,
    pub regions_reporting: usize,
    pub aggregate: PressureAggregate,
}

/// Demand totals next to external context, for scatter/correlation work.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverRecord {
    pub region: String,
    pub date: NaiveDate,
    pub ga_occupied_total: f64,
    pub flu_occupied_total: Option<f64>,
    pub rsv_occupied_total: Option<f64>,
    pub temperature_mean: Option<f64>,
    pub precipitation_sum: Option<f64>,
    pub wind_max: Option<f64>,
    pub trends: BTreeMap<String, Option<f64>>,
}
