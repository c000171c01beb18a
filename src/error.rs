//! Error taxonomy for a pipeline run.
//!
//! Structural problems abort the run. Duplicate metrics are recovered by the
//! pivot tie-break and only surface as warnings in the quality report.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::models::Metric;

/// The same metric was reported more than once for one entity-day.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("duplicate {metric} for {entity_id} on {date}: kept {kept}, discarded {discarded}")]
pub struct DuplicateMetricError {
    pub entity_id: String,
    pub date: NaiveDate,
    pub metric: Metric,
    pub kept: f64,
    pub discarded: f64,
}

/// Regions used by at least one entity with no weather site declared.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no weather site mapped for region(s): {}", .regions.join(", "))]
pub struct UnmappedRegionError {
    pub regions: Vec<String>,
}

/// Two weekly observations for one keyword cover the same day.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("overlapping trend weeks for '{keyword}': {first} and {second} are less than 7 days apart")]
pub struct OverlappingWindowError {
    pub keyword: String,
    pub first: NaiveDate,
    pub second: NaiveDate,
}

/// Errors that abort a pipeline run. No output is published after any of these.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    UnmappedRegion(#[from] UnmappedRegionError),

    #[error(transparent)]
    OverlappingWindow(#[from] OverlappingWindowError),

    /// Metric records reference trusts missing from the organisation catalog
    #[error("metric records reference unknown trust(s): {}", .entity_ids.join(", "))]
    UnknownEntity { entity_ids: Vec<String> },

    /// Metric records fall outside the analysis calendar
    #[error("{count} metric record(s) outside calendar {start}..={end}, first {entity_id} on {date}")]
    OutsideCalendar {
        count: usize,
        start: NaiveDate,
        end: NaiveDate,
        entity_id: String,
        date: NaiveDate,
    },

    /// Bed counts cannot be negative
    #[error("negative {metric} ({value}) for {entity_id} on {date}")]
    NegativeMetric {
        entity_id: String,
        date: NaiveDate,
        metric: Metric,
        value: f64,
    },

    /// Calendar has no dates to cover
    #[error("calendar is empty: {0}")]
    EmptyCalendar(String),
}
