//! Weekly search-interest series expanded onto days.
//!
//! Each observation covers the half-open interval `[week_start, week_start + 7)`.
//! Lookups binary-search the sorted week starts of a keyword.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};

use crate::error::OverlappingWindowError;
use crate::models::{ExpandedTrendRecord, TrendObservation};

pub const WEEK_DAYS: i64 = 7;

#[derive(Debug, Clone, Default)]
pub struct TrendIndex {
    weeks: BTreeMap<String, Vec<(NaiveDate, f64)>>,
}

impl TrendIndex {
    /// Fails when two weeks of one keyword start less than seven days apart.
    pub fn build(observations: &[TrendObservation]) -> Result<Self, OverlappingWindowError> {
        let mut weeks: BTreeMap<String, Vec<(NaiveDate, f64)>> = BTreeMap::new();
        for observation in observations {
            weeks
                .entry(observation.keyword.clone())
                .or_default()
                .push((observation.week_start_date, observation.search_volume));
        }

        for (keyword, series) in weeks.iter_mut() {
            series.sort_by_key(|(week_start, _)| *week_start);
            for pair in series.windows(2) {
                let (first, second) = (pair[0].0, pair[1].0);
                if (second - first).num_days() < WEEK_DAYS {
                    return Err(OverlappingWindowError {
                        keyword: keyword.clone(),
                        first,
                        second,
                    });
                }
            }
        }

        Ok(Self { weeks })
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.weeks.keys().map(String::as_str)
    }

    /// Value of the week covering `date`, or `None` outside observed weeks.
    pub fn value_at(&self, keyword: &str, date: NaiveDate) -> Option<f64> {
        let series = self.weeks.get(keyword)?;
        let idx = series.partition_point(|(week_start, _)| *week_start <= date);
        let (week_start, value) = *series.get(idx.checked_sub(1)?)?;
        (date < week_start + Duration::days(WEEK_DAYS)).then_some(value)
    }

    pub fn expand(
        &self,
        keyword: &str,
        dates: impl IntoIterator<Item = NaiveDate>,
    ) -> Vec<ExpandedTrendRecord> {
        dates
            .into_iter()
            .map(|date| ExpandedTrendRecord {
                keyword: keyword.to_string(),
                date,
                search_volume: self.value_at(keyword, date),
            })
            .collect()
    }
}

/// Daily trend values by keyword, built from expanded records.
#[derive(Debug, Clone, Default)]
pub struct ExpandedTrends {
    values: BTreeMap<String, BTreeMap<NaiveDate, Option<f64>>>,
}

impl ExpandedTrends {
    pub fn new(records: impl IntoIterator<Item = ExpandedTrendRecord>) -> Self {
        let mut values: BTreeMap<String, BTreeMap<NaiveDate, Option<f64>>> = BTreeMap::new();
        for record in records {
            values
                .entry(record.keyword)
                .or_default()
                .insert(record.date, record.search_volume);
        }
        Self { values }
    }

    /// Expand every keyword across the given dates.
    pub fn from_index<'k>(
        index: &TrendIndex,
        keywords: impl IntoIterator<Item = &'k str>,
        dates: &[NaiveDate],
    ) -> Self {
        Self::new(
            keywords
                .into_iter()
                .flat_map(|keyword| index.expand(keyword, dates.iter().copied())),
        )
    }

    pub fn value_at(&self, keyword: &str, date: NaiveDate) -> Option<f64> {
        self.values.get(keyword)?.get(&date).copied().flatten()
    }
}
