use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::warn;

use crate::catalog::{Calendar, OrganisationCatalog};
use crate::error::{DuplicateMetricError, PipelineError};
use crate::geo::GeoProxyMap;
use crate::models::{EnrichedFeatureRecord, Metric, WideDailyRecord};
use crate::pivot::PivotOutcome;

const MAX_LISTED_DUPLICATES: usize = 50;

/// Referential and range checks on pivoted input. Any failure aborts the run.
pub fn check_inputs(
    records: &[WideDailyRecord],
    catalog: &OrganisationCatalog,
    calendar: &Calendar,
    geo: &GeoProxyMap,
) -> Result<(), PipelineError> {
    let unknown: BTreeSet<&str> = records
        .iter()
        .map(|r| r.entity_id.as_str())
        .filter(|id| catalog.get(id).is_none())
        .collect();
    if !unknown.is_empty() {
        return Err(PipelineError::UnknownEntity {
            entity_ids: unknown.into_iter().map(str::to_string).collect(),
        });
    }

    let outside: Vec<&WideDailyRecord> =
        records.iter().filter(|r| !calendar.contains(r.date)).collect();
    if let Some(first) = outside.first() {
        return Err(PipelineError::OutsideCalendar {
            count: outside.len(),
            start: calendar.start(),
            end: calendar.end(),
            entity_id: first.entity_id.clone(),
            date: first.date,
        });
    }

    for record in records {
        if let Some((&metric, &value)) = record.values.iter().find(|(_, v)| **v < 0.0) {
            return Err(PipelineError::NegativeMetric {
                entity_id: record.entity_id.clone(),
                date: record.date,
                metric,
                value,
            });
        }
    }

    geo.ensure_covers(catalog.regions())?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyUse {
    pub region: String,
    pub site_id: String,
}

/// Counts of locally handled edge cases for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct QualityReport {
    pub geo_map_version: String,
    pub calendar_start: Option<chrono::NaiveDate>,
    pub calendar_end: Option<chrono::NaiveDate>,
    pub wide_records: usize,
    pub enriched_rows: usize,
    pub duplicate_metrics: usize,
    pub duplicates: Vec<DuplicateMetricError>,
    pub duplicate_weather_observations: usize,
    pub unrecognized_records: usize,
    pub non_finite_values: usize,
    pub zero_denominator_days: usize,
    pub occupied_exceeds_open_days: usize,
    pub missing_weather_days: usize,
    pub missing_trend_values: usize,
    pub calendar_gap_days: usize,
    pub entities_with_gaps: usize,
    pub proxy_regions: Vec<ProxyUse>,
}

impl QualityReport {
    /// Gap counts cover every catalog trust, including ones with no rows.
    pub fn build(
        pivot: &PivotOutcome,
        enriched: &[EnrichedFeatureRecord],
        catalog: &OrganisationCatalog,
        calendar: &Calendar,
        geo: &GeoProxyMap,
        duplicate_weather_observations: usize,
        proxies: Vec<(String, String)>,
    ) -> Self {
        let mut report = QualityReport {
            geo_map_version: geo.version().to_string(),
            calendar_start: Some(calendar.start()),
            calendar_end: Some(calendar.end()),
            wide_records: pivot.records.len(),
            enriched_rows: enriched.len(),
            duplicate_metrics: pivot.duplicates.len(),
            duplicates: pivot
                .duplicates
                .iter()
                .take(MAX_LISTED_DUPLICATES)
                .cloned()
                .collect(),
            duplicate_weather_observations,
            unrecognized_records: pivot.unrecognized,
            non_finite_values: pivot.non_finite,
            proxy_regions: proxies
                .into_iter()
                .map(|(region, site_id)| ProxyUse { region, site_id })
                .collect(),
            ..QualityReport::default()
        };

        let mut days_per_entity: BTreeMap<&str, usize> =
            catalog.ids().map(|id| (id, 0)).collect();
        for row in enriched {
            *days_per_entity.entry(row.entity_id.as_str()).or_default() += 1;

            if let (Some(open), Some(occupied)) =
                (row.metric(Metric::GaOpen), row.metric(Metric::GaOccupied))
            {
                if open <= 0.0 {
                    report.zero_denominator_days += 1;
                } else if occupied > open {
                    report.occupied_exceeds_open_days += 1;
                }
            }
            if row.weather.temperature_mean.is_none()
                && row.weather.precipitation_sum.is_none()
                && row.weather.wind_max.is_none()
            {
                report.missing_weather_days += 1;
            }
            report.missing_trend_values += row.trends.values().filter(|v| v.is_none()).count();
        }

        for days in days_per_entity.values() {
            let missing = calendar.len().saturating_sub(*days);
            if missing > 0 {
                report.entities_with_gaps += 1;
                report.calendar_gap_days += missing;
            }
        }

        if report.duplicate_metrics > 0 {
            warn!(
                count = report.duplicate_metrics,
                "duplicate metrics resolved during pivot"
            );
        }
        if report.duplicate_weather_observations > 0 {
            warn!(
                count = report.duplicate_weather_observations,
                "duplicate weather observations ignored"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::models::Entity;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, d).unwrap()
    }

    fn catalog(region: &str) -> OrganisationCatalog {
        OrganisationCatalog::new(vec![Entity {
            id: "RJ1".to_string(),
            display_name: "Guy's and St Thomas'".to_string(),
            region: region.to_string(),
        }])
    }

    fn wide(entity: &str, d: u32, open: f64) -> WideDailyRecord {
        WideDailyRecord {
            entity_id: entity.to_string(),
            date: day(d),
            values: BTreeMap::from([(Metric::GaOpen, open)]),
        }
    }

    fn calendar() -> Calendar {
        Calendar::new(day(1), day(7)).unwrap()
    }

    #[test]
    fn clean_input_passes() {
        let geo = GeoProxyMap::england_default();
        let result = check_inputs(&[wide("RJ1", 1, 10.0)], &catalog("London"), &calendar(), &geo);
        assert!(result.is_ok());
    }

    #[test]
    fn unknown_trusts_are_listed() {
        let geo = GeoProxyMap::england_default();
        let records = vec![wide("ZZZ", 1, 1.0), wide("AAA", 2, 1.0), wide("ZZZ", 3, 1.0)];
        let err = check_inputs(&records, &catalog("London"), &calendar(), &geo).unwrap_err();
        match err {
            PipelineError::UnknownEntity { entity_ids } => {
                assert_eq!(entity_ids, vec!["AAA".to_string(), "ZZZ".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dates_outside_calendar_fail() {
        let geo = GeoProxyMap::england_default();
        let records = vec![wide("RJ1", 1, 1.0), wide("RJ1", 9, 1.0)];
        let err = check_inputs(&records, &catalog("London"), &calendar(), &geo).unwrap_err();
        assert!(matches!(err, PipelineError::OutsideCalendar { count: 1, .. }));
    }

    #[test]
    fn negative_counts_fail() {
        let geo = GeoProxyMap::england_default();
        let err = check_inputs(&[wide("RJ1", 1, -4.0)], &catalog("London"), &calendar(), &geo)
            .unwrap_err();
        assert!(matches!(err, PipelineError::NegativeMetric { metric: Metric::GaOpen, .. }));
    }

    #[test]
    fn unmapped_region_fails_before_composition() {
        let geo = GeoProxyMap::england_default();
        let err = check_inputs(&[wide("RJ1", 1, 1.0)], &catalog("Wales"), &calendar(), &geo)
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnmappedRegion(_)));
    }

    fn enriched(entity: &str, d: u32) -> EnrichedFeatureRecord {
        EnrichedFeatureRecord {
            entity_id: entity.to_string(),
            display_name: entity.to_string(),
            region: "London".to_string(),
            date: day(d),
            metrics: BTreeMap::from([(Metric::GaOpen, 10.0), (Metric::GaOccupied, 5.0)]),
            occupancy_rate: Some(0.5),
            cc_occupancy_rate: None,
            flu_share_of_occupied: None,
            is_high_pressure: false,
            rolling_occupancy_rate: Some(0.5),
            rolling_observations: 1,
            lag_value: None,
            weather: Default::default(),
            trends: BTreeMap::new(),
            scenario: None,
        }
    }

    fn two_trust_catalog() -> OrganisationCatalog {
        OrganisationCatalog::new(vec![
            Entity {
                id: "RJ1".to_string(),
                display_name: "Guy's and St Thomas'".to_string(),
                region: "London".to_string(),
            },
            Entity {
                id: "RYJ".to_string(),
                display_name: "Imperial College Healthcare".to_string(),
                region: "London".to_string(),
            },
        ])
    }

    #[test]
    fn silent_catalog_trusts_count_as_gaps() {
        let rows: Vec<EnrichedFeatureRecord> = (1..=7).map(|d| enriched("RJ1", d)).collect();
        let report = QualityReport::build(
            &PivotOutcome::default(),
            &rows,
            &two_trust_catalog(),
            &calendar(),
            &GeoProxyMap::england_default(),
            0,
            Vec::new(),
        );
        assert_eq!(report.entities_with_gaps, 1);
        assert_eq!(report.calendar_gap_days, 7);
    }

    #[test]
    fn weather_duplicates_are_reported() {
        let report = QualityReport::build(
            &PivotOutcome::default(),
            &[enriched("RJ1", 1)],
            &catalog("London"),
            &calendar(),
            &GeoProxyMap::england_default(),
            3,
            Vec::new(),
        );
        assert_eq!(report.duplicate_weather_observations, 3);
        assert_eq!(report.calendar_gap_days, 6);
    }
}
