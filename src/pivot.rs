use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::config::MetricMapping;
use crate::error::DuplicateMetricError;
use crate::models::{Metric, MetricRecord, WideDailyRecord};

#[derive(Debug, Clone, Default)]
pub struct PivotOutcome {
    pub records: Vec<WideDailyRecord>,
    pub duplicates: Vec<DuplicateMetricError>,
    pub unrecognized: usize,
    pub non_finite: usize,
}

/// Group long records by (entity, date) and pick one value per recognised
/// metric. Output is ordered by entity then date.
pub fn pivot_metrics(records: &[MetricRecord], recognized: &[MetricMapping]) -> PivotOutcome {
    let lookup: HashMap<&str, Metric> = recognized
        .iter()
        .map(|mapping| (mapping.source.as_str(), mapping.metric))
        .collect();

    let mut outcome = PivotOutcome::default();
    let mut facts: Vec<(&str, NaiveDate, Metric, f64)> = Vec::with_capacity(records.len());

    for record in records {
        let Some(&metric) = lookup.get(record.metric_name.trim()) else {
            outcome.unrecognized += 1;
            continue;
        };
        if !record.value.is_finite() {
            outcome.non_finite += 1;
            continue;
        }
        facts.push((record.entity_id.as_str(), record.date, metric, record.value));
    }

    // Stable: among equal keys the first record in input order stays first.
    facts.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));

    let mut grouped: BTreeMap<(&str, NaiveDate), BTreeMap<Metric, f64>> = BTreeMap::new();
    for (entity_id, date, metric, value) in facts {
        let values = grouped.entry((entity_id, date)).or_default();
        match values.get(&metric) {
            Some(&kept) => {
                let duplicate = DuplicateMetricError {
                    entity_id: entity_id.to_string(),
                    date,
                    metric,
                    kept,
                    discarded: value,
                };
                warn!(%duplicate, "duplicate metric resolved by first-seen tie-break");
                outcome.duplicates.push(duplicate);
            }
            None => {
                values.insert(metric, value);
            }
        }
    }

    outcome.records = grouped
        .into_iter()
        .map(|((entity_id, date), values)| WideDailyRecord {
            entity_id: entity_id.to_string(),
            date,
            values,
        })
        .collect();

    debug!(
        wide_records = outcome.records.len(),
        unrecognized = outcome.unrecognized,
        non_finite = outcome.non_finite,
        "pivoted metric records"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_recognized_metrics;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn record(entity: &str, d: u32, metric: &str, value: f64) -> MetricRecord {
        MetricRecord {
            entity_id: entity.to_string(),
            date: day(d),
            metric_name: metric.to_string(),
            value,
        }
    }

    const OPEN: &str = "Total G&A beds_Total G&A beds open";
    const OCCUPIED: &str = "Total G&A beds_Total G&A beds occupied";

    #[test]
    fn groups_long_records_into_one_row_per_entity_day() {
        let records = vec![
            record("RJ1", 2, OCCUPIED, 95.0),
            record("RJ1", 1, OPEN, 100.0),
            record("RJ1", 1, OCCUPIED, 90.0),
            record("RAL", 1, OPEN, 50.0),
        ];
        let outcome = pivot_metrics(&records, &default_recognized_metrics());

        assert_eq!(outcome.records.len(), 3);
        let first = &outcome.records[0];
        assert_eq!(first.entity_id, "RAL");
        assert_eq!(first.get(Metric::GaOpen), Some(50.0));
        assert_eq!(first.get(Metric::GaOccupied), None);

        let rj1_day1 = &outcome.records[1];
        assert_eq!((rj1_day1.entity_id.as_str(), rj1_day1.date), ("RJ1", day(1)));
        assert_eq!(rj1_day1.get(Metric::GaOccupied), Some(90.0));
        assert!(outcome.duplicates.is_empty());
    }

    #[test]
    fn missing_metric_is_not_zero() {
        let outcome = pivot_metrics(&[record("RJ1", 1, OPEN, 0.0)], &default_recognized_metrics());
        let row = &outcome.records[0];
        assert_eq!(row.get(Metric::GaOpen), Some(0.0));
        assert_eq!(row.get(Metric::FluOccupied), None);
    }

    #[test]
    fn duplicates_keep_first_seen_and_are_reported() {
        let records = vec![
            record("RJ1", 1, OCCUPIED, 90.0),
            record("RJ1", 1, OPEN, 100.0),
            record("RJ1", 1, OCCUPIED, 91.0),
        ];
        let outcome = pivot_metrics(&records, &default_recognized_metrics());

        assert_eq!(outcome.records[0].get(Metric::GaOccupied), Some(90.0));
        assert_eq!(outcome.duplicates.len(), 1);
        let duplicate = &outcome.duplicates[0];
        assert_eq!(duplicate.metric, Metric::GaOccupied);
        assert_eq!(duplicate.kept, 90.0);
        assert_eq!(duplicate.discarded, 91.0);
    }

    #[test]
    fn aliases_mapping_to_one_column_collide() {
        let mut recognized = default_recognized_metrics();
        recognized.push(MetricMapping {
            source: "G&A beds occupied".to_string(),
            metric: Metric::GaOccupied,
        });
        let records = vec![
            record("RJ1", 1, "G&A beds occupied", 88.0),
            record("RJ1", 1, OCCUPIED, 90.0),
        ];
        let outcome = pivot_metrics(&records, &recognized);
        assert_eq!(outcome.records[0].get(Metric::GaOccupied), Some(88.0));
        assert_eq!(outcome.duplicates.len(), 1);
    }

    #[test]
    fn rows_without_recognised_metrics_are_dropped() {
        let records = vec![
            record("RJ1", 1, "Total G&A beds_Escalation beds", 4.0),
            record("RJ1", 2, OPEN, f64::NAN),
            record("RAL", 1, OPEN, 40.0),
        ];
        let outcome = pivot_metrics(&records, &default_recognized_metrics());
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].entity_id, "RAL");
        assert_eq!(outcome.unrecognized, 1);
        assert_eq!(outcome.non_finite, 1);
    }

    #[test]
    fn output_is_independent_of_input_order() {
        let mut records = vec![
            record("RJ1", 2, OPEN, 100.0),
            record("RAL", 1, OCCUPIED, 30.0),
            record("RJ1", 1, OPEN, 99.0),
            record("RAL", 1, OPEN, 50.0),
        ];
        let forward = pivot_metrics(&records, &default_recognized_metrics());
        records.reverse();
        let backward = pivot_metrics(&records, &default_recognized_metrics());
        assert_eq!(forward.records, backward.records);
    }
}
