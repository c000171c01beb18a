//! Trust → region → system aggregation.
//!
//! Entities missing on a date are simply absent from that date's group; the
//! reporting counts record how many rows fed each figure.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::models::{
    DriverRecord, EnrichedFeatureRecord, Metric, PressureAggregate, RegionalSummary, SystemSummary,
};
use crate::rates;

pub fn regional_summaries(
    records: &[EnrichedFeatureRecord],
    keywords: &[String],
) -> Vec<RegionalSummary> {
    let mut groups: BTreeMap<(&str, NaiveDate), Vec<&EnrichedFeatureRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.region.as_str(), record.date))
            .or_default()
            .push(record);
    }

    groups
        .into_iter()
        .map(|((region, date), rows)| RegionalSummary {
            region: region.to_string(),
            date,
            aggregate: aggregate(&rows, keywords),
        })
        .collect()
}

pub fn system_summaries(
    records: &[EnrichedFeatureRecord],
    keywords: &[String],
) -> Vec<SystemSummary> {
    let mut groups: BTreeMap<NaiveDate, Vec<&EnrichedFeatureRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.date).or_default().push(record);
    }

    groups
        .into_iter()
        .map(|(date, rows)| {
            let regions: BTreeSet<&str> = rows.iter().map(|r| r.region.as_str()).collect();
            SystemSummary {
                date,
                regions_reporting: regions.len(),
                aggregate: aggregate(&rows, keywords),
            }
        })
        .collect()
}

pub fn driver_records(regional: &[RegionalSummary]) -> Vec<DriverRecord> {
    regional
        .iter()
        .map(|summary| {
            let agg = &summary.aggregate;
            DriverRecord {
                region: summary.region.clone(),
                date: summary.date,
                ga_occupied_total: agg.ga_occupied_total,
                flu_occupied_total: agg.flu_occupied_total,
                rsv_occupied_total: agg.rsv_occupied_total,
                temperature_mean: agg.temperature_mean,
                precipitation_sum: agg.precipitation_sum,
                wind_max: agg.wind_max,
                trends: agg.trends.clone(),
            }
        })
        .collect()
}

fn aggregate(rows: &[&EnrichedFeatureRecord], keywords: &[String]) -> PressureAggregate {
    let mut agg = PressureAggregate {
        trusts_reporting: rows.len(),
        ..PressureAggregate::default()
    };

    for row in rows {
        if let (Some(open), Some(occupied)) =
            (row.metric(Metric::GaOpen), row.metric(Metric::GaOccupied))
        {
            agg.bed_reporting += 1;
            agg.ga_open_total += open;
            agg.ga_occupied_total += occupied;
        }
        if let (Some(open), Some(occupied)) =
            (row.metric(Metric::CcOpen), row.metric(Metric::CcOccupied))
        {
            agg.cc_reporting += 1;
            agg.cc_open_total += open;
            agg.cc_occupied_total += occupied;
        }
        if row.is_high_pressure {
            agg.high_pressure_count += 1;
        }
    }

    agg.occupancy_rate = (agg.bed_reporting > 0)
        .then(|| rates::occupancy_rate(agg.ga_occupied_total, agg.ga_open_total));
    agg.cc_occupancy_rate = (agg.cc_reporting > 0)
        .then(|| rates::occupancy_rate(agg.cc_occupied_total, agg.cc_open_total));
    agg.high_pressure_share = (agg.bed_reporting > 0)
        .then(|| agg.high_pressure_count as f64 / agg.bed_reporting as f64);

    agg.flu_occupied_total = sum_reported(rows.iter().map(|r| r.metric(Metric::FluOccupied)));
    agg.rsv_occupied_total = sum_reported(rows.iter().map(|r| r.metric(Metric::RsvOccupied)));
    agg.peak_trust_occupancy_rate = rows
        .iter()
        .filter_map(|r| r.occupancy_rate)
        .fold(None, |peak: Option<f64>, rate| Some(peak.map_or(rate, |p| p.max(rate))));

    agg.temperature_mean = mean_reported(rows.iter().map(|r| r.weather.temperature_mean));
    agg.precipitation_sum = mean_reported(rows.iter().map(|r| r.weather.precipitation_sum));
    agg.wind_max = mean_reported(rows.iter().map(|r| r.weather.wind_max));
    agg.trends = keywords
        .iter()
        .map(|keyword| {
            let value =
                mean_reported(rows.iter().map(|r| r.trends.get(keyword).copied().flatten()));
            (keyword.clone(), value)
        })
        .collect();

    agg
}

fn sum_reported(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |total, v| Some(total.unwrap_or(0.0) + v))
}

fn mean_reported(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
