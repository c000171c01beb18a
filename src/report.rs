use std::fmt::Write;

use crate::config::PipelineConfig;
use crate::models::EnrichedFeatureRecord;
use crate::pipeline::PipelineOutput;

fn pct(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

fn pct_reported(value: Option<f64>) -> String {
    value.map(pct).unwrap_or_else(|| "n/a".to_string())
}

/// Trusts on the latest reported date, highest rolling occupancy first.
pub fn latest_pressure_ranking(records: &[EnrichedFeatureRecord]) -> Vec<&EnrichedFeatureRecord> {
    let Some(latest) = records.iter().map(|r| r.date).max() else {
        return Vec::new();
    };
    let mut ranked: Vec<&EnrichedFeatureRecord> = records
        .iter()
        .filter(|r| r.date == latest && r.rolling_occupancy_rate.is_some())
        .collect();
    ranked.sort_by(|a, b| {
        b.rolling_occupancy_rate
            .partial_cmp(&a.rolling_occupancy_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    ranked
}

pub fn build_report(output: &PipelineOutput, config: &PipelineConfig) -> String {
    let mut out = String::new();
    let quality = &output.quality;

    let _ = writeln!(out, "# Winter Pressures Run Report");
    let _ = writeln!(
        out,
        "Covering {} to {} (high-pressure threshold {})",
        output.calendar.start(),
        output.calendar.end(),
        pct(config.high_pressure_threshold)
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "## System Pressure");

    match output.system.last() {
        None => {
            let _ = writeln!(out, "No trust data in this window.");
        }
        Some(latest) => {
            let agg = &latest.aggregate;
            let _ = writeln!(
                out,
                "- {}: {} occupied of {} open G&A beds ({}) across {} trusts in {} regions",
                latest.date,
                agg.ga_occupied_total,
                agg.ga_open_total,
                pct_reported(agg.occupancy_rate),
                agg.bed_reporting,
                latest.regions_reporting
            );
            let _ = writeln!(
                out,
                "- {} trusts above threshold",
                agg.high_pressure_count
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Regions");

    let latest_date = output.regional.iter().map(|r| r.date).max();
    let mut regions: Vec<_> = output
        .regional
        .iter()
        .filter(|r| Some(r.date) == latest_date)
        .collect();
    regions.sort_by(|a, b| {
        b.aggregate
            .occupancy_rate
            .partial_cmp(&a.aggregate.occupancy_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.region.cmp(&b.region))
    });

    if regions.is_empty() {
        let _ = writeln!(out, "No regional summaries for this window.");
    } else {
        for region in regions {
            let _ = writeln!(
                out,
                "- {}: {} occupancy, {} of {} trusts high pressure",
                region.region,
                pct_reported(region.aggregate.occupancy_rate),
                region.aggregate.high_pressure_count,
                region.aggregate.bed_reporting
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Highest Pressure Trusts");

    let ranked = latest_pressure_ranking(&output.trust);
    if ranked.is_empty() {
        let _ = writeln!(out, "No trusts with occupancy data on the latest date.");
    } else {
        for record in ranked.iter().take(10) {
            let _ = writeln!(
                out,
                "- {} ({}, {}) {}-day average {}",
                record.display_name,
                record.entity_id,
                record.region,
                config.rolling_window_days,
                pct_reported(record.rolling_occupancy_rate)
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Data Quality");
    let _ = writeln!(out, "- Geo proxy map version {}", quality.geo_map_version);
    let _ = writeln!(out, "- Duplicate metrics resolved: {}", quality.duplicate_metrics);
    let _ = writeln!(
        out,
        "- Duplicate weather observations ignored: {}",
        quality.duplicate_weather_observations
    );
    let _ = writeln!(out, "- Unrecognised metric records: {}", quality.unrecognized_records);
    let _ = writeln!(out, "- Zero-capacity trust days: {}", quality.zero_denominator_days);
    let _ = writeln!(out, "- Missing weather days: {}", quality.missing_weather_days);
    let _ = writeln!(
        out,
        "- Calendar gaps: {} trust days across {} trusts",
        quality.calendar_gap_days, quality.entities_with_gaps
    );
    for proxy in &quality.proxy_regions {
        let _ = writeln!(
            out,
            "- {} uses {} weather as a proxy",
            proxy.region, proxy.site_id
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use crate::catalog::Calendar;
    use crate::models::WeatherContext;
    use crate::quality::{ProxyUse, QualityReport};

    fn record(entity: &str, d: u32, rolling: Option<f64>) -> EnrichedFeatureRecord {
        EnrichedFeatureRecord {
            entity_id: entity.to_string(),
            display_name: format!("{entity} Hospitals"),
            region: "London".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, d).unwrap(),
            metrics: BTreeMap::new(),
            occupancy_rate: rolling,
            cc_occupancy_rate: None,
            flu_share_of_occupied: None,
            is_high_pressure: false,
            rolling_occupancy_rate: rolling,
            rolling_observations: usize::from(rolling.is_some()),
            lag_value: None,
            weather: WeatherContext::default(),
            trends: BTreeMap::new(),
            scenario: None,
        }
    }

    #[test]
    fn ranking_uses_latest_date_only() {
        let records = vec![
            record("A", 1, Some(0.99)),
            record("A", 2, Some(0.7)),
            record("B", 2, Some(0.91)),
            record("C", 2, None),
        ];
        let ranked = latest_pressure_ranking(&records);
        let ids: Vec<&str> = ranked.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    #[test]
    fn empty_output_still_renders() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let output = PipelineOutput {
            calendar: Calendar::new(day, day).unwrap(),
            trust: Vec::new(),
            regional: Vec::new(),
            system: Vec::new(),
            drivers: Vec::new(),
            quality: QualityReport {
                proxy_regions: vec![ProxyUse {
                    region: "South East".to_string(),
                    site_id: "London".to_string(),
                }],
                ..QualityReport::default()
            },
        };
        let report = build_report(&output, &PipelineConfig::default());
        assert!(report.starts_with("# Winter Pressures Run Report"));
        assert!(report.contains("No trust data in this window."));
        assert!(report.contains("South East uses London weather as a proxy"));
    }

    #[test]
    fn unreported_region_rate_renders_as_not_available() {
        use crate::models::{PressureAggregate, RegionalSummary};

        let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let output = PipelineOutput {
            calendar: Calendar::new(day, day).unwrap(),
            trust: Vec::new(),
            regional: vec![RegionalSummary {
                region: "North West".to_string(),
                date: day,
                aggregate: PressureAggregate {
                    trusts_reporting: 1,
                    ..PressureAggregate::default()
                },
            }],
            system: Vec::new(),
            drivers: Vec::new(),
            quality: QualityReport::default(),
        };
        let report = build_report(&output, &PipelineConfig::default());
        assert!(report.contains("- North West: n/a occupancy"));
    }
}
