//! CSV input loading and atomic publication of the output views.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::OrganisationCatalog;
use crate::config::{trend_column, PipelineConfig};
use crate::geo::{GeoProxyMap, ProxyEntry};
use crate::models::{
    DriverRecord, Entity, EnrichedFeatureRecord, Metric, MetricRecord, PressureAggregate,
    RegionalSummary, SystemSummary, TrendObservation, WeatherObservation,
};
use crate::pipeline::PipelineOutput;
use crate::report;

pub const TRUST_FILE: &str = "trust_daily.csv";
pub const REGION_FILE: &str = "region_daily.csv";
pub const SYSTEM_FILE: &str = "system_daily.csv";
pub const DRIVER_FILE: &str = "driver_daily.csv";
pub const QUALITY_FILE: &str = "quality.json";
pub const REPORT_FILE: &str = "report.md";

/// Accepts `YYYY-MM-DD` with an optional time suffix, as pandas exports dates.
pub fn parse_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    let trimmed = raw.trim();
    let day = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
}

pub fn deserialize_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw).map_err(serde::de::Error::custom)
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for (idx, result) in reader.deserialize::<T>().enumerate() {
        let row = result.with_context(|| format!("{}: invalid row {}", path.display(), idx + 2))?;
        rows.push(row);
    }
    info!(path = %path.display(), rows = rows.len(), "loaded csv");
    Ok(rows)
}

pub fn load_metrics(path: &Path) -> anyhow::Result<Vec<MetricRecord>> {
    read_csv(path)
}

pub fn load_organisations(path: &Path) -> anyhow::Result<OrganisationCatalog> {
    let entities: Vec<Entity> = read_csv(path)?;
    let catalog = OrganisationCatalog::new(entities);
    anyhow::ensure!(!catalog.is_empty(), "organisation catalog {} is empty", path.display());
    info!(
        trusts = catalog.len(),
        regions = catalog.regions().len(),
        "loaded organisation catalog"
    );
    Ok(catalog)
}

pub fn load_weather(path: &Path) -> anyhow::Result<Vec<WeatherObservation>> {
    read_csv(path)
}

pub fn load_trends(path: &Path) -> anyhow::Result<Vec<TrendObservation>> {
    read_csv(path)
}

/// Table of `region,site_id,proxy` rows; the file stem is used as version.
pub fn load_geo_map(path: &Path) -> anyhow::Result<GeoProxyMap> {
    let entries: Vec<ProxyEntry> = read_csv(path)?;
    let version = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "custom".to_string());
    Ok(GeoProxyMap::new(version, entries))
}

fn num(value: f64) -> String {
    value.to_string()
}

fn opt(value: Option<f64>) -> String {
    value.map(num).unwrap_or_default()
}

fn trend_headers(config: &PipelineConfig) -> Vec<String> {
    config.trend_keywords.iter().map(|k| trend_column(k)).collect()
}

fn trend_fields(
    trends: &std::collections::BTreeMap<String, Option<f64>>,
    config: &PipelineConfig,
) -> Vec<String> {
    config
        .trend_keywords
        .iter()
        .map(|k| opt(trends.get(k).copied().flatten()))
        .collect()
}

pub fn write_trust<W: Write>(
    writer: W,
    rows: &[EnrichedFeatureRecord],
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    let mut out = csv::Writer::from_writer(writer);

    let mut header: Vec<String> = ["trust_code", "trust_name", "region", "date"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(Metric::ALL.iter().map(|m| m.column().to_string()));
    header.extend(
        [
            "occupancy_rate",
            "cc_occupancy_rate",
            "flu_share_of_occupied",
            "is_high_pressure",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    header.push(config.rolling_column());
    header.push(format!("{}_days_observed", config.rolling_column()));
    header.push(config.lag_column());
    header.extend(
        [
            "weather_site",
            "weather_proxy_used",
            "temperature_mean",
            "precipitation_sum",
            "wind_max",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    header.extend(trend_headers(config));
    header.push(config.scenario_column());
    out.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.entity_id.clone(),
            row.display_name.clone(),
            row.region.clone(),
            row.date.to_string(),
        ];
        record.extend(Metric::ALL.iter().map(|m| opt(row.metric(*m))));
        record.push(opt(row.occupancy_rate));
        record.push(opt(row.cc_occupancy_rate));
        record.push(opt(row.flu_share_of_occupied));
        record.push(row.is_high_pressure.to_string());
        record.push(opt(row.rolling_occupancy_rate));
        record.push(row.rolling_observations.to_string());
        record.push(opt(row.lag_value));
        record.push(row.weather.site_id.clone());
        record.push(row.weather.proxy_used.to_string());
        record.push(opt(row.weather.temperature_mean));
        record.push(opt(row.weather.precipitation_sum));
        record.push(opt(row.weather.wind_max));
        record.extend(trend_fields(&row.trends, config));
        record.push(opt(row.scenario.map(|s| s.0)));
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

const AGGREGATE_COLUMNS: [&str; 17] = [
    "trusts_reporting",
    "bed_reporting",
    "ga_open_total",
    "ga_occupied_total",
    "occupancy_rate",
    "cc_reporting",
    "cc_open_total",
    "cc_occupied_total",
    "cc_occupancy_rate",
    "flu_occupied_total",
    "rsv_occupied_total",
    "high_pressure_count",
    "high_pressure_share",
    "peak_trust_occupancy_rate",
    "temperature_mean",
    "precipitation_sum",
    "wind_max",
];

fn aggregate_fields(agg: &PressureAggregate, config: &PipelineConfig) -> Vec<String> {
    let mut fields = vec![
        agg.trusts_reporting.to_string(),
        agg.bed_reporting.to_string(),
        num(agg.ga_open_total),
        num(agg.ga_occupied_total),
        opt(agg.occupancy_rate),
        agg.cc_reporting.to_string(),
        num(agg.cc_open_total),
        num(agg.cc_occupied_total),
        opt(agg.cc_occupancy_rate),
        opt(agg.flu_occupied_total),
        opt(agg.rsv_occupied_total),
        agg.high_pressure_count.to_string(),
        opt(agg.high_pressure_share),
        opt(agg.peak_trust_occupancy_rate),
        opt(agg.temperature_mean),
        opt(agg.precipitation_sum),
        opt(agg.wind_max),
    ];
    fields.extend(trend_fields(&agg.trends, config));
    fields
}

fn aggregate_header(leading: &[&str], with_regions: bool, config: &PipelineConfig) -> Vec<String> {
    let mut header: Vec<String> = leading.iter().map(|s| s.to_string()).collect();
    if with_regions {
        header.push("regions_reporting".to_string());
    }
    header.extend(AGGREGATE_COLUMNS.iter().map(|s| s.to_string()));
    header.extend(trend_headers(config));
    header
}

pub fn write_regional<W: Write>(
    writer: W,
    rows: &[RegionalSummary],
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(aggregate_header(&["region", "date"], false, config))?;
    for row in rows {
        let mut record = vec![row.region.clone(), row.date.to_string()];
        record.extend(aggregate_fields(&row.aggregate, config));
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_system<W: Write>(
    writer: W,
    rows: &[SystemSummary],
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(aggregate_header(&["date"], true, config))?;
    for row in rows {
        let mut record = vec![row.date.to_string(), row.regions_reporting.to_string()];
        record.extend(aggregate_fields(&row.aggregate, config));
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_drivers<W: Write>(
    writer: W,
    rows: &[DriverRecord],
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    let mut header: Vec<String> = [
        "region",
        "date",
        "ga_occupied_total",
        "flu_occupied_total",
        "rsv_occupied_total",
        "temperature_mean",
        "precipitation_sum",
        "wind_max",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(trend_headers(config));
    out.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.region.clone(),
            row.date.to_string(),
            num(row.ga_occupied_total),
            opt(row.flu_occupied_total),
            opt(row.rsv_occupied_total),
            opt(row.temperature_mean),
            opt(row.precipitation_sum),
            opt(row.wind_max),
        ];
        record.extend(trend_fields(&row.trends, config));
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

/// Serialise every output file in memory so nothing touches disk unless all
/// of them render.
pub fn render_outputs(
    output: &PipelineOutput,
    config: &PipelineConfig,
) -> anyhow::Result<Vec<(&'static str, Vec<u8>)>> {
    let mut trust = Vec::new();
    write_trust(&mut trust, &output.trust, config)?;
    let mut regional = Vec::new();
    write_regional(&mut regional, &output.regional, config)?;
    let mut system = Vec::new();
    write_system(&mut system, &output.system, config)?;
    let mut drivers = Vec::new();
    write_drivers(&mut drivers, &output.drivers, config)?;
    let mut quality = serde_json::to_vec_pretty(&output.quality)?;
    quality.push(b'\n');
    let report = report::build_report(output, config).into_bytes();

    Ok(vec![
        (TRUST_FILE, trust),
        (REGION_FILE, regional),
        (SYSTEM_FILE, system),
        (DRIVER_FILE, drivers),
        (QUALITY_FILE, quality),
        (REPORT_FILE, report),
    ])
}

/// A complete output set written beside `out_dir` but not yet visible.
/// Committing swaps it in place of `out_dir` by rename.
///
/// Dropping it without [`StagedOutput::commit`] removes the staging directory
/// and leaves `out_dir` as it was.
#[derive(Debug)]
pub struct StagedOutput {
    out_dir: PathBuf,
    staging: PathBuf,
    previous: PathBuf,
    files: usize,
    run_id: Uuid,
}

pub fn stage_output(
    out_dir: &Path,
    files: &[(&str, Vec<u8>)],
    run_id: Uuid,
) -> anyhow::Result<StagedOutput> {
    let name = out_dir
        .file_name()
        .with_context(|| format!("output path {} must name a directory", out_dir.display()))?
        .to_string_lossy()
        .into_owned();
    let parent = out_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let staged = StagedOutput {
        out_dir: out_dir.to_path_buf(),
        staging: parent.join(format!(".{name}.staging-{run_id}")),
        previous: parent.join(format!(".{name}.previous-{run_id}")),
        files: files.len(),
        run_id,
    };
    write_staging(&staged.staging, files)?;
    Ok(staged)
}

impl StagedOutput {
    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// Swap the staged files in place of the output directory.
    pub fn commit(self) -> anyhow::Result<()> {
        let out_dir = &self.out_dir;
        let had_previous = out_dir.exists();
        if had_previous {
            fs::rename(out_dir, &self.previous)
                .with_context(|| format!("failed to move aside {}", out_dir.display()))?;
        }
        if let Err(err) = fs::rename(&self.staging, out_dir) {
            if had_previous {
                let _ = fs::rename(&self.previous, out_dir);
            }
            return Err(err).with_context(|| format!("failed to publish {}", out_dir.display()));
        }
        if had_previous {
            if let Err(err) = fs::remove_dir_all(&self.previous) {
                warn!(
                    path = %self.previous.display(),
                    error = %err,
                    "could not remove previous output"
                );
            }
        }

        info!(
            path = %out_dir.display(),
            files = self.files,
            run_id = %self.run_id,
            "published output set"
        );
        Ok(())
    }

    pub fn discard(self) {
        warn!(path = %self.out_dir.display(), run_id = %self.run_id, "discarding staged output");
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if self.staging.exists() {
            if let Err(err) = fs::remove_dir_all(&self.staging) {
                warn!(
                    path = %self.staging.display(),
                    error = %err,
                    "could not remove staging directory"
                );
            }
        }
    }
}

fn write_staging(staging: &Path, files: &[(&str, Vec<u8>)]) -> anyhow::Result<()> {
    if staging.exists() {
        fs::remove_dir_all(staging)
            .with_context(|| format!("failed to clear {}", staging.display()))?;
    }
    fs::create_dir_all(staging)
        .with_context(|| format!("failed to create {}", staging.display()))?;
    for (name, bytes) in files {
        let path = staging.join(name);
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}
