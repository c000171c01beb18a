use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::catalog::{Calendar, OrganisationCatalog};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::features::{self, FeatureContext, WeatherIndex};
use crate::geo::GeoProxyMap;
use crate::models::{
    DriverRecord, EnrichedFeatureRecord, MetricRecord, RegionalSummary, SystemSummary,
    TrendObservation, WeatherObservation,
};
use crate::pivot;
use crate::quality::{self, QualityReport};
use crate::rollup;
use crate::trends::{ExpandedTrends, TrendIndex};

/// Fully materialised inputs for one run.
pub struct PipelineInputs {
    pub metrics: Vec<MetricRecord>,
    pub catalog: OrganisationCatalog,
    pub weather: Vec<WeatherObservation>,
    pub trends: Vec<TrendObservation>,
    pub geo: GeoProxyMap,
    /// Derived from the metric dates when not given.
    pub calendar: Option<Calendar>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub calendar: Calendar,
    pub trust: Vec<EnrichedFeatureRecord>,
    pub regional: Vec<RegionalSummary>,
    pub system: Vec<SystemSummary>,
    pub drivers: Vec<DriverRecord>,
    pub quality: QualityReport,
}

/// Pivot, gate, enrich and roll up. Nothing is returned unless every step
/// succeeds.
pub fn run(
    inputs: &PipelineInputs,
    config: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    let pivoted = pivot::pivot_metrics(&inputs.metrics, &config.recognized_metrics);

    let calendar = match &inputs.calendar {
        Some(calendar) => calendar.clone(),
        None => Calendar::spanning(pivoted.records.iter().map(|r| r.date))?,
    };

    quality::check_inputs(&pivoted.records, &inputs.catalog, &calendar, &inputs.geo)?;
    let trend_index = TrendIndex::build(&inputs.trends)?;
    let observed: BTreeSet<&str> = trend_index.keywords().collect();
    for keyword in &config.trend_keywords {
        if !observed.contains(keyword.as_str()) {
            warn!(keyword = %keyword, "no trend observations for configured keyword");
        }
    }
    let dates: Vec<_> = calendar.dates().collect();
    let expanded = ExpandedTrends::from_index(
        &trend_index,
        config.trend_keywords.iter().map(String::as_str),
        &dates,
    );
    let weather_index = WeatherIndex::new(inputs.weather.iter().cloned());

    let ctx = FeatureContext {
        catalog: &inputs.catalog,
        geo: &inputs.geo,
        weather: &weather_index,
        trends: &expanded,
        config,
    };
    let trust = features::compose_features(&pivoted.records, &ctx)?;

    let regional = rollup::regional_summaries(&trust, &config.trend_keywords);
    let system = rollup::system_summaries(&trust, &config.trend_keywords);
    let drivers = rollup::driver_records(&regional);

    let regions_in_use: BTreeSet<&str> =
        trust.iter().map(|r| r.region.as_str()).collect();
    let proxies = inputs.geo.proxies_in_use(regions_in_use);
    let quality = QualityReport::build(
        &pivoted,
        &trust,
        &inputs.catalog,
        &calendar,
        &inputs.geo,
        weather_index.duplicates(),
        proxies,
    );

    info!(
        start = %calendar.start(),
        end = %calendar.end(),
        trust_rows = trust.len(),
        region_rows = regional.len(),
        duplicates = quality.duplicate_metrics,
        "pipeline run complete"
    );

    Ok(PipelineOutput {
        calendar,
        trust,
        regional,
        system,
        drivers,
        quality,
    })
}
