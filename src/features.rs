use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

use crate::catalog::OrganisationCatalog;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::geo::GeoProxyMap;
use crate::models::{
    EnrichedFeatureRecord, Metric, Scenario, WeatherContext, WeatherObservation, WideDailyRecord,
};
use crate::rates;
use crate::trends::ExpandedTrends;

/// Weather observations keyed by (site, date). The first observation for a
/// key wins; later ones are counted as duplicates.
#[derive(Debug, Clone, Default)]
pub struct WeatherIndex {
    observations: HashMap<(String, NaiveDate), WeatherObservation>,
    duplicates: usize,
}

impl WeatherIndex {
    pub fn new(observations: impl IntoIterator<Item = WeatherObservation>) -> Self {
        let mut index = Self::default();
        for obs in observations {
            match index.observations.entry((obs.site_id.clone(), obs.date)) {
                Entry::Occupied(_) => {
                    warn!(
                        site = %obs.site_id,
                        date = %obs.date,
                        "duplicate weather observation ignored"
                    );
                    index.duplicates += 1;
                }
                Entry::Vacant(slot) => {
                    slot.insert(obs);
                }
            }
        }
        index
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn get(&self, site_id: &str, date: NaiveDate) -> Option<&WeatherObservation> {
        self.observations.get(&(site_id.to_string(), date))
    }
}

/// Shared lookups for one composition pass.
pub struct FeatureContext<'a> {
    pub catalog: &'a OrganisationCatalog,
    pub geo: &'a GeoProxyMap,
    pub weather: &'a WeatherIndex,
    pub trends: &'a ExpandedTrends,
    pub config: &'a PipelineConfig,
}

/// Enrich every wide record. Each entity's series is materialised and sorted
/// before the rolling mean and lag are taken; output is ordered by entity then
/// date.
pub fn compose_features(
    records: &[WideDailyRecord],
    ctx: &FeatureContext<'_>,
) -> Result<Vec<EnrichedFeatureRecord>, PipelineError> {
    let mut by_entity: BTreeMap<&str, Vec<&WideDailyRecord>> = BTreeMap::new();
    for record in records {
        by_entity.entry(record.entity_id.as_str()).or_default().push(record);
    }

    let mut enriched = Vec::with_capacity(records.len());
    for (entity_id, mut series) in by_entity {
        series.sort_by_key(|record| record.date);
        enriched.extend(compose_entity(entity_id, &series, ctx)?);
    }

    debug!(rows = enriched.len(), "composed trust features");
    Ok(enriched)
}

fn compose_entity(
    entity_id: &str,
    series: &[&WideDailyRecord],
    ctx: &FeatureContext<'_>,
) -> Result<Vec<EnrichedFeatureRecord>, PipelineError> {
    let entity = ctx
        .catalog
        .get(entity_id)
        .ok_or_else(|| PipelineError::UnknownEntity {
            entity_ids: vec![entity_id.to_string()],
        })?;
    let site = ctx.geo.resolve(&entity.region)?;

    let rates: Vec<Option<f64>> = series
        .iter()
        .map(|record| {
            rates::reported_rate(record.get(Metric::GaOccupied), record.get(Metric::GaOpen))
        })
        .collect();

    let window = i64::from(ctx.config.rolling_window_days);
    let lag = Duration::days(i64::from(ctx.config.lag_days));

    let mut rows = Vec::with_capacity(series.len());
    let mut window_start = 0usize;
    for (idx, record) in series.iter().enumerate() {
        let earliest = record.date - Duration::days(window - 1);
        while series[window_start].date < earliest {
            window_start += 1;
        }
        let (rolling_occupancy_rate, rolling_observations) =
            mean(rates[window_start..=idx].iter().flatten().copied());

        let lag_value = series
            .binary_search_by_key(&(record.date - lag), |r| r.date)
            .ok()
            .and_then(|pos| series[pos].get(ctx.config.lag_metric));

        let occupancy_rate = rates[idx];
        let is_high_pressure =
            occupancy_rate.is_some_and(|rate| rate > ctx.config.high_pressure_threshold);

        let observation = ctx.weather.get(site.site_id, record.date);
        let weather = WeatherContext {
            site_id: site.site_id.to_string(),
            proxy_used: site.proxy_used,
            temperature_mean: observation.and_then(|o| o.temperature_mean),
            precipitation_sum: observation.and_then(|o| o.precipitation_sum),
            wind_max: observation.and_then(|o| o.wind_max),
        };

        let trends = ctx
            .config
            .trend_keywords
            .iter()
            .map(|keyword| (keyword.clone(), ctx.trends.value_at(keyword, record.date)))
            .collect();

        let scenario = record
            .get(ctx.config.scenario_metric)
            .map(|value| Scenario(value * ctx.config.scenario_multiplier));

        rows.push(EnrichedFeatureRecord {
            entity_id: entity.id.clone(),
            display_name: entity.display_name.clone(),
            region: entity.region.clone(),
            date: record.date,
            metrics: record.values.clone(),
            occupancy_rate,
            cc_occupancy_rate: rates::reported_rate(
                record.get(Metric::CcOccupied),
                record.get(Metric::CcOpen),
            ),
            flu_share_of_occupied: rates::reported_rate(
                record.get(Metric::FluOccupied),
                record.get(Metric::GaOccupied),
            ),
            is_high_pressure,
            rolling_occupancy_rate,
            rolling_observations,
            lag_value,
            weather,
            trends,
            scenario,
        });
    }
    Ok(rows)
}

fn mean(values: impl Iterator<Item = f64>) -> (Option<f64>, usize) {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        (None, 0)
    } else {
        (Some(sum / count as f64), count)
    }
}
