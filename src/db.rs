use anyhow::Context;
use chrono::Utc;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use tracing::info;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::models::PressureAggregate;
use crate::pipeline::PipelineOutput;

const AGGREGATE_COLUMNS: &str = "trusts_reporting, bed_reporting, ga_open_total, \
     ga_occupied_total, occupancy_rate, cc_reporting, cc_open_total, cc_occupied_total, \
     cc_occupancy_rate, flu_occupied_total, rsv_occupied_total, high_pressure_count, \
     high_pressure_share, peak_trust_occupancy_rate, temperature_mean, precipitation_sum, \
     wind_max, trends";
const AGGREGATE_WIDTH: usize = 18;

/// `$first, $first + 1, ...` for `count` bind parameters.
fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn bind_aggregate<'q>(
    query: Query<'q, Postgres, PgArguments>,
    agg: &'q PressureAggregate,
) -> anyhow::Result<Query<'q, Postgres, PgArguments>> {
    Ok(query
        .bind(agg.trusts_reporting as i32)
        .bind(agg.bed_reporting as i32)
        .bind(agg.ga_open_total)
        .bind(agg.ga_occupied_total)
        .bind(agg.occupancy_rate)
        .bind(agg.cc_reporting as i32)
        .bind(agg.cc_open_total)
        .bind(agg.cc_occupied_total)
        .bind(agg.cc_occupancy_rate)
        .bind(agg.flu_occupied_total)
        .bind(agg.rsv_occupied_total)
        .bind(agg.high_pressure_count as i32)
        .bind(agg.high_pressure_share)
        .bind(agg.peak_trust_occupancy_rate)
        .bind(agg.temperature_mean)
        .bind(agg.precipitation_sum)
        .bind(agg.wind_max)
        .bind(serde_json::to_value(&agg.trends)?))
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Replace the run's date range in every published table inside a single
/// transaction. Readers see either the previous rows or the new ones.
pub async fn publish_run(
    pool: &PgPool,
    run_id: Uuid,
    output: &PipelineOutput,
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    let start = output.calendar.start();
    let end = output.calendar.end();
    let mut tx = pool.begin().await.context("failed to open transaction")?;

    for table in ["trust_daily", "region_daily", "system_daily", "driver_daily"] {
        let statement =
            format!("DELETE FROM winter_pressures.{table} WHERE date BETWEEN $1 AND $2");
        sqlx::query(&statement)
            .bind(start)
            .bind(end)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to clear {table}"))?;
    }

    sqlx::query(
        r#"
        INSERT INTO winter_pressures.runs
        (run_id, published_at, calendar_start, calendar_end, rolling_window_days,
         high_pressure_threshold, trust_rows, quality)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(run_id)
    .bind(Utc::now())
    .bind(start)
    .bind(end)
    .bind(config.rolling_window_days as i32)
    .bind(config.high_pressure_threshold)
    .bind(output.trust.len() as i32)
    .bind(serde_json::to_value(&output.quality)?)
    .execute(&mut *tx)
    .await?;

    for row in &output.trust {
        sqlx::query(
            r#"
            INSERT INTO winter_pressures.trust_daily
            (trust_code, date, trust_name, region, metrics, occupancy_rate, cc_occupancy_rate,
             flu_share_of_occupied, is_high_pressure, occupancy_rate_rolling,
             rolling_days_observed, lag_value, weather_site, weather_proxy_used,
             temperature_mean, precipitation_sum, wind_max, trends, scenario_surge, run_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(&row.entity_id)
        .bind(row.date)
        .bind(&row.display_name)
        .bind(&row.region)
        .bind(serde_json::to_value(&row.metrics)?)
        .bind(row.occupancy_rate)
        .bind(row.cc_occupancy_rate)
        .bind(row.flu_share_of_occupied)
        .bind(row.is_high_pressure)
        .bind(row.rolling_occupancy_rate)
        .bind(row.rolling_observations as i32)
        .bind(row.lag_value)
        .bind(&row.weather.site_id)
        .bind(row.weather.proxy_used)
        .bind(row.weather.temperature_mean)
        .bind(row.weather.precipitation_sum)
        .bind(row.weather.wind_max)
        .bind(serde_json::to_value(&row.trends)?)
        .bind(row.scenario.map(|s| s.0))
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
    }

    let region_insert = format!(
        "INSERT INTO winter_pressures.region_daily (region, date, {AGGREGATE_COLUMNS}, run_id) \
         VALUES ($1, $2, {}, ${})",
        placeholders(3, AGGREGATE_WIDTH),
        3 + AGGREGATE_WIDTH
    );
    for row in &output.regional {
        let query = sqlx::query(&region_insert).bind(&row.region).bind(row.date);
        bind_aggregate(query, &row.aggregate)?
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert {} on {}", row.region, row.date))?;
    }

    let system_insert = format!(
        "INSERT INTO winter_pressures.system_daily \
         (date, regions_reporting, {AGGREGATE_COLUMNS}, run_id) VALUES ($1, $2, {}, ${})",
        placeholders(3, AGGREGATE_WIDTH),
        3 + AGGREGATE_WIDTH
    );
    for row in &output.system {
        let query = sqlx::query(&system_insert)
            .bind(row.date)
            .bind(row.regions_reporting as i32);
        bind_aggregate(query, &row.aggregate)?
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert system row for {}", row.date))?;
    }

    for row in &output.drivers {
        sqlx::query(
            r#"
            INSERT INTO winter_pressures.driver_daily
            (region, date, ga_occupied_total, flu_occupied_total, rsv_occupied_total,
             temperature_mean, precipitation_sum, wind_max, trends, run_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&row.region)
        .bind(row.date)
        .bind(row.ga_occupied_total)
        .bind(row.flu_occupied_total)
        .bind(row.rsv_occupied_total)
        .bind(row.temperature_mean)
        .bind(row.precipitation_sum)
        .bind(row.wind_max)
        .bind(serde_json::to_value(&row.trends)?)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await.context("failed to commit run")?;
    info!(
        %run_id,
        trust_rows = output.trust.len(),
        region_rows = output.regional.len(),
        system_rows = output.system.len(),
        "published run to postgres"
    );
    Ok(())
}
