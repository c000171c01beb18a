use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

mod catalog;
mod config;
mod db;
mod error;
mod features;
mod geo;
mod io;
mod logging;
mod models;
mod pipeline;
mod pivot;
mod quality;
mod rates;
mod report;
mod rollup;
mod trends;

use crate::catalog::Calendar;
use crate::config::PipelineConfig;
use crate::geo::GeoProxyMap;
use crate::pipeline::{PipelineInputs, PipelineOutput};

#[derive(Parser)]
#[command(name = "winter-pressures")]
#[command(about = "Trust-level bed pressure features for winter capacity dashboards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Long-format SitRep metrics (trust_code,date,metric,value)
    #[arg(long)]
    metrics: PathBuf,
    /// Organisation catalog (trust_code,trust_name,region)
    #[arg(long)]
    organisations: PathBuf,
    /// Daily weather per city
    #[arg(long)]
    weather: PathBuf,
    /// Weekly search interest per keyword
    #[arg(long)]
    trends: PathBuf,
    /// Region → weather site table; the built-in England map when omitted
    #[arg(long)]
    geo_map: Option<PathBuf>,
    /// Pipeline settings as JSON
    #[arg(long)]
    config: Option<PathBuf>,
    /// First day of the analysis window
    #[arg(long, requires = "end")]
    start: Option<NaiveDate>,
    /// Last day of the analysis window
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the publication schema
    InitDb,
    /// Run the quality gate and feature pipeline without publishing
    Check {
        #[command(flatten)]
        inputs: InputArgs,
    },
    /// Run the pipeline and replace the published output set
    Run {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long, default_value = "outputs")]
        out: PathBuf,
        /// Also publish to Postgres (DATABASE_URL)
        #[arg(long)]
        publish: bool,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to publish to Postgres")?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn load_inputs(args: &InputArgs) -> anyhow::Result<(PipelineInputs, PipelineConfig)> {
    let config = PipelineConfig::load(args.config.as_deref())?;
    let geo = match &args.geo_map {
        Some(path) => io::load_geo_map(path)?,
        None => GeoProxyMap::england_default(),
    };
    let calendar = match (args.start, args.end) {
        (Some(start), Some(end)) => Some(Calendar::new(start, end)?),
        _ => None,
    };

    let inputs = PipelineInputs {
        metrics: io::load_metrics(&args.metrics)?,
        catalog: io::load_organisations(&args.organisations)?,
        weather: io::load_weather(&args.weather)?,
        trends: io::load_trends(&args.trends)?,
        geo,
        calendar,
    };
    Ok((inputs, config))
}

fn execute(args: &InputArgs, run_id: Uuid) -> anyhow::Result<(PipelineOutput, PipelineConfig)> {
    let (inputs, config) = load_inputs(args)?;
    let span = tracing::info_span!("pipeline_run", %run_id, geo_map = inputs.geo.version());
    let _guard = span.enter();

    match pipeline::run(&inputs, &config) {
        Ok(output) => Ok((output, config)),
        Err(err) => {
            error!(error = %err, "pipeline run aborted, nothing published");
            Err(err).context("pipeline run failed")
        }
    }
}

fn print_quality(output: &PipelineOutput) {
    let quality = &output.quality;
    println!(
        "{} trust rows, {} region rows for {} to {}.",
        output.trust.len(),
        output.regional.len(),
        output.calendar.start(),
        output.calendar.end()
    );
    println!(
        "Quality: {} duplicates, {} unrecognised records, {} zero-capacity days, {} calendar gaps.",
        quality.duplicate_metrics,
        quality.unrecognized_records,
        quality.zero_denominator_days,
        quality.calendar_gap_days
    );
    for proxy in &quality.proxy_regions {
        println!("- {} uses {} weather as a proxy", proxy.region, proxy.site_id);
    }
}

async fn run_and_publish(
    inputs: &InputArgs,
    out: &Path,
    publish: bool,
) -> anyhow::Result<()> {
    let run_id = Uuid::new_v4();
    let (output, config) = execute(inputs, run_id)?;
    let files = io::render_outputs(&output, &config)?;

    let staged = io::stage_output(out, &files, run_id)?;
    if publish {
        let pool = connect().await?;
        if let Err(err) = db::publish_run(&pool, run_id, &output, &config).await {
            staged.discard();
            return Err(err);
        }
    }
    staged.commit()?;

    print_quality(&output);
    println!("Run {run_id} written to {}.", out.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Check { inputs } => {
            let (output, _) = execute(&inputs, Uuid::new_v4())?;
            print_quality(&output);
            info!("all checks passed");
        }
        Commands::Run {
            inputs,
            out,
            publish,
        } => {
            run_and_publish(&inputs, &out, publish).await?;
        }
    }

    Ok(())
}
