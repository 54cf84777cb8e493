use clap::{Parser, Subcommand};
use cli::{SurveyConfig, AOI_GEOJSON_FILE, COVERAGE_GEOJSON_FILE, RESULTS_FILE};
use color_eyre::eyre::{eyre, Result};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{self, EnvFilter};

use aoi::{
    coverage::build_footprints,
    georef::GridElevation,
    io::{save_aois, save_coverage},
    process_survey, BatchOrchestrator, CancellationToken, DetectionConfig, Georeferencer, NeighborQuery,
    NeighborTracker, RunContext, SurveyManifest, SurveyReport,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect, georeference and map the coverage of a survey
    Process {
        /// Path to the survey configuration file (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,
        /// Keep going past the AOI ceiling without asking
        #[arg(long)]
        yes: bool,
    },
    /// List the other images that saw an AOI
    Neighbors {
        /// results.json written by `process`
        #[arg(short, long)]
        results: PathBuf,
        /// Image the AOI was detected in
        #[arg(short, long)]
        image: String,
        /// AOI number within that image
        #[arg(short, long)]
        aoi: usize,
        #[arg(long, default_value = "50")]
        max_results: usize,
    },
    /// Print the JSON schema of the survey configuration
    Schema {
        /// Only the detection section
        #[arg(long)]
        detection: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Process { config, yes } => {
            process(config, *yes).await?;
        }
        Commands::Neighbors { results, image, aoi, max_results } => {
            neighbors(results, image, *aoi, *max_results)?;
        }
        Commands::Schema { detection } => {
            let schema = if *detection {
                serde_json::to_string_pretty(&DetectionConfig::schema())?
            } else {
                serde_json::to_string_pretty(&SurveyConfig::schema())?
            };
            println!("{schema}");
        }
    }

    Ok(())
}

fn ask_to_continue(total_aois: usize, ceiling: usize) -> bool {
    eprint!("{total_aois} AOIs found, above the ceiling of {ceiling}. Continue? [y/N] ");
    let _ = std::io::stderr().flush();
    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
        Err(_) => false,
    }
}

async fn process(config_path: &Path, auto_confirm: bool) -> Result<()> {
    let config = SurveyConfig::from_file(config_path)?;
    let manifest = SurveyManifest::from_file(&config.manifest)?;
    info!("Survey: {} images from {:?}", manifest.images.len(), config.manifest);

    std::fs::create_dir_all(&config.output_dir)?;

    let georeferencer = match &config.terrain {
        Some(path) => Georeferencer::with_terrain(Arc::new(GridElevation::from_ascii_grid(path)?)),
        None => Georeferencer::flat(),
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested, finishing images in flight");
            on_ctrl_c.cancel();
        }
    });

    let ctx = RunContext::new(cancel)
        .with_progress(|done: usize, total: usize, message: &str| debug!("{message}: {done}/{total}"))
        .with_ceiling_confirmation(move |total: usize, ceiling: usize| auto_confirm || ask_to_continue(total, ceiling));

    let orchestrator = BatchOrchestrator::from_config(&config.detection, Arc::new(manifest.frame_source()))?;
    info!("{}", orchestrator.pipeline().info());

    let records = manifest.records();
    let bearing = config.bearing.clone();
    let report = tokio::task::spawn_blocking(move || {
        process_survey(&orchestrator, records, bearing.as_ref(), &georeferencer, &ctx)
    })
    .await??;

    let results_path = config.output_dir.join(RESULTS_FILE);
    std::fs::write(&results_path, serde_json::to_string_pretty(&report)?)?;
    save_aois(&report.batch.results, config.output_dir.join(AOI_GEOJSON_FILE))?;
    save_coverage(&report.coverage, config.output_dir.join(COVERAGE_GEOJSON_FILE))?;

    summarize(&report);
    info!("Results written to {:?}", config.output_dir);
    Ok(())
}

fn summarize(report: &SurveyReport) {
    let batch = &report.batch;
    info!(
        "{} images processed, {} failed, {} AOIs",
        batch.results.len(),
        batch.failures.len(),
        batch.total_aois
    );
    if !batch.pending.is_empty() {
        warn!("{} images not processed, rerun to resume", batch.pending.len());
    }
    if let Some(reason) = &report.bearings.fallback_reason {
        warn!("Track log unusable, headings inferred from GPS: {reason}");
    }
    if let Some(error) = &report.bearings.strategy_error {
        warn!("No headings recovered for {} images: {error}", report.bearings.missing.len());
    }
    for (reason, count) in report.georeference.skip_counts() {
        info!("Georeferencing skipped {count} images: {reason}");
    }
    info!(
        "Coverage: {} polygons, {:.2} ha",
        report.coverage.polygons.len(),
        report.coverage.total_area.hectares
    );
}

fn neighbors(results_path: &Path, image: &str, aoi_id: usize, max_results: usize) -> Result<()> {
    let report: SurveyReport = serde_json::from_str(&std::fs::read_to_string(results_path)?)?;
    let records = report.batch.records();

    let source_index = records
        .iter()
        .position(|r| r.id == image)
        .ok_or_else(|| eyre!("Image {image} is not in {results_path:?}"))?;
    let aoi = report.batch.results[source_index]
        .detections
        .aois
        .iter()
        .find(|a| a.id == aoi_id)
        .ok_or_else(|| eyre!("Image {image} has no AOI {aoi_id}"))?;
    let point = aoi
        .gps
        .ok_or_else(|| eyre!("AOI {aoi_id} of {image} was not georeferenced"))?
        .point;

    let ctx = RunContext::default();
    let footprints = build_footprints(&records, &report.bearings.headings, &ctx).footprints;
    let query = NeighborQuery {
        point,
        source_image: image.to_string(),
        source_index,
        source_pixel: aoi.centroid,
    };
    let search = NeighborTracker::new(&footprints)
        .with_max_results(max_results)
        .search(&query, &ctx);

    println!("{}", serde_json::to_string_pretty(&search.matches)?);
    Ok(())
}
