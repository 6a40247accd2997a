//! CLI Entry Point for rust-cal
//!
//! Provides command-line interface for:
//! - Planning the work particles of a pixel set (chunking and stages)
//! - Validating a configuration file
//! - Simulating one unit of work end to end against in-memory collaborators
//!
//! # Usage
//!
//! ```bash
//! rust-cal plan --pixels pixels.json --max-chunk 2000
//! rust-cal check-config config/cal.toml
//! rust-cal simulate --rows 20 --columns 50 --start 100 --end 199
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_cal::config::CalConfig;
use rust_cal::logging;
use rust_cal::model::{CadenceType, Pixel, PixelIndex, TargetType};
use rust_cal::pipeline::{CalPipeline, EngineVariant, ResultMode};
use rust_cal::resolver::UnitOfWork;
use rust_cal::schedule::schedule;
use rust_cal::testing::{sample_parameters, CatalogFixture, FakeEngine, FakeServices};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rust-cal")]
#[command(about = "Calibration stage orchestration: chunking, particles and output consolidation", long_about = None)]
struct Cli {
    /// Configuration file (defaults plus RUST_CAL_ environment overrides when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the particle schedule for a JSON list of [row, column] pairs
    Plan {
        /// Path to the pixel list
        #[arg(long)]
        pixels: PathBuf,

        /// Chunk size bound (defaults to module.max_calibrate_pixels)
        #[arg(long)]
        max_chunk: Option<usize>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Path to the TOML file
        path: PathBuf,
    },

    /// Run one long cadence unit of work against in-memory collaborators
    Simulate {
        /// Rows of target pixels
        #[arg(long, default_value = "10")]
        rows: i32,

        /// Columns per row
        #[arg(long, default_value = "20")]
        columns: i32,

        /// First cadence
        #[arg(long, default_value = "100")]
        start: i32,

        /// Last cadence
        #[arg(long, default_value = "149")]
        end: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::CheckConfig { path } = &cli.command {
        return check_config(path);
    }

    let config = load_config(cli.config.as_deref())?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Plan { pixels, max_chunk } => plan(&pixels, max_chunk, &config).await,
        Commands::Simulate {
            rows,
            columns,
            start,
            end,
        } => simulate(rows, columns, start, end, config).await,
        Commands::CheckConfig { .. } => Ok(()),
    }
}

fn load_config(path: Option<&Path>) -> Result<CalConfig> {
    let config = match path {
        Some(path) => CalConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CalConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    println!("Configuration OK: {}", path.display());
    println!("   Log level: {}", config.application.log_level);
    println!("   Max calibrate pixels: {}", config.module.max_calibrate_pixels);
    println!("   Max read ids: {}", config.module.max_read_ids);
    println!(
        "   Dispatch: {:?} ({} workers)",
        config.dispatch.mode,
        config.dispatch.effective_workers()
    );
    Ok(())
}

async fn plan(path: &Path, max_chunk: Option<usize>, config: &CalConfig) -> Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let coordinates: Vec<(i32, i32)> =
        serde_json::from_str(&text).context("pixel list must be a JSON array of [row, column]")?;
    let params = sample_parameters();
    let index = PixelIndex::new(
        coordinates.into_iter().map(|(row, column)| {
            Pixel::raw(params.module, params.output, TargetType::LongCadence, row, column)
        }),
        Vec::new(),
    );

    let max_chunk = max_chunk.unwrap_or(config.module.max_calibrate_pixels);
    let schedule = schedule(&index, Vec::new(), max_chunk, Arc::new(params));

    println!(
        "{} pixels, chunks of at most {} pixels, {} particles in {} stages",
        index.len(),
        max_chunk,
        schedule.total_particles,
        schedule.stages.len()
    );
    for line in schedule.layout() {
        println!("{line}");
    }
    Ok(())
}

async fn simulate(rows: i32, columns: i32, start: i32, end: i32, config: CalConfig) -> Result<()> {
    let uow = UnitOfWork {
        pipeline_task_id: 1,
        cadence_type: CadenceType::Long,
        start_cadence: start,
        end_cadence: end,
        module: 2,
        output: 1,
    };
    let fakes = FakeServices::new(CatalogFixture::long_cadence(start, end));
    let resolver = fakes.resolver(config.module.clone());
    let params = resolver.resolve(&uow, &mut fakes.clock_cache()).await?;
    fakes.seed_collateral(&params, 7);
    let coordinates: Vec<(i32, i32)> = (0..rows)
        .flat_map(|r| (0..columns).map(move |c| (300 + r, 12 + c)))
        .collect();
    fakes.seed_pixels(&params, TargetType::LongCadence, &coordinates, 7);

    let engine = FakeEngine::default();
    let mut pipeline = CalPipeline::new(fakes.services(), config);
    let summary = pipeline
        .run_unit_of_work(&uow, &engine, EngineVariant::Standard, ResultMode::Batch)
        .await?;

    println!("Simulated cadences [{start},{end}] on module 2 output 1");
    println!("   Results consolidated: {}", summary.consolidated);
    println!("   Results skipped: {}", summary.skipped);
    println!("   Series written: {}", summary.writes.series_written);
    println!("   Alerts published: {}", summary.writes.alerts_published);
    Ok(())
}
