//! Tiled index runner.
//!
//! Builds a synthetic daily temperature grid with a day-of-year threshold set,
//! runs one index over it through the tiling engine and logs a summary of
//! every output variable.

mod indices;
mod synthetic;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use indices::{DaysAboveThreshold, TimeMean};
use tiling_engine::{
    ExpectedDims, MergedResult, TileComputation, TilingConfig, TilingOrchestrator, DIM_COLUMN,
    DIM_ROW,
};

/// Days in the threshold climatology.
const DAYS_OF_YEAR: usize = 366;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Index {
    /// Mean over time
    Mean,
    /// Days above the 90th percentile threshold
    Exceedance,
}

#[derive(Parser, Debug)]
#[command(name = "tile-runner")]
#[command(about = "Run a climate index over a synthetic grid, tile by tile")]
struct Args {
    /// Number of grid rows
    #[arg(long, default_value_t = 90)]
    rows: usize,

    /// Number of grid columns
    #[arg(long, default_value_t = 180)]
    cols: usize,

    /// Number of daily time steps
    #[arg(long, default_value_t = 365)]
    days: usize,

    /// Number of spatial tiles (1, 2, 4 or 8). Overrides TILE_COUNT.
    #[arg(short, long)]
    tiles: Option<usize>,

    /// Directory for temporary tile files. Overrides TILE_WORK_DIR.
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Index to compute
    #[arg(short, long, value_enum, default_value = "mean")]
    index: Index,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = TilingConfig::from_env();
    if let Some(tiles) = args.tiles {
        config = config.with_tile_count(tiles);
    }
    if let Some(dir) = &args.work_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create work directory {}", dir.display()))?;
        config = config.with_work_dir(dir);
    }

    info!(
        rows = args.rows,
        cols = args.cols,
        days = args.days,
        index = ?args.index,
        tile_count = config.tile_count,
        work_dir = %config.work_dir.display(),
        compression = %config.zarr_compression,
        "Starting tile runner"
    );

    let grid = Arc::new(synthetic::temperature_grid(args.rows, args.cols, args.days)?);
    let baselines = Arc::new(synthetic::thresholds(args.rows, args.cols, DAYS_OF_YEAR, 2.0));
    let computation: Arc<dyn TileComputation> = match args.index {
        Index::Mean => Arc::new(TimeMean),
        Index::Exceedance => Arc::new(DaysAboveThreshold),
    };

    let mut expected = ExpectedDims::new();
    expected.insert(DIM_ROW.to_string(), args.rows);
    expected.insert(DIM_COLUMN.to_string(), args.cols);

    let orchestrator = TilingOrchestrator::with_zarr_store(config)?
        .on_phase(|phase| tracing::debug!(phase = %phase, "Run phase"));
    let result = orchestrator.process(grid, baselines, computation, &expected)?;

    log_summary(&result);

    Ok(())
}

fn log_summary(result: &MergedResult) {
    for (name, cube) in &result.variables {
        let values: Vec<f32> = cube.as_slice().iter().copied().filter(|v| !v.is_nan()).collect();
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mean = if values.is_empty() {
            f64::NAN
        } else {
            values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len() as f64
        };

        info!(
            variable = %name,
            shape = ?cube.shape(),
            min,
            max,
            mean,
            valid = values.len(),
            "Output summary"
        );
    }

    info!(
        tile_count = result.tile_count,
        rows = result.rows.len(),
        columns = result.columns.len(),
        "Tiled run finished"
    );
}
