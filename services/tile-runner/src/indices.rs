//! Example per-tile computations.
//!
//! Both indices reduce the time axis, so every output has shape
//! `[1, row, column]`.

use anyhow::{anyhow, Context, Result};
use tiling_engine::{DataCube, Grid, ThresholdSet, TileComputation, TileOutput};

/// Input variable both indices read.
pub const INPUT_VARIABLE: &str = "tas";

/// Threshold array read by [`DaysAboveThreshold`].
pub const THRESHOLD_VARIABLE: &str = "tas_p90";

/// Mean of the input variable over time.
pub struct TimeMean;

impl TileComputation for TimeMean {
    fn compute(&self, grid: &Grid, _baselines: &ThresholdSet) -> Result<TileOutput> {
        let tas = input(grid)?;
        let [t, r, c] = tas.shape();
        if t == 0 {
            return Err(anyhow!("{} has no time steps", INPUT_VARIABLE));
        }

        let mean = DataCube::from_fn([1, r, c], |_, ri, ci| {
            let sum: f64 = (0..t)
                .filter_map(|ti| tas.get(ti, ri, ci))
                .map(f64::from)
                .sum();
            (sum / t as f64) as f32
        });

        let mut out = TileOutput::new();
        out.insert(format!("{}_mean", INPUT_VARIABLE), mean);
        Ok(out)
    }
}

/// Number of days the input exceeds its day-of-year threshold.
///
/// Day `i` of the series is compared against threshold day `i % days_of_year`.
pub struct DaysAboveThreshold;

impl TileComputation for DaysAboveThreshold {
    fn compute(&self, grid: &Grid, baselines: &ThresholdSet) -> Result<TileOutput> {
        let tas = input(grid)?;
        let threshold = baselines
            .get(THRESHOLD_VARIABLE)
            .with_context(|| format!("threshold array {} not provided", THRESHOLD_VARIABLE))?;

        let [t, r, c] = tas.shape();
        let days_of_year = threshold.times();
        if days_of_year == 0 {
            return Err(anyhow!("threshold array {} is empty", THRESHOLD_VARIABLE));
        }

        let count = DataCube::from_fn([1, r, c], |_, ri, ci| {
            (0..t)
                .filter(|&ti| {
                    match (tas.get(ti, ri, ci), threshold.get(ti % days_of_year, ri, ci)) {
                        (Some(v), Some(limit)) => v > limit,
                        _ => false,
                    }
                })
                .count() as f32
        });

        let mut out = TileOutput::new();
        out.insert(format!("{}_days_above_p90", INPUT_VARIABLE), count);
        Ok(out)
    }
}

fn input(grid: &Grid) -> Result<&DataCube> {
    grid.variable(INPUT_VARIABLE)
        .with_context(|| format!("grid has no {} variable", INPUT_VARIABLE))
}
