//! Synthetic inputs for the runner.
//!
//! The temperature field follows an annual cycle on top of a north-south
//! gradient, with a small deterministic per-cell wobble. The thresholds use the
//! same cycle without the wobble, shifted up by a margin.

use std::collections::BTreeMap;
use std::f32::consts::PI;

use anyhow::Result;
use tiling_engine::{DataCube, Grid, ThresholdSet};

use crate::indices::{INPUT_VARIABLE, THRESHOLD_VARIABLE};

/// Grid spacing in degrees.
const RESOLUTION: f64 = 0.25;

/// Annual cycle, peaking in late July.
fn season(day: usize) -> f32 {
    (2.0 * PI * (day as f32 - 110.0) / 365.0).sin()
}

/// Baseline temperature in Kelvin for a row; warmer towards the south.
fn climatology(day: usize, row: usize, rows: usize) -> f32 {
    265.0 + row as f32 / rows.max(1) as f32 * 30.0 + season(day) * 12.0
}

/// Daily `tas` series over a `rows x cols` grid anchored in the north-west corner.
pub fn temperature_grid(rows: usize, cols: usize, days: usize) -> Result<Grid> {
    let tas = DataCube::from_fn([days, rows, cols], |day, row, col| {
        let wobble = (((col * 7 + row * 13 + day * 3) % 11) as f32 - 5.0) * 0.1;
        climatology(day, row, rows) + wobble
    });

    let mut variables = BTreeMap::new();
    variables.insert(INPUT_VARIABLE.to_string(), tas);

    let grid = Grid::new(
        axis(days, 0.0, 1.0),
        axis(rows, 90.0 - RESOLUTION / 2.0, -RESOLUTION),
        axis(cols, -180.0 + RESOLUTION / 2.0, RESOLUTION),
        variables,
    )?;
    Ok(grid)
}

/// Day-of-year thresholds `margin` Kelvin above the climatology.
pub fn thresholds(rows: usize, cols: usize, days_of_year: usize, margin: f32) -> ThresholdSet {
    let p90 = DataCube::from_fn([days_of_year, rows, cols], |day, row, _| {
        climatology(day, row, rows) + margin
    });

    let mut variables = BTreeMap::new();
    variables.insert(THRESHOLD_VARIABLE.to_string(), p90);
    ThresholdSet::new(variables)
}

fn axis(len: usize, start: f64, step: f64) -> Vec<f64> {
    (0..len).map(|i| start + i as f64 * step).collect()
}
