//! Runs the caller-supplied computation over one tile.

use std::time::Instant;

use crate::baseline::slice_for_tile;
use crate::error::{Result, TilingError};
use crate::partition::Tile;
use crate::types::{Grid, ThresholdSet, ThresholdSource, TileOutput};

/// A per-tile computation (the "index calculator").
///
/// Receives the tile's sub-grid and tile-local baselines and returns named
/// output arrays. Implementations are invoked concurrently from several
/// worker threads with distinct arguments.
pub trait TileComputation: Send + Sync {
    fn compute(&self, grid: &Grid, baselines: &ThresholdSet) -> anyhow::Result<TileOutput>;
}

impl<F> TileComputation for F
where
    F: Fn(&Grid, &ThresholdSet) -> anyhow::Result<TileOutput> + Send + Sync,
{
    fn compute(&self, grid: &Grid, baselines: &ThresholdSet) -> anyhow::Result<TileOutput> {
        self(grid, baselines)
    }
}

/// Execute `computation` over the part of `grid` covered by `tile`.
///
/// Output shapes are not checked here; a tile returning the wrong extents
/// surfaces as a dimension error when tiles are merged.
pub fn execute(
    grid: &Grid,
    tile: &Tile,
    baselines: &(impl ThresholdSource + ?Sized),
    computation: &(impl TileComputation + ?Sized),
) -> Result<TileOutput> {
    let started = Instant::now();
    let [_, rows, cols] = grid.shape();

    let sub_grid = grid.slice(tile)?;
    let local_baselines = slice_for_tile(baselines, tile, rows, cols)?;

    let output = computation
        .compute(&sub_grid, &local_baselines)
        .map_err(|source| TilingError::Computation {
            tile: tile.name.clone(),
            source,
        })?;

    tracing::debug!(
        tile = %tile.name,
        rows = %tile.rows,
        cols = %tile.cols,
        outputs = output.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Computed tile"
    );

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::plan;
    use crate::types::DataCube;
    use std::collections::BTreeMap;

    fn grid(rows: usize, cols: usize) -> Grid {
        let mut vars = BTreeMap::new();
        vars.insert(
            "tas".to_string(),
            DataCube::from_fn([2, rows, cols], |t, r, c| (t * 100 + r * 10 + c) as f32),
        );
        Grid::new(
            vec![0.0, 1.0],
            (0..rows).map(|r| r as f64).collect(),
            (0..cols).map(|c| c as f64).collect(),
            vars,
        )
        .unwrap()
    }

    #[test]
    fn test_execute_passes_tile_subgrid() {
        let grid = grid(4, 4);
        let set = plan(4, 4, 4).unwrap();
        let tile = set.get("southwest").unwrap();

        let computation = |g: &Grid, _: &ThresholdSet| -> anyhow::Result<TileOutput> {
            assert_eq!(g.shape(), [2, 2, 2]);
            assert_eq!(g.rows(), &[2.0, 3.0]);
            let mut out = TileOutput::new();
            out.insert("first".to_string(), g.variable("tas").unwrap().slice_spatial(0..2, 0..2)?);
            Ok(out)
        };

        let out = execute(&grid, tile, &ThresholdSet::empty(), &computation).unwrap();
        assert_eq!(out["first"].get(1, 0, 1), Some(121.0));
    }

    #[test]
    fn test_execute_wraps_computation_error() {
        let grid = grid(4, 4);
        let set = plan(4, 4, 2).unwrap();
        let computation = |_: &Grid, _: &ThresholdSet| -> anyhow::Result<TileOutput> {
            anyhow::bail!("index blew up")
        };

        let err = execute(&grid, &set.tiles()[1], &ThresholdSet::empty(), &computation).unwrap_err();
        match err {
            TilingError::Computation { tile, source } => {
                assert_eq!(tile, "east");
                assert_eq!(source.to_string(), "index blew up");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
