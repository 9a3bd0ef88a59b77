//! Tile-local copies of the shared threshold arrays.
//!
//! Every tile worker receives its own [`ThresholdSet`] restricted to the
//! tile's extents. The shared source is only ever read, and the read-then-copy
//! runs under one process-wide lock so concurrent workers always see a
//! consistent snapshot.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;

use crate::error::{Result, TilingError};
use crate::partition::Tile;
use crate::types::{DataCube, ThresholdSet, ThresholdSource};

/// Guards read-then-copy of shared threshold arrays.
static BASELINE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Copy every threshold array in `source`, restricted to `tile`.
///
/// `rows`/`cols` are the full domain sizes used to resolve the tile's
/// unbounded ranges. An empty source yields an empty set.
pub fn slice_for_tile(
    source: &(impl ThresholdSource + ?Sized),
    tile: &Tile,
    rows: usize,
    cols: usize,
) -> Result<ThresholdSet> {
    if source.is_empty() {
        return Ok(ThresholdSet::empty());
    }

    let (row_range, col_range) = tile.extents(rows, cols);

    let _guard = BASELINE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let variables: BTreeMap<String, DataCube> = source
        .names()
        .into_iter()
        .map(|name| {
            let cube = source.slice(&name, row_range.clone(), col_range.clone())?;
            Ok((name, cube))
        })
        .collect::<Result<_>>()?;

    tracing::trace!(tile = %tile.name, "Sliced baselines for tile");

    Ok(ThresholdSet::new(variables))
}

/// Check that every threshold array spans the full `rows x cols` domain.
pub fn validate_baselines(
    source: &(impl ThresholdSource + ?Sized),
    rows: usize,
    cols: usize,
) -> Result<()> {
    for name in source.names() {
        match source.spatial_shape(&name) {
            Some(shape) if shape == (rows, cols) => {}
            Some((r, c)) => {
                return Err(TilingError::config(format!(
                    "threshold array {} is {}x{}, grid is {}x{}",
                    name, r, c, rows, cols
                )))
            }
            None => {
                return Err(TilingError::config(format!(
                    "threshold array {} is listed but not readable",
                    name
                )))
            }
        }
    }
    Ok(())
}
