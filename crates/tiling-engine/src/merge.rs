//! Reassemble tile results into full-domain arrays.
//!
//! Merging happens in two steps. [`merge`] only reads tile metadata: it walks
//! the tile set's concatenation tree (columns within each band, then bands
//! along rows), checks every extent, and records where each tile block lands.
//! [`LazyMerge::materialize`] then reads each block and copies it into place.
//! Tile files must stay on disk until materialization has finished.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{Result, TilingError};
use crate::partition::TileSet;
use crate::store::TileHandle;
use crate::types::{DataCube, ExpectedDims, MergedResult, DIMENSIONS, DIM_COLUMN, DIM_ROW, DIM_TIME};

/// One tile block inside a merged variable.
struct CubePart {
    handle: Arc<dyn TileHandle>,
    row_offset: usize,
    col_offset: usize,
    shape: [usize; 3],
}

/// A merged variable whose data still lives in the tile files.
pub struct LazyCube {
    shape: [usize; 3],
    parts: Vec<CubePart>,
}

impl LazyCube {
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    fn realize(&self, variable: &str) -> Result<DataCube> {
        let mut cube = DataCube::filled(self.shape, f32::NAN);
        for part in &self.parts {
            let block = part.handle.read(variable)?;
            if block.shape() != part.shape {
                return Err(TilingError::storage(format!(
                    "tile {} variable {} changed shape on read: {:?} != {:?}",
                    part.handle.tile(),
                    variable,
                    block.shape(),
                    part.shape
                )));
            }
            cube.write_block(part.row_offset, part.col_offset, &block)?;
        }
        Ok(cube)
    }
}

/// Full-domain result that has not been read into memory yet.
pub struct LazyMerge {
    variables: BTreeMap<String, LazyCube>,
    rows: Vec<f64>,
    columns: Vec<f64>,
    tile_count: usize,
}

impl LazyMerge {
    pub fn variables(&self) -> impl Iterator<Item = (&String, &LazyCube)> {
        self.variables.iter()
    }

    pub fn rows(&self) -> &[f64] {
        &self.rows
    }

    pub fn columns(&self) -> &[f64] {
        &self.columns
    }

    /// Read every tile block and build fully resident arrays.
    ///
    /// After this returns the result no longer depends on the tile files.
    pub fn materialize(self) -> Result<MergedResult> {
        let variables = self
            .variables
            .par_iter()
            .map(|(name, lazy)| Ok((name.clone(), lazy.realize(name)?)))
            .collect::<Result<BTreeMap<String, DataCube>>>()?;

        Ok(MergedResult {
            variables,
            rows: self.rows,
            columns: self.columns,
            tile_count: self.tile_count,
        })
    }
}

/// Concatenate opened tiles following `tile_set`'s concatenation tree.
///
/// `handles` is keyed by tile name and must hold exactly one entry per tile.
/// Every merged dimension is compared against `expected`; any disagreement is
/// a [`TilingError::DimensionMismatch`].
pub fn merge(
    handles: &BTreeMap<String, Arc<dyn TileHandle>>,
    tile_set: &TileSet,
    expected: &ExpectedDims,
) -> Result<LazyMerge> {
    if handles.len() != tile_set.len() {
        return Err(TilingError::TileCountMismatch {
            expected: tile_set.len(),
            actual: handles.len(),
        });
    }

    let bands = tile_set
        .bands()
        .iter()
        .map(|band| {
            band.iter()
                .map(|&i| {
                    let name = &tile_set.tiles()[i].name;
                    handles.get(name).cloned().ok_or_else(|| TilingError::TileCountMismatch {
                        expected: tile_set.len(),
                        actual: handles.len(),
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let variable_names = check_variables(&bands)?;
    let (rows, columns) = merge_coordinates(&bands)?;

    let mut variables = BTreeMap::new();
    for name in variable_names {
        let lazy = merge_variable(&name, &bands)?;

        if lazy.shape[1] != rows.len() {
            return Err(TilingError::dimension_mismatch(&name, DIM_ROW, rows.len(), lazy.shape[1]));
        }
        if lazy.shape[2] != columns.len() {
            return Err(TilingError::dimension_mismatch(
                &name,
                DIM_COLUMN,
                columns.len(),
                lazy.shape[2],
            ));
        }

        for (dim, &want) in expected {
            let axis = DIMENSIONS
                .iter()
                .position(|d| d == dim)
                .ok_or_else(|| TilingError::MissingDimension(dim.clone()))?;
            if lazy.shape[axis] != want {
                return Err(TilingError::dimension_mismatch(&name, dim.as_str(), want, lazy.shape[axis]));
            }
        }

        variables.insert(name, lazy);
    }

    tracing::debug!(
        tiles = tile_set.len(),
        variables = variables.len(),
        rows = rows.len(),
        columns = columns.len(),
        "Merged tile metadata"
    );

    Ok(LazyMerge {
        variables,
        rows,
        columns,
        tile_count: tile_set.len(),
    })
}

/// All tiles must expose the same variables. Returns the shared set.
fn check_variables(bands: &[Vec<Arc<dyn TileHandle>>]) -> Result<Vec<String>> {
    let mut all = bands.iter().flatten();
    let first = match all.next() {
        Some(handle) => handle.variables(),
        None => return Ok(Vec::new()),
    };

    for handle in bands.iter().flatten() {
        let vars = handle.variables();
        if let Some(missing) = first.iter().find(|v| !vars.contains(v)) {
            return Err(TilingError::VariableMismatch {
                tile: handle.tile().to_string(),
                variable: missing.clone(),
            });
        }
        if let Some(extra) = vars.iter().find(|v| !first.contains(v)) {
            return Err(TilingError::VariableMismatch {
                tile: handle.tile().to_string(),
                variable: extra.clone(),
            });
        }
    }

    Ok(first)
}

/// Row coordinates come from each band's first tile, column coordinates from
/// the first band. Every band must agree on its columns.
fn merge_coordinates(bands: &[Vec<Arc<dyn TileHandle>>]) -> Result<(Vec<f64>, Vec<f64>)> {
    let band_columns = |band: &Vec<Arc<dyn TileHandle>>| -> Vec<f64> {
        band.iter().flat_map(|h| h.columns().iter().copied()).collect()
    };

    let columns = bands.first().map(band_columns).unwrap_or_default();
    let mut rows = Vec::new();
    for band in bands {
        let this_columns = band_columns(band);
        if this_columns.len() != columns.len() {
            return Err(TilingError::dimension_mismatch(
                "coordinates",
                DIM_COLUMN,
                columns.len(),
                this_columns.len(),
            ));
        }
        if this_columns != columns {
            return Err(TilingError::config("row bands disagree on column coordinates"));
        }

        if let Some(first) = band.first() {
            for other in &band[1..] {
                if other.rows() != first.rows() {
                    return Err(TilingError::config(format!(
                        "tiles {} and {} disagree on row coordinates",
                        first.tile(),
                        other.tile()
                    )));
                }
            }
            rows.extend_from_slice(first.rows());
        }
    }

    Ok((rows, columns))
}

/// Concatenate one variable: columns inside each band, then bands along rows.
fn merge_variable(name: &str, bands: &[Vec<Arc<dyn TileHandle>>]) -> Result<LazyCube> {
    let mut parts = Vec::new();
    let mut merged: Option<[usize; 3]> = None;

    for band in bands {
        let row_offset = merged.map(|s| s[1]).unwrap_or(0);
        let mut band_shape: Option<[usize; 3]> = None;

        for handle in band {
            let shape = handle.shape(name).ok_or_else(|| TilingError::VariableMismatch {
                tile: handle.tile().to_string(),
                variable: name.to_string(),
            })?;

            let col_offset = match band_shape {
                None => {
                    band_shape = Some(shape);
                    0
                }
                Some(ref mut acc) => {
                    expect_dim(name, DIM_TIME, acc[0], shape[0])?;
                    expect_dim(name, DIM_ROW, acc[1], shape[1])?;
                    let offset = acc[2];
                    acc[2] += shape[2];
                    offset
                }
            };

            parts.push(CubePart {
                handle: Arc::clone(handle),
                row_offset,
                col_offset,
                shape,
            });
        }

        if let Some(band_shape) = band_shape {
            merged = Some(match merged {
                None => band_shape,
                Some(acc) => {
                    expect_dim(name, DIM_TIME, acc[0], band_shape[0])?;
                    expect_dim(name, DIM_COLUMN, acc[2], band_shape[2])?;
                    [acc[0], acc[1] + band_shape[1], acc[2]]
                }
            });
        }
    }

    Ok(LazyCube {
        shape: merged.unwrap_or([0, 0, 0]),
        parts,
    })
}

fn expect_dim(variable: &str, dim: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(TilingError::dimension_mismatch(variable, dim, expected, actual));
    }
    Ok(())
}
