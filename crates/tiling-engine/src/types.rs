//! Core data types: cubes, grids, threshold sets and results.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{Result, TilingError};
use crate::partition::Tile;

/// Name of the leading (time or day-of-year) axis.
pub const DIM_TIME: &str = "time";
/// Name of the row axis.
pub const DIM_ROW: &str = "row";
/// Name of the column axis.
pub const DIM_COLUMN: &str = "column";

/// Dimension names in storage order.
pub const DIMENSIONS: [&str; 3] = [DIM_TIME, DIM_ROW, DIM_COLUMN];

/// Expected merged sizes keyed by dimension name.
pub type ExpectedDims = BTreeMap<String, usize>;

/// Named output arrays produced by a computation for one tile.
pub type TileOutput = BTreeMap<String, DataCube>;

/// Dense `f32` array shaped `[time, row, column]`.
///
/// Values are stored time-major, then row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DataCube {
    shape: [usize; 3],
    data: Vec<f32>,
}

impl DataCube {
    /// Wrap a flat buffer. The buffer length must match the shape.
    pub fn new(shape: [usize; 3], data: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(TilingError::config(format!(
                "cube of shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// A cube with every value set to `value`.
    pub fn filled(shape: [usize; 3], value: f32) -> Self {
        Self {
            shape,
            data: vec![value; shape.iter().product()],
        }
    }

    /// Build a cube by evaluating `f(t, row, col)` at every position.
    pub fn from_fn(shape: [usize; 3], mut f: impl FnMut(usize, usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(shape.iter().product());
        for t in 0..shape[0] {
            for r in 0..shape[1] {
                for c in 0..shape[2] {
                    data.push(f(t, r, c));
                }
            }
        }
        Self { shape, data }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn times(&self) -> usize {
        self.shape[0]
    }

    pub fn rows(&self) -> usize {
        self.shape[1]
    }

    pub fn cols(&self) -> usize {
        self.shape[2]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Get the value at `(t, row, col)`.
    pub fn get(&self, t: usize, row: usize, col: usize) -> Option<f32> {
        if t >= self.shape[0] || row >= self.shape[1] || col >= self.shape[2] {
            return None;
        }
        self.data.get(self.index(t, row, col)).copied()
    }

    fn index(&self, t: usize, row: usize, col: usize) -> usize {
        (t * self.shape[1] + row) * self.shape[2] + col
    }

    /// Copy out the spatial window `rows x cols`, keeping every time step.
    pub fn slice_spatial(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Self> {
        if rows.end > self.shape[1] || cols.end > self.shape[2] || rows.start > rows.end || cols.start > cols.end {
            return Err(TilingError::config(format!(
                "window rows {:?} x cols {:?} is outside cube shape {:?}",
                rows, cols, self.shape
            )));
        }

        let out_rows = rows.len();
        let out_cols = cols.len();
        let mut data = Vec::with_capacity(self.shape[0] * out_rows * out_cols);
        for t in 0..self.shape[0] {
            for r in rows.clone() {
                let start = self.index(t, r, cols.start);
                data.extend_from_slice(&self.data[start..start + out_cols]);
            }
        }

        Ok(Self {
            shape: [self.shape[0], out_rows, out_cols],
            data,
        })
    }

    /// Copy `block` into this cube with its origin at `(row_offset, col_offset)`.
    ///
    /// The block must have the same time extent and fit inside this cube.
    pub fn write_block(&mut self, row_offset: usize, col_offset: usize, block: &DataCube) -> Result<()> {
        let [t, r, c] = block.shape;
        if t != self.shape[0] || row_offset + r > self.shape[1] || col_offset + c > self.shape[2] {
            return Err(TilingError::config(format!(
                "block {:?} at ({}, {}) does not fit cube {:?}",
                block.shape, row_offset, col_offset, self.shape
            )));
        }

        for ti in 0..t {
            for ri in 0..r {
                let src = (ti * r + ri) * c;
                let dst = self.index(ti, row_offset + ri, col_offset);
                self.data[dst..dst + c].copy_from_slice(&block.data[src..src + c]);
            }
        }
        Ok(())
    }
}

/// A labeled `time x row x column` dataset with one or more named variables.
///
/// All variables share the same shape and coordinates.
#[derive(Debug, Clone)]
pub struct Grid {
    time: Vec<f64>,
    rows: Vec<f64>,
    columns: Vec<f64>,
    variables: BTreeMap<String, DataCube>,
}

impl Grid {
    /// Create a grid, checking that every variable matches the coordinate lengths.
    pub fn new(
        time: Vec<f64>,
        rows: Vec<f64>,
        columns: Vec<f64>,
        variables: BTreeMap<String, DataCube>,
    ) -> Result<Self> {
        let shape = [time.len(), rows.len(), columns.len()];
        for (name, cube) in &variables {
            if cube.shape() != shape {
                return Err(TilingError::config(format!(
                    "variable {} has shape {:?}, grid coordinates imply {:?}",
                    name,
                    cube.shape(),
                    shape
                )));
            }
        }

        Ok(Self {
            time,
            rows,
            columns,
            variables,
        })
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn rows(&self) -> &[f64] {
        &self.rows
    }

    pub fn columns(&self) -> &[f64] {
        &self.columns
    }

    pub fn variables(&self) -> &BTreeMap<String, DataCube> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&DataCube> {
        self.variables.get(name)
    }

    /// Shape shared by every variable.
    pub fn shape(&self) -> [usize; 3] {
        [self.time.len(), self.rows.len(), self.columns.len()]
    }

    /// Sub-grid restricted to a tile's row/column extents, all time steps kept.
    pub fn slice(&self, tile: &Tile) -> Result<Grid> {
        let rows = tile.rows.resolve(self.rows.len());
        let cols = tile.cols.resolve(self.columns.len());

        let variables = self
            .variables
            .iter()
            .map(|(name, cube)| Ok((name.clone(), cube.slice_spatial(rows.clone(), cols.clone())?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Grid {
            time: self.time.clone(),
            rows: self.rows[rows].to_vec(),
            columns: self.columns[cols].to_vec(),
            variables,
        })
    }
}

/// Per-day-of-year reference arrays shaped `[day_of_year, row, column]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdSet {
    variables: BTreeMap<String, DataCube>,
}

impl ThresholdSet {
    pub fn new(variables: BTreeMap<String, DataCube>) -> Self {
        Self { variables }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&DataCube> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> &BTreeMap<String, DataCube> {
        &self.variables
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Read-only access to threshold arrays.
///
/// The baseline slice provider only ever reads through this trait, so a
/// shared source can be handed to every tile worker at once.
pub trait ThresholdSource: Send + Sync {
    /// Names of the available threshold arrays.
    fn names(&self) -> Vec<String>;

    /// `(rows, columns)` of the named array.
    fn spatial_shape(&self, name: &str) -> Option<(usize, usize)>;

    /// Copy of the named array restricted to `rows x cols`.
    fn slice(&self, name: &str, rows: Range<usize>, cols: Range<usize>) -> Result<DataCube>;

    fn is_empty(&self) -> bool {
        self.names().is_empty()
    }
}

impl ThresholdSource for ThresholdSet {
    fn names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    fn spatial_shape(&self, name: &str) -> Option<(usize, usize)> {
        self.variables.get(name).map(|c| (c.rows(), c.cols()))
    }

    fn slice(&self, name: &str, rows: Range<usize>, cols: Range<usize>) -> Result<DataCube> {
        self.variables
            .get(name)
            .ok_or_else(|| TilingError::config(format!("unknown threshold array {}", name)))?
            .slice_spatial(rows, cols)
    }

    fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Fully realized, full-domain output of a tiled run.
#[derive(Debug, Clone)]
pub struct MergedResult {
    pub variables: BTreeMap<String, DataCube>,
    pub rows: Vec<f64>,
    pub columns: Vec<f64>,
    pub tile_count: usize,
}

impl MergedResult {
    pub fn get(&self, name: &str) -> Option<&DataCube> {
        self.variables.get(name)
    }
}

/// Check that every expected dimension name is one the engine knows.
pub fn validate_expected_dims(expected: &ExpectedDims) -> Result<()> {
    for name in expected.keys() {
        if !DIMENSIONS.contains(&name.as_str()) {
            return Err(TilingError::MissingDimension(format!(
                "{} (known dimensions: {:?})",
                name, DIMENSIONS
            )));
        }
    }
    Ok(())
}
