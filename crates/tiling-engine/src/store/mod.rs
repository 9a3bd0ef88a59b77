//! Durable storage for intermediate tile results.
//!
//! A [`TileStore`] persists one tile's output so it can be dropped from
//! memory, then hands back a lazy [`TileHandle`] for the merge step. Any
//! backend that serializes writes, allows concurrent reads and can be reopened
//! as arrays can stand in for the Zarr implementation.

mod zarr_store;

pub use zarr_store::{ZarrTileHandle, ZarrTileStore};

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::partition::Tile;
use crate::types::{DataCube, TileOutput};

/// Location of one persisted tile result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileFile {
    /// Name of the tile this file holds.
    pub tile: String,
    /// Path of the file (or directory) on disk.
    pub path: PathBuf,
}

/// Lazily opened tile result. Data is read only when [`TileHandle::read`] is called.
pub trait TileHandle: Send + Sync {
    /// Name of the tile this handle was written for.
    fn tile(&self) -> &str;

    /// Output variable names, sorted.
    fn variables(&self) -> Vec<String>;

    /// `[time, row, column]` shape of a variable, from metadata only.
    fn shape(&self, variable: &str) -> Option<[usize; 3]>;

    /// Row coordinates covered by this tile.
    fn rows(&self) -> &[f64];

    /// Column coordinates covered by this tile.
    fn columns(&self) -> &[f64];

    /// Read a variable fully into memory.
    fn read(&self, variable: &str) -> Result<DataCube>;
}

/// Persistence for tile results.
pub trait TileStore: Send + Sync {
    /// Write a tile's output, along with the row/column coordinates it covers.
    ///
    /// On failure no partial file is left behind.
    fn save(
        &self,
        output: &TileOutput,
        tile: &Tile,
        rows: &[f64],
        columns: &[f64],
    ) -> Result<TileFile>;

    /// Reopen a previously saved tile without loading its data.
    fn open(&self, file: &TileFile) -> Result<Arc<dyn TileHandle>>;

    /// Remove a saved tile. Removing a file that is already gone succeeds.
    fn delete(&self, file: &TileFile) -> Result<()>;
}
