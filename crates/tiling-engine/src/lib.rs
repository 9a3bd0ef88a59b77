//! Spatial tiling engine for gridded `time x row x column` datasets.
//!
//! A large grid is split into up to eight spatial tiles, each tile is handed
//! to a caller-supplied computation on a bounded worker pool, every tile
//! result is written to a temporary Zarr store, and the tiles are then merged
//! back into one full-domain result. The merged result is identical to what
//! the computation would produce over the whole grid at once.
//!
//! # Architecture
//!
//! ```text
//! TilingOrchestrator::process(grid, baselines, computation)
//!      │
//!      ├─► plan(rows, cols, tile_count) ──► TileSet
//!      │
//!      ├─► per tile, on the worker pool:
//!      │        slice_for_tile(baselines)   (tile-local copy, shared lock)
//!      │        execute(grid, tile, ...)    (caller computation)
//!      │        TileStore::save(...)        (serialized writes)
//!      │
//!      ├─► merge(handles, tile_set, expected_dims)   (metadata only)
//!      │
//!      ├─► LazyMerge::materialize()                  (read tile blocks)
//!      │
//!      └─► delete tile files ──► MergedResult
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tiling_engine::{process_tiled, ExpectedDims, ThresholdSet};
//!
//! let result = process_tiled(
//!     Arc::new(grid),
//!     Arc::new(ThresholdSet::empty()),
//!     Arc::new(my_index),
//!     4,
//!     work_dir.path(),
//!     &ExpectedDims::new(),
//! )?;
//! ```

pub mod baseline;
pub mod config;
pub mod error;
pub mod executor;
pub mod merge;
pub mod orchestrator;
pub mod partition;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use baseline::slice_for_tile;
pub use config::{TilingConfig, ZarrCompression};
pub use error::{Result, TilingError};
pub use executor::{execute, TileComputation};
pub use merge::{merge, LazyCube, LazyMerge};
pub use orchestrator::{process_tiled, PhaseObserver, RunPhase, TilingOrchestrator};
pub use partition::{plan, AxisRange, Tile, TileSet, SUPPORTED_TILE_COUNTS};
pub use store::{TileFile, TileHandle, TileStore, ZarrTileHandle, ZarrTileStore};
pub use types::{
    DataCube, ExpectedDims, Grid, MergedResult, ThresholdSet, ThresholdSource, TileOutput,
    DIMENSIONS, DIM_COLUMN, DIM_ROW, DIM_TIME,
};
