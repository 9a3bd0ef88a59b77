//! Error types for the tiling engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while planning, executing, storing or merging tiles.
///
/// Every variant is fatal for the run that produced it. Nothing is retried
/// automatically.
#[derive(Error, Debug)]
pub enum TilingError {
    /// Malformed input or settings (unsupported tile count, inconsistent grid, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The spatial domain has no rows or no columns.
    #[error("empty spatial domain: {rows} rows x {cols} columns")]
    EmptyDomain { rows: usize, cols: usize },

    /// A dimension name is not one the engine knows about.
    #[error("unknown or missing dimension: {0}")]
    MissingDimension(String),

    /// The caller-supplied computation failed for a tile.
    #[error("computation failed for tile {tile}: {source}")]
    Computation {
        tile: String,
        #[source]
        source: anyhow::Error,
    },

    /// Writing a tile file failed. The partial file has already been removed.
    #[error("failed to write tile file {path:?}: {source}")]
    StorageExhausted {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Opening or reading back a tile file failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The number of recorded tile files differs from the planned tile count.
    #[error("expected {expected} tile files but {actual} were recorded")]
    TileCountMismatch { expected: usize, actual: usize },

    /// A merged dimension disagrees with the expected size.
    #[error("dimension mismatch for {variable}.{dimension}: expected {expected}, got {actual}")]
    DimensionMismatch {
        variable: String,
        dimension: String,
        expected: usize,
        actual: usize,
    },

    /// A tile produced a different set of output variables than its siblings.
    #[error("tile {tile} does not agree on output variable {variable}")]
    VariableMismatch { tile: String, variable: String },
}

impl TilingError {
    /// Create a Configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a Storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch(
        variable: impl Into<String>,
        dimension: impl Into<String>,
        expected: usize,
        actual: usize,
    ) -> Self {
        Self::DimensionMismatch {
            variable: variable.into(),
            dimension: dimension.into(),
            expected,
            actual,
        }
    }

    /// Name of the tile whose computation failed, if this is a computation error.
    pub fn failed_tile(&self) -> Option<&str> {
        match self {
            Self::Computation { tile, .. } => Some(tile),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TilingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type for tiling engine operations.
pub type Result<T> = std::result::Result<T, TilingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_names_both_values() {
        let err = TilingError::dimension_mismatch("tmax", "row", 999, 100);
        let msg = err.to_string();
        assert!(msg.contains("999"));
        assert!(msg.contains("100"));
        assert!(msg.contains("row"));
    }

    #[test]
    fn test_computation_error_keeps_source() {
        let err = TilingError::Computation {
            tile: "northeast".to_string(),
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(err.failed_tile(), Some("northeast"));
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "boom");
    }
}
