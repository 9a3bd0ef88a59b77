//! Configuration for the tiling engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::partition::SUPPORTED_TILE_COUNTS;

/// Configuration for a tiled run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilingConfig {
    /// Number of spatial tiles (1, 2, 4 or 8). Also the worker pool size.
    pub tile_count: usize,

    /// Directory that receives the temporary tile files. Must already exist.
    pub work_dir: PathBuf,

    /// Spatial chunk dimension for tile arrays (square chunks).
    pub zarr_chunk_size: usize,

    /// Compression codec for tile arrays.
    pub zarr_compression: ZarrCompression,

    /// Compression level (1-9).
    pub zarr_compression_level: u8,

    /// Enable byte shuffle filter for better compression.
    pub zarr_shuffle: bool,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_count: 4,
            work_dir: std::env::temp_dir(),
            zarr_chunk_size: 512,
            zarr_compression: ZarrCompression::None,
            zarr_compression_level: 1,
            zarr_shuffle: true,
        }
    }
}

impl TilingConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TILE_COUNT") {
            if let Ok(count) = val.parse() {
                config.tile_count = count;
            }
        }

        if let Ok(val) = std::env::var("TILE_WORK_DIR") {
            config.work_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("TILE_ZARR_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                config.zarr_chunk_size = size;
            }
        }

        if let Ok(val) = std::env::var("TILE_ZARR_COMPRESSION") {
            config.zarr_compression = ZarrCompression::from_str(&val);
        }

        if let Ok(val) = std::env::var("TILE_ZARR_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                config.zarr_compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("TILE_ZARR_SHUFFLE") {
            config.zarr_shuffle = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Use a different tile count, keeping everything else.
    pub fn with_tile_count(mut self, tile_count: usize) -> Self {
        self.tile_count = tile_count;
        self
    }

    /// Use a different work directory, keeping everything else.
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !SUPPORTED_TILE_COUNTS.contains(&self.tile_count) {
            return Err(format!(
                "tile_count must be one of {:?}, got {}",
                SUPPORTED_TILE_COUNTS, self.tile_count
            ));
        }

        if self.zarr_chunk_size == 0 {
            return Err("zarr_chunk_size must be > 0".to_string());
        }

        if self.zarr_compression_level == 0 || self.zarr_compression_level > 9 {
            return Err("zarr_compression_level must be 1-9".to_string());
        }

        Ok(())
    }
}

/// Compression codec for tile arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd.
    BloscZstd,
}

impl Default for ZarrCompression {
    fn default() -> Self {
        Self::None
    }
}

impl ZarrCompression {
    /// Parse from string (case-insensitive). Unknown values disable compression.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "lz4" | "blosc_lz4" => Self::BloscLz4,
            "zstd" | "blosc_zstd" => Self::BloscZstd,
            _ => Self::None,
        }
    }

    /// Get the codec name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
