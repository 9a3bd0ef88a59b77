//! Zarr V3 tile store on the local filesystem.
//!
//! Each tile becomes one Zarr hierarchy:
//!
//! ```text
//! tile-{run_token}-{tile}.zarr/
//!   zarr.json           root group: tile name, variable list, row/column coords
//!   {variable}/         one float32 array per output, shape [time, row, column]
//! ```

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::{Group, GroupBuilder};
use zarrs_filesystem::FilesystemStore;

use super::{TileFile, TileHandle, TileStore};
use crate::config::{TilingConfig, ZarrCompression};
use crate::error::{Result, TilingError};
use crate::partition::Tile;
use crate::types::{DataCube, TileOutput};

type BoxError = Box<dyn StdError + Send + Sync>;

/// Serializes every tile write in the process.
static WRITE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Tile store writing one Zarr hierarchy per tile into a run directory.
pub struct ZarrTileStore {
    dir: PathBuf,
    run_token: String,
    config: TilingConfig,
}

impl ZarrTileStore {
    /// Create a store writing into `dir`, which must already exist.
    ///
    /// Every store gets a fresh run token so concurrent or repeated runs in the
    /// same directory never collide.
    pub fn new(dir: impl Into<PathBuf>, config: TilingConfig) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(TilingError::config(format!(
                "tile directory {:?} does not exist or is not a directory",
                dir
            )));
        }

        Ok(Self {
            dir,
            run_token: uuid::Uuid::new_v4().simple().to_string(),
            config,
        })
    }

    /// Directory holding this store's files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Token that makes this store's file names unique.
    pub fn run_token(&self) -> &str {
        &self.run_token
    }

    /// Path a tile will be written to.
    pub fn path_for(&self, tile: &Tile) -> PathBuf {
        self.dir
            .join(format!("tile-{}-{}.zarr", self.run_token, tile.name))
    }

    fn write_tile(
        &self,
        path: &Path,
        output: &TileOutput,
        tile: &Tile,
        rows: &[f64],
        columns: &[f64],
    ) -> std::result::Result<u64, BoxError> {
        for name in output.keys() {
            if name.is_empty() || name.contains('/') || name.starts_with("__") {
                return Err(format!("invalid output variable name {:?}", name).into());
            }
        }

        std::fs::create_dir(path)?;
        let store = Arc::new(FilesystemStore::new(path)?);

        let mut attrs = serde_json::Map::new();
        attrs.insert("tile".to_string(), serde_json::json!(tile.name));
        attrs.insert(
            "variables".to_string(),
            serde_json::json!(output.keys().collect::<Vec<_>>()),
        );
        attrs.insert("rows".to_string(), serde_json::json!(rows));
        attrs.insert("columns".to_string(), serde_json::json!(columns));

        let group = GroupBuilder::new().attributes(attrs).build(store.clone(), "/")?;
        group.store_metadata()?;

        let mut bytes_written = 0u64;
        for (name, cube) in output {
            bytes_written += self.write_variable(store.clone(), name, cube)?;
        }

        Ok(bytes_written)
    }

    fn write_variable(
        &self,
        store: Arc<FilesystemStore>,
        name: &str,
        cube: &DataCube,
    ) -> std::result::Result<u64, BoxError> {
        let [t, r, c] = cube.shape();
        let chunk = self.config.zarr_chunk_size;
        let shape = vec![t as u64, r as u64, c as u64];

        let chunk_grid: zarrs::array::ChunkGrid = vec![
            t.max(1) as u64,
            r.min(chunk).max(1) as u64,
            c.min(chunk).max(1) as u64,
        ]
        .try_into()
        .map_err(|e| format!("invalid chunk grid: {:?}", e))?;

        let mut attrs = serde_json::Map::new();
        attrs.insert("dims".to_string(), serde_json::json!(crate::types::DIMENSIONS));

        let mut binding = ArrayBuilder::new(
            shape.clone(),
            DataType::Float32,
            chunk_grid,
            FillValue::from(f32::NAN),
        );
        let mut builder = binding.attributes(attrs);
        if self.config.zarr_compression != ZarrCompression::None {
            builder = builder.bytes_to_bytes_codecs(vec![self.compression_codec()?]);
        }

        let array = builder.build(store, &format!("/{}", name))?;
        array.store_metadata()?;

        if cube.as_slice().is_empty() {
            return Ok(0);
        }

        let subset = ArraySubset::new_with_start_shape(vec![0, 0, 0], shape)?;
        array.store_array_subset_elements(&subset, cube.as_slice())?;

        Ok((cube.as_slice().len() * std::mem::size_of::<f32>()) as u64)
    }

    fn compression_codec(
        &self,
    ) -> std::result::Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>, BoxError> {
        let level = BloscCompressionLevel::try_from(self.config.zarr_compression_level)
            .map_err(|_| "invalid compression level".to_string())?;

        let (shuffle, typesize) = if self.config.zarr_shuffle {
            (BloscShuffleMode::Shuffle, Some(std::mem::size_of::<f32>()))
        } else {
            (BloscShuffleMode::NoShuffle, None)
        };

        let compressor = match self.config.zarr_compression {
            ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::BloscZstd => BloscCompressor::Zstd,
            ZarrCompression::None => return Err("no compression configured".into()),
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)?;
        Ok(Arc::new(codec))
    }
}

impl TileStore for ZarrTileStore {
    fn save(
        &self,
        output: &TileOutput,
        tile: &Tile,
        rows: &[f64],
        columns: &[f64],
    ) -> Result<TileFile> {
        let path = self.path_for(tile);
        if path.exists() {
            return Err(TilingError::StorageExhausted {
                path,
                source: "tile file already exists".into(),
            });
        }

        let _guard = WRITE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let partial = PartialTile::new(&path);
        match self.write_tile(&path, output, tile, rows, columns) {
            Ok(bytes_written) => {
                partial.keep();
                tracing::debug!(
                    tile = %tile.name,
                    path = %path.display(),
                    bytes_written,
                    "Saved tile"
                );
                Ok(TileFile {
                    tile: tile.name.clone(),
                    path,
                })
            }
            Err(source) => {
                drop(partial);
                Err(TilingError::StorageExhausted { path, source })
            }
        }
    }

    fn open(&self, file: &TileFile) -> Result<Arc<dyn TileHandle>> {
        Ok(Arc::new(ZarrTileHandle::open(&file.path)?))
    }

    fn delete(&self, file: &TileFile) -> Result<()> {
        match std::fs::remove_dir_all(&file.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TilingError::storage(format!(
                "failed to delete {:?}: {}",
                file.path, e
            ))),
        }
    }
}

/// Removes a tile directory on drop unless [`PartialTile::keep`] was called.
///
/// Covers both error returns and panics raised while a tile is being written.
struct PartialTile {
    path: Option<PathBuf>,
}

impl PartialTile {
    fn new(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
        }
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for PartialTile {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        if !path.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&path) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove partial tile file"
            );
        }
    }
}

/// Lazily opened tile hierarchy. Only metadata is read until [`TileHandle::read`].
pub struct ZarrTileHandle {
    path: PathBuf,
    tile: String,
    rows: Vec<f64>,
    columns: Vec<f64>,
    arrays: BTreeMap<String, Array<FilesystemStore>>,
}

impl ZarrTileHandle {
    /// Open the tile hierarchy at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let store = Arc::new(
            FilesystemStore::new(path)
                .map_err(|e| TilingError::storage(format!("failed to open {:?}: {}", path, e)))?,
        );

        let group = Group::open(store.clone(), "/")
            .map_err(|e| TilingError::storage(format!("failed to open {:?}: {}", path, e)))?;
        let attrs = group.attributes();

        let tile = attrs
            .get("tile")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TilingError::storage(format!("{:?} has no tile name", path)))?
            .to_string();
        let variables: Vec<String> = read_attr(attrs, "variables", path)?;
        let rows: Vec<f64> = read_attr(attrs, "rows", path)?;
        let columns: Vec<f64> = read_attr(attrs, "columns", path)?;

        let mut arrays = BTreeMap::new();
        for name in variables {
            let array = Array::open(store.clone(), &format!("/{}", name)).map_err(|e| {
                TilingError::storage(format!("failed to open {}/{}: {}", path.display(), name, e))
            })?;
            if array.shape().len() != 3 {
                return Err(TilingError::storage(format!(
                    "{}/{} is not a [time, row, column] array",
                    path.display(),
                    name
                )));
            }
            arrays.insert(name, array);
        }

        Ok(Self {
            path: path.to_path_buf(),
            tile,
            rows,
            columns,
            arrays,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_attr<T: serde::de::DeserializeOwned>(
    attrs: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    path: &Path,
) -> Result<T> {
    let value = attrs
        .get(key)
        .cloned()
        .ok_or_else(|| TilingError::storage(format!("{:?} is missing attribute {}", path, key)))?;
    Ok(serde_json::from_value(value)?)
}

impl TileHandle for ZarrTileHandle {
    fn tile(&self) -> &str {
        &self.tile
    }

    fn variables(&self) -> Vec<String> {
        self.arrays.keys().cloned().collect()
    }

    fn shape(&self, variable: &str) -> Option<[usize; 3]> {
        self.arrays.get(variable).map(|array| {
            let shape = array.shape();
            [shape[0] as usize, shape[1] as usize, shape[2] as usize]
        })
    }

    fn rows(&self) -> &[f64] {
        &self.rows
    }

    fn columns(&self) -> &[f64] {
        &self.columns
    }

    fn read(&self, variable: &str) -> Result<DataCube> {
        let array = self.arrays.get(variable).ok_or_else(|| {
            TilingError::storage(format!("{:?} has no variable {}", self.path, variable))
        })?;
        let shape = array.shape().to_vec();
        let cube_shape = [shape[0] as usize, shape[1] as usize, shape[2] as usize];

        if shape.iter().any(|&n| n == 0) {
            return DataCube::new(cube_shape, Vec::new());
        }

        let subset = ArraySubset::new_with_start_shape(vec![0, 0, 0], shape)
            .map_err(|e| TilingError::storage(e.to_string()))?;
        let data: Vec<f32> = array
            .retrieve_array_subset_elements(&subset)
            .map_err(|e| TilingError::storage(format!("failed to read {}: {}", variable, e)))?;

        DataCube::new(cube_shape, data)
    }
}
