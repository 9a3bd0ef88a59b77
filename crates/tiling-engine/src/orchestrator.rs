//! Drives a tiled run: plan, dispatch tiles to a bounded worker pool, persist
//! each result, merge, materialize and clean up.
//!
//! # Run lifecycle
//!
//! ```text
//! Planning ─► Dispatching ─► AwaitingTiles ─► Merging ─► Materializing ─► CleaningUp ─► Done
//!     │            │               │             │              │
//!     └────────────┴───────────────┴─────────────┴──────────────┴──► (CleaningUp) ─► Failed
//! ```
//!
//! Materializing always completes (or fails) before CleaningUp: the merged
//! result reads from the tile files until it has been materialized.
//!
//! The first failing tile ends the wait. Tiles already on disk are deleted and
//! the error is returned. Sibling tiles still computing are not interrupted;
//! they notice the abort and skip writing their files.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::baseline::validate_baselines;
use crate::config::TilingConfig;
use crate::error::{Result, TilingError};
use crate::executor::{execute, TileComputation};
use crate::merge::merge;
use crate::partition::{plan, Tile, TileSet};
use crate::store::{TileFile, TileHandle, TileStore, ZarrTileStore};
use crate::types::{validate_expected_dims, ExpectedDims, Grid, MergedResult, ThresholdSource};

/// States of a tiled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    Planning,
    Dispatching,
    AwaitingTiles,
    Merging,
    Materializing,
    CleaningUp,
    Done,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Dispatching => "dispatching",
            Self::AwaitingTiles => "awaiting_tiles",
            Self::Merging => "merging",
            Self::Materializing => "materializing",
            Self::CleaningUp => "cleaning_up",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Callback notified on every phase transition.
pub type PhaseObserver = Arc<dyn Fn(RunPhase) + Send + Sync>;

struct PhaseTracker {
    current: RunPhase,
    observer: Option<PhaseObserver>,
}

impl PhaseTracker {
    fn new(observer: Option<PhaseObserver>) -> Self {
        let tracker = Self {
            current: RunPhase::Planning,
            observer,
        };
        tracker.notify();
        tracker
    }

    fn enter(&mut self, next: RunPhase) {
        debug_assert!(!self.current.is_terminal(), "run already finished");
        debug!(from = %self.current, to = %next, "Run phase transition");
        self.current = next;
        self.notify();
    }

    fn notify(&self) {
        if let Some(observer) = &self.observer {
            observer(self.current);
        }
    }
}

/// Tile files written so far. Shared by every worker of one run.
#[derive(Default)]
struct TileRegistry {
    files: BTreeMap<String, TileFile>,
    /// Files pushed out of `files` by a later save under the same key.
    displaced: Vec<TileFile>,
    aborted: bool,
}

/// Runs a computation over a grid tile by tile and merges the results.
pub struct TilingOrchestrator {
    config: TilingConfig,
    store: Arc<dyn TileStore>,
    observer: Option<PhaseObserver>,
}

impl TilingOrchestrator {
    /// Create an orchestrator writing tiles through `store`.
    pub fn new(config: TilingConfig, store: Arc<dyn TileStore>) -> Result<Self> {
        config.validate().map_err(TilingError::Configuration)?;
        Ok(Self {
            config,
            store,
            observer: None,
        })
    }

    /// Create an orchestrator with a Zarr store in `config.work_dir`.
    pub fn with_zarr_store(config: TilingConfig) -> Result<Self> {
        config.validate().map_err(TilingError::Configuration)?;
        let store = ZarrTileStore::new(config.work_dir.clone(), config.clone())?;
        Self::new(config, Arc::new(store))
    }

    /// Register a callback for phase transitions.
    pub fn on_phase(mut self, observer: impl Fn(RunPhase) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    /// Process `grid` tile by tile and return the merged, fully resident result.
    ///
    /// The run is all-or-nothing: on any error every tile file written by this
    /// run is removed and no partial result is returned.
    pub fn process<B, C>(
        &self,
        grid: Arc<Grid>,
        baselines: Arc<B>,
        computation: Arc<C>,
        expected: &ExpectedDims,
    ) -> Result<MergedResult>
    where
        B: ThresholdSource + ?Sized + 'static,
        C: TileComputation + ?Sized + 'static,
    {
        let started = Instant::now();
        let mut phase = PhaseTracker::new(self.observer.clone());

        info!(
            tile_count = self.config.tile_count,
            shape = ?grid.shape(),
            variables = grid.variables().len(),
            "Starting tiled run"
        );

        match self.run(&mut phase, grid, baselines, computation, expected) {
            Ok(result) => {
                phase.enter(RunPhase::Done);
                info!(
                    tile_count = result.tile_count,
                    outputs = result.variables.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tiled run complete"
                );
                Ok(result)
            }
            Err(e) => {
                phase.enter(RunPhase::Failed);
                warn!(error = %e, "Tiled run failed");
                Err(e)
            }
        }
    }

    fn run<B, C>(
        &self,
        phase: &mut PhaseTracker,
        grid: Arc<Grid>,
        baselines: Arc<B>,
        computation: Arc<C>,
        expected: &ExpectedDims,
    ) -> Result<MergedResult>
    where
        B: ThresholdSource + ?Sized + 'static,
        C: TileComputation + ?Sized + 'static,
    {
        validate_expected_dims(expected)?;
        let [_, rows, cols] = grid.shape();
        let tile_set = plan(rows, cols, self.config.tile_count)?;
        if grid.variables().is_empty() {
            return Err(TilingError::config("grid has no variables"));
        }
        validate_baselines(baselines.as_ref(), rows, cols)?;

        phase.enter(RunPhase::Dispatching);
        let registry = Arc::new(Mutex::new(TileRegistry::default()));
        if let Err(e) = self.dispatch(phase, &tile_set, &registry, grid, baselines, computation) {
            let files = abort(&registry);
            phase.enter(RunPhase::CleaningUp);
            self.cleanup(&files);
            return Err(e);
        }
        let (files, displaced) = {
            let mut registry = lock(&registry);
            (
                std::mem::take(&mut registry.files),
                std::mem::take(&mut registry.displaced),
            )
        };

        if files.len() != tile_set.len() || !displaced.is_empty() {
            phase.enter(RunPhase::CleaningUp);
            self.cleanup(files.values().chain(&displaced));
            return Err(TilingError::TileCountMismatch {
                expected: tile_set.len(),
                actual: files.len(),
            });
        }

        phase.enter(RunPhase::Merging);
        let outcome = self.merge_and_materialize(phase, &files, &tile_set, expected);

        phase.enter(RunPhase::CleaningUp);
        self.cleanup(files.values());

        outcome
    }

    /// Spawn one job per tile and wait for all of them, failing fast.
    ///
    /// Successful tiles are recorded in `registry`. Returns at the first tile
    /// error without waiting for the remaining jobs.
    fn dispatch<B, C>(
        &self,
        phase: &mut PhaseTracker,
        tile_set: &TileSet,
        registry: &Arc<Mutex<TileRegistry>>,
        grid: Arc<Grid>,
        baselines: Arc<B>,
        computation: Arc<C>,
    ) -> Result<()>
    where
        B: ThresholdSource + ?Sized + 'static,
        C: TileComputation + ?Sized + 'static,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(tile_set.len())
            .thread_name(|i| format!("tile-worker-{}", i))
            .build()
            .map_err(|e| TilingError::config(format!("failed to build worker pool: {}", e)))?;

        let (tx, rx) = mpsc::channel::<(String, Result<()>)>();

        for tile in tile_set.tiles().iter().cloned() {
            let grid = Arc::clone(&grid);
            let baselines = Arc::clone(&baselines);
            let computation = Arc::clone(&computation);
            let store = Arc::clone(&self.store);
            let registry = Arc::clone(registry);
            let tx = tx.clone();

            pool.spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    run_tile(
                        &grid,
                        &tile,
                        baselines.as_ref(),
                        computation.as_ref(),
                        store.as_ref(),
                        &registry,
                    )
                }))
                .unwrap_or_else(|panic| {
                    Err(TilingError::Computation {
                        tile: tile.name.clone(),
                        source: anyhow::anyhow!(
                            "tile worker panicked: {}",
                            panic_message(panic.as_ref())
                        ),
                    })
                });
                // The receiver is gone once the run has already failed.
                let _ = tx.send((tile.name.clone(), outcome));
            });
        }
        drop(tx);

        phase.enter(RunPhase::AwaitingTiles);
        for _ in 0..tile_set.len() {
            match rx.recv() {
                Ok((tile, Ok(()))) => debug!(tile = %tile, "Tile finished"),
                Ok((tile, Err(e))) => {
                    warn!(tile = %tile, error = %e, "Tile failed, aborting run");
                    return Err(e);
                }
                Err(_) => {
                    return Err(TilingError::TileCountMismatch {
                        expected: tile_set.len(),
                        actual: lock(registry).files.len(),
                    });
                }
            }
        }

        Ok(())
    }

    fn merge_and_materialize(
        &self,
        phase: &mut PhaseTracker,
        files: &BTreeMap<String, TileFile>,
        tile_set: &TileSet,
        expected: &ExpectedDims,
    ) -> Result<MergedResult> {
        let mut handles: BTreeMap<String, Arc<dyn TileHandle>> = BTreeMap::new();
        for tile in tile_set.merge_order() {
            let file = files.get(&tile.name).ok_or_else(|| TilingError::TileCountMismatch {
                expected: tile_set.len(),
                actual: files.len(),
            })?;
            handles.insert(tile.name.clone(), self.store.open(file)?);
        }

        let lazy = merge(&handles, tile_set, expected)?;

        phase.enter(RunPhase::Materializing);
        lazy.materialize()
    }

    /// Delete tile files. Failures are logged and otherwise ignored.
    fn cleanup<'a>(&self, files: impl IntoIterator<Item = &'a TileFile>) {
        for file in files {
            match self.store.delete(file) {
                Ok(()) => debug!(tile = %file.tile, path = %file.path.display(), "Removed tile file"),
                Err(e) => warn!(
                    tile = %file.tile,
                    path = %file.path.display(),
                    error = %e,
                    "Failed to remove tile file"
                ),
            }
        }
    }
}

/// Compute one tile and persist it, unless the run has been aborted.
///
/// The registry lock is held across the write so an abort never interleaves
/// with a file being written.
fn run_tile<B, C>(
    grid: &Grid,
    tile: &Tile,
    baselines: &B,
    computation: &C,
    store: &dyn TileStore,
    registry: &Mutex<TileRegistry>,
) -> Result<()>
where
    B: ThresholdSource + ?Sized,
    C: TileComputation + ?Sized,
{
    if lock(registry).aborted {
        debug!(tile = %tile.name, "Run aborted, skipping tile");
        return Ok(());
    }

    let output = execute(grid, tile, baselines, computation)?;

    let [_, rows, cols] = grid.shape();
    let (row_range, col_range) = tile.extents(rows, cols);

    let mut registry = lock(registry);
    if registry.aborted {
        debug!(tile = %tile.name, "Run aborted, discarding tile output");
        return Ok(());
    }
    let file = store.save(
        &output,
        tile,
        &grid.rows()[row_range],
        &grid.columns()[col_range],
    )?;
    // Keyed by what the store reports; a store that reuses keys shows up as a
    // tile count mismatch once every job has finished.
    if let Some(previous) = registry.files.insert(file.tile.clone(), file) {
        warn!(tile = %previous.tile, path = %previous.path.display(), "Tile key saved twice");
        registry.displaced.push(previous);
    }
    Ok(())
}

/// Stop accepting tile files and hand back the ones already written.
fn abort(registry: &Mutex<TileRegistry>) -> Vec<TileFile> {
    let mut registry = lock(registry);
    registry.aborted = true;
    let mut files: Vec<TileFile> = std::mem::take(&mut registry.files).into_values().collect();
    files.append(&mut registry.displaced);
    files
}

fn lock(registry: &Mutex<TileRegistry>) -> std::sync::MutexGuard<'_, TileRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a tiled computation with a Zarr tile store in `dir`.
pub fn process_tiled<B, C>(
    grid: Arc<Grid>,
    baselines: Arc<B>,
    computation: Arc<C>,
    tile_count: usize,
    dir: &Path,
    expected: &ExpectedDims,
) -> Result<MergedResult>
where
    B: ThresholdSource + ?Sized + 'static,
    C: TileComputation + ?Sized + 'static,
{
    let config = TilingConfig::default()
        .with_tile_count(tile_count)
        .with_work_dir(dir);
    TilingOrchestrator::with_zarr_store(config)?.process(grid, baselines, computation, expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::types::{DataCube, ThresholdSet, TileOutput};

    fn grid(rows: usize, cols: usize) -> Arc<Grid> {
        let mut vars = BTreeMap::new();
        vars.insert(
            "tas".to_string(),
            DataCube::from_fn([3, rows, cols], |t, r, c| (t + r * cols + c) as f32),
        );
        Arc::new(
            Grid::new(
                vec![0.0, 1.0, 2.0],
                (0..rows).map(|r| r as f64).collect(),
                (0..cols).map(|c| c as f64).collect(),
                vars,
            )
            .unwrap(),
        )
    }

    fn max_over_time(g: &Grid, _: &ThresholdSet) -> anyhow::Result<TileOutput> {
        let tas = g.variable("tas").unwrap();
        let [t, r, c] = tas.shape();
        let out = DataCube::from_fn([1, r, c], |_, ri, ci| {
            (0..t).map(|ti| tas.get(ti, ri, ci).unwrap()).fold(f32::MIN, f32::max)
        });
        let mut map = TileOutput::new();
        map.insert("tas_max".to_string(), out);
        Ok(map)
    }

    /// Store that fails every write, to exercise the storage error path.
    struct FailingStore;

    impl TileStore for FailingStore {
        fn save(&self, _: &TileOutput, tile: &Tile, _: &[f64], _: &[f64]) -> Result<TileFile> {
            Err(TilingError::StorageExhausted {
                path: format!("/dev/full/{}", tile.name).into(),
                source: "no space left on device".into(),
            })
        }
        fn open(&self, _: &TileFile) -> Result<Arc<dyn TileHandle>> {
            Err(TilingError::storage("nothing to open"))
        }
        fn delete(&self, _: &TileFile) -> Result<()> {
            Ok(())
        }
    }

    /// Store that files every tile under the same key and records deletions.
    #[derive(Default)]
    struct SharedKeyStore {
        saved: AtomicUsize,
        deleted: Mutex<Vec<TileFile>>,
    }

    impl TileStore for SharedKeyStore {
        fn save(&self, _: &TileOutput, _: &Tile, _: &[f64], _: &[f64]) -> Result<TileFile> {
            let n = self.saved.fetch_add(1, Ordering::SeqCst);
            Ok(TileFile {
                tile: "shared".to_string(),
                path: format!("/nonexistent/tile-{}.zarr", n).into(),
            })
        }
        fn open(&self, _: &TileFile) -> Result<Arc<dyn TileHandle>> {
            Err(TilingError::storage("nothing to open"))
        }
        fn delete(&self, file: &TileFile) -> Result<()> {
            self.deleted.lock().unwrap().push(file.clone());
            Ok(())
        }
    }

    #[test]
    fn test_phases_in_order_on_success() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let phases = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&phases);
        let orchestrator = TilingOrchestrator::with_zarr_store(
            TilingConfig::default().with_tile_count(4).with_work_dir(dir.path()),
        )
        .unwrap()
        .on_phase(move |p| seen.lock().unwrap().push(p));

        let result = orchestrator
            .process(
                grid(6, 6),
                Arc::new(ThresholdSet::empty()),
                Arc::new(max_over_time),
                &ExpectedDims::new(),
            )
            .unwrap();
        assert_eq!(result.get("tas_max").unwrap().shape(), [1, 6, 6]);

        assert_eq!(
            *phases.lock().unwrap(),
            vec![
                RunPhase::Planning,
                RunPhase::Dispatching,
                RunPhase::AwaitingTiles,
                RunPhase::Merging,
                RunPhase::Materializing,
                RunPhase::CleaningUp,
                RunPhase::Done,
            ]
        );
    }

    #[test]
    fn test_planning_failure_dispatches_nothing() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let phases = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&phases);
        let orchestrator = TilingOrchestrator::with_zarr_store(
            TilingConfig::default().with_tile_count(8).with_work_dir(dir.path()),
        )
        .unwrap()
        .on_phase(move |p| seen.lock().unwrap().push(p));

        let err = orchestrator
            .process(
                grid(4, 3),
                Arc::new(ThresholdSet::empty()),
                Arc::new(max_over_time),
                &ExpectedDims::new(),
            )
            .unwrap_err();
        assert!(matches!(err, TilingError::Configuration(_)));
        assert_eq!(*phases.lock().unwrap(), vec![RunPhase::Planning, RunPhase::Failed]);
    }

    #[test]
    fn test_unknown_expected_dimension() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut expected = ExpectedDims::new();
        expected.insert("lat".to_string(), 6);
        let err = process_tiled(
            grid(6, 6),
            Arc::new(ThresholdSet::empty()),
            Arc::new(max_over_time),
            2,
            dir.path(),
            &expected,
        )
        .unwrap_err();
        assert!(matches!(err, TilingError::MissingDimension(_)));
    }

    #[test]
    fn test_storage_failure_is_reported() {
        let orchestrator =
            TilingOrchestrator::new(TilingConfig::default().with_tile_count(2), Arc::new(FailingStore))
                .unwrap();
        let err = orchestrator
            .process(
                grid(4, 4),
                Arc::new(ThresholdSet::empty()),
                Arc::new(max_over_time),
                &ExpectedDims::new(),
            )
            .unwrap_err();
        assert!(matches!(err, TilingError::StorageExhausted { .. }));
    }

    #[test]
    fn test_panicking_computation_becomes_error() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let computation = |_: &Grid, _: &ThresholdSet| -> anyhow::Result<TileOutput> {
            panic!("index formula divided by zero")
        };
        let err = process_tiled(
            grid(4, 4),
            Arc::new(ThresholdSet::empty()),
            Arc::new(computation),
            2,
            dir.path(),
            &ExpectedDims::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TilingError::Computation { .. }));
        assert!(err.to_string().contains("divided by zero"));
    }

    #[test]
    fn test_reused_store_keys_are_a_count_mismatch() {
        let store = Arc::new(SharedKeyStore::default());
        let phases = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&phases);
        let orchestrator = TilingOrchestrator::new(
            TilingConfig::default().with_tile_count(4),
            Arc::clone(&store) as Arc<dyn TileStore>,
        )
        .unwrap()
        .on_phase(move |p| seen.lock().unwrap().push(p));

        let err = orchestrator
            .process(
                grid(4, 4),
                Arc::new(ThresholdSet::empty()),
                Arc::new(max_over_time),
                &ExpectedDims::new(),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            TilingError::TileCountMismatch {
                expected: 4,
                actual: 1
            }
        ));
        assert_eq!(store.saved.load(Ordering::SeqCst), 4);
        assert_eq!(store.deleted.lock().unwrap().len(), 4);
        assert_eq!(
            phases.lock().unwrap().last().copied(),
            Some(RunPhase::Failed)
        );
        assert!(!phases.lock().unwrap().contains(&RunPhase::Merging));
    }

    #[test]
    fn test_empty_domain_reported_before_missing_variables() {
        let empty = Arc::new(Grid::new(vec![0.0], vec![], vec![0.0, 1.0], BTreeMap::new()).unwrap());
        let orchestrator =
            TilingOrchestrator::new(TilingConfig::default().with_tile_count(2), Arc::new(FailingStore))
                .unwrap();
        let err = orchestrator
            .process(
                empty,
                Arc::new(ThresholdSet::empty()),
                Arc::new(max_over_time),
                &ExpectedDims::new(),
            )
            .unwrap_err();
        assert!(matches!(err, TilingError::EmptyDomain { rows: 0, cols: 2 }));
    }

    #[test]
    fn test_grid_without_variables_rejected() {
        let bare = Arc::new(Grid::new(vec![0.0], vec![0.0], vec![0.0], BTreeMap::new()).unwrap());
        let orchestrator =
            TilingOrchestrator::new(TilingConfig::default().with_tile_count(1), Arc::new(FailingStore))
                .unwrap();
        let err = orchestrator
            .process(
                bare,
                Arc::new(ThresholdSet::empty()),
                Arc::new(max_over_time),
                &ExpectedDims::new(),
            )
            .unwrap_err();
        assert!(matches!(err, TilingError::Configuration(_)));
    }

    #[test]
    fn test_panic_message_payloads() {
        let literal: Box<dyn std::any::Any + Send> = Box::new("boom");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn std::any::Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(literal.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[test]
    fn test_invalid_tile_count_rejected_up_front() {
        assert!(matches!(
            TilingOrchestrator::new(TilingConfig::default().with_tile_count(3), Arc::new(FailingStore)),
            Err(TilingError::Configuration(_))
        ));
    }
}
