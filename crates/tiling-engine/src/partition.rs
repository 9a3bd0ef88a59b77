//! Partition planning: split a `rows x cols` domain into spatial tiles.
//!
//! Layouts per tile count:
//!
//! ```text
//!  1 tile        2 tiles         4 tiles                8 tiles
//! +-------+    +---+---+    +---------+---------+   +----+----+----+----+
//! |       |    |   |   |    |northwest|northeast|   | nw |nwc |nec | ne |  north band
//! | full  |    | w | e |    +---------+---------+   +----+----+----+----+
//! |       |    |   |   |    |southwest|southeast|   | sw |swc |sec | se |  south band
//! +-------+    +---+---+    +---------+---------+   +----+----+----+----+
//! ```
//!
//! Ranges are half-open. The last range on each axis is unbounded so that any
//! remainder from integer division is absorbed by the east/south tiles.

use std::ops::Range;

use crate::error::{Result, TilingError};

/// Tile counts the planner knows how to lay out.
pub const SUPPORTED_TILE_COUNTS: [usize; 4] = [1, 2, 4, 8];

/// Half-open index interval on one axis. `stop == None` runs to the end of the axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AxisRange {
    pub start: usize,
    pub stop: Option<usize>,
}

impl AxisRange {
    pub fn new(start: usize, stop: Option<usize>) -> Self {
        Self { start, stop }
    }

    /// The whole axis.
    pub fn full() -> Self {
        Self::new(0, None)
    }

    /// Concrete index range for an axis of length `len`.
    pub fn resolve(&self, len: usize) -> Range<usize> {
        let stop = self.stop.unwrap_or(len).min(len);
        self.start.min(stop)..stop
    }
}

impl std::fmt::Display for AxisRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stop {
            Some(stop) => write!(f, "[{}, {})", self.start, stop),
            None => write!(f, "[{}, end)", self.start),
        }
    }
}

/// A rectangular spatial sub-region of the domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tile {
    pub name: String,
    pub rows: AxisRange,
    pub cols: AxisRange,
}

impl Tile {
    fn new(name: &str, rows: AxisRange, cols: AxisRange) -> Self {
        Self {
            name: name.to_string(),
            rows,
            cols,
        }
    }

    /// Resolved `(rows, cols)` index ranges for a domain of the given size.
    pub fn extents(&self, rows: usize, cols: usize) -> (Range<usize>, Range<usize>) {
        (self.rows.resolve(rows), self.cols.resolve(cols))
    }
}

/// The tiles for one run plus the order in which they are concatenated.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSet {
    tiles: Vec<Tile>,
    /// Row bands, north to south. Each band lists tile indices west to east.
    bands: Vec<Vec<usize>>,
}

impl TileSet {
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Tile> {
        self.tiles.iter().find(|t| t.name == name)
    }

    /// Concatenation tree: columns within each band first, then bands along rows.
    pub fn bands(&self) -> &[Vec<usize>] {
        &self.bands
    }

    /// Tiles in concatenation order (band by band, west to east).
    pub fn merge_order(&self) -> impl Iterator<Item = &Tile> {
        self.bands
            .iter()
            .flat_map(move |band| band.iter().map(move |&i| &self.tiles[i]))
    }

    /// True when the tiles cover every cell of `rows x cols` exactly once.
    pub fn covers_exactly(&self, rows: usize, cols: usize) -> bool {
        let mut hits = vec![0u8; rows * cols];
        for tile in &self.tiles {
            let (rr, cr) = tile.extents(rows, cols);
            for r in rr {
                for c in cr.clone() {
                    hits[r * cols + c] = hits[r * cols + c].saturating_add(1);
                }
            }
        }
        hits.iter().all(|&h| h == 1)
    }
}

/// Split points for `parts` equal slices of an axis of length `len`.
///
/// Returns `parts` ranges; the first starts at zero and the last is unbounded.
fn split_axis(len: usize, parts: usize) -> Vec<AxisRange> {
    let step = len / parts;
    (0..parts)
        .map(|i| {
            let start = i * step;
            let stop = if i + 1 == parts { None } else { Some((i + 1) * step) };
            AxisRange::new(start, stop)
        })
        .collect()
}

/// Compute the tile layout for a `rows x cols` domain.
///
/// Fails with [`TilingError::Configuration`] for unsupported tile counts and with
/// [`TilingError::EmptyDomain`] when either axis is zero. Axes shorter than the
/// number of slices yield zero-width tiles; the unbounded last slice still
/// covers the whole axis.
pub fn plan(rows: usize, cols: usize, tile_count: usize) -> Result<TileSet> {
    if !SUPPORTED_TILE_COUNTS.contains(&tile_count) {
        return Err(TilingError::config(format!(
            "unsupported tile count {}, expected one of {:?}",
            tile_count, SUPPORTED_TILE_COUNTS
        )));
    }

    if rows == 0 || cols == 0 {
        return Err(TilingError::EmptyDomain { rows, cols });
    }

    let (row_parts, col_parts, names): (usize, usize, &[&str]) = match tile_count {
        1 => (1, 1, &["full"]),
        2 => (1, 2, &["west", "east"]),
        4 => (2, 2, &["northwest", "northeast", "southwest", "southeast"]),
        _ => (
            2,
            4,
            &[
                "north_west",
                "north_west_central",
                "north_east_central",
                "north_east",
                "south_west",
                "south_west_central",
                "south_east_central",
                "south_east",
            ],
        ),
    };

    let row_ranges = split_axis(rows, row_parts);
    let col_ranges = split_axis(cols, col_parts);

    let mut tiles = Vec::with_capacity(tile_count);
    let mut bands = Vec::with_capacity(row_parts);
    for (bi, row_range) in row_ranges.iter().enumerate() {
        let mut band = Vec::with_capacity(col_parts);
        for (ci, col_range) in col_ranges.iter().enumerate() {
            let index = bi * col_parts + ci;
            tiles.push(Tile::new(names[index], *row_range, *col_range));
            band.push(index);
        }
        bands.push(band);
    }

    let set = TileSet { tiles, bands };
    debug_assert!(set.covers_exactly(rows, cols));

    tracing::debug!(rows, cols, tile_count, "Planned tile layout");

    Ok(set)
}
