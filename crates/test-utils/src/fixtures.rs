//! Common test fixtures for tiling tests.
//!
//! This module provides pre-defined domain sizes, tile names and a temporary
//! work directory that can report leftover tile files.

use std::path::{Path, PathBuf};

/// Representative `(rows, cols)` domain sizes, including ones that do not
/// divide evenly by 2 or 4.
pub mod domains {
    /// The worked 10x10 example.
    pub const SIMPLE_10X10: (usize, usize) = (10, 10);

    /// Odd sizes on both axes.
    pub const ODD_7X13: (usize, usize) = (7, 13);

    /// A single row of three cells. Most tiles are empty for 4 or 8 tiles.
    pub const SINGLE_ROW_1X3: (usize, usize) = (1, 3);

    /// Wider than tall, remainder on the column axis for every split.
    pub const WIDE_9X39: (usize, usize) = (9, 39);

    /// A moderately sized domain.
    pub const MEDIUM_64X96: (usize, usize) = (64, 96);

    /// All of the above.
    pub const ALL: [(usize, usize); 5] = [SIMPLE_10X10, ODD_7X13, SINGLE_ROW_1X3, WIDE_9X39, MEDIUM_64X96];
}

/// Tile names produced for each supported tile count.
pub mod tiles {
    pub const ONE: [&str; 1] = ["full"];
    pub const TWO: [&str; 2] = ["west", "east"];
    pub const FOUR: [&str; 4] = ["northwest", "northeast", "southwest", "southeast"];
    pub const EIGHT: [&str; 8] = [
        "north_west",
        "north_west_central",
        "north_east_central",
        "north_east",
        "south_west",
        "south_west_central",
        "south_east_central",
        "south_east",
    ];
}

/// File name prefix of temporary tile files.
pub const TILE_FILE_PREFIX: &str = "tile-";

/// A temporary work directory that is removed when dropped.
pub struct WorkDir {
    dir: tempfile::TempDir,
}

impl WorkDir {
    /// Create a fresh empty directory.
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// All entries in the directory.
    pub fn entries(&self) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(self.dir.path())
            .expect("Failed to read temp dir")
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        entries
    }

    /// Entries that look like tile files.
    pub fn tile_files(&self) -> Vec<PathBuf> {
        self.entries()
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(TILE_FILE_PREFIX))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Place an unrelated file in the directory and return its path.
    pub fn touch(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"pre-existing").expect("Failed to write file");
        path
    }
}

impl Default for WorkDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domains_are_non_empty() {
        for (rows, cols) in domains::ALL {
            assert!(rows > 0 && cols > 0);
        }
    }

    #[test]
    fn test_work_dir_counts_tile_files() {
        let dir = WorkDir::new();
        dir.touch("notes.txt");
        std::fs::create_dir(dir.path().join("tile-abc-west.zarr")).unwrap();
        assert_eq!(dir.entries().len(), 2);
        assert_eq!(dir.tile_files().len(), 1);
    }
}
