//! Test data generators for synthetic gridded data.
//!
//! These generators create predictable, verifiable test data patterns. All
//! cubes are returned as flat `Vec<f32>` in `[time, row, column]` order
//! (time-major, then row-major) so they can be wrapped by any array type.

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being read/written correctly
/// by checking that grid[row][col] == col * 1000 + row.
///
/// # Arguments
///
/// * `width` - Number of columns
/// * `height` - Number of rows
///
/// # Returns
///
/// A `Vec<f32>` in row-major order (row 0 first, then row 1, etc.)
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50); // 10 * 5
/// assert_eq!(grid[0], 0.0);   // col=0, row=0 -> 0*1000 + 0
/// assert_eq!(grid[1], 1000.0); // col=1, row=0 -> 1*1000 + 0
/// assert_eq!(grid[10], 1.0);  // col=0, row=1 -> 0*1000 + 1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Creates a `[times, height, width]` cube where every time step repeats
/// [`create_test_grid`] offset by `t * 1_000_000`.
///
/// ```
/// use test_utils::create_test_cube;
///
/// let cube = create_test_cube(2, 3, 4);
/// assert_eq!(cube.len(), 24);
/// assert_eq!(cube[12], 1_000_000.0); // t=1, row=0, col=0
/// ```
pub fn create_test_cube(times: usize, width: usize, height: usize) -> Vec<f32> {
    let plane = create_test_grid(width, height);
    let mut data = Vec::with_capacity(times * plane.len());
    for t in 0..times {
        let offset = t as f32 * 1_000_000.0;
        data.extend(plane.iter().map(|v| v + offset));
    }
    data
}

/// Creates a daily temperature series in Kelvin, shaped `[days, height, width]`.
///
/// Each cell follows an annual cycle (warmest around day 200) on top of a
/// latitude-like gradient (warmer towards the bottom rows), plus a small
/// deterministic per-cell wobble so neighbouring cells differ.
pub fn create_temperature_series(days: usize, width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(days * width * height);
    for day in 0..days {
        let season = (2.0 * std::f32::consts::PI * (day as f32 - 110.0) / 365.0).sin();
        for row in 0..height {
            let lat_factor = row as f32 / height.max(1) as f32;
            for col in 0..width {
                let wobble = (((col * 7 + row * 13 + day * 3) % 11) as f32 - 5.0) * 0.1;
                data.push(265.0 + lat_factor * 30.0 + season * 12.0 + wobble);
            }
        }
    }
    data
}

/// Creates a per-day-of-year threshold cube shaped `[days_of_year, height, width]`.
///
/// Thresholds follow the same seasonal cycle as [`create_temperature_series`]
/// shifted up by `margin` Kelvin.
pub fn create_threshold_cube(days_of_year: usize, width: usize, height: usize, margin: f32) -> Vec<f32> {
    let mut data = Vec::with_capacity(days_of_year * width * height);
    for day in 0..days_of_year {
        let season = (2.0 * std::f32::consts::PI * (day as f32 - 110.0) / 365.0).sin();
        for row in 0..height {
            let lat_factor = row as f32 / height.max(1) as f32;
            for _ in 0..width {
                data.push(265.0 + lat_factor * 30.0 + season * 12.0 + margin);
            }
        }
    }
    data
}

/// Evenly spaced coordinate vector: `start, start + step, ...` with `len` entries.
pub fn coordinates(len: usize, start: f64, step: f64) -> Vec<f64> {
    (0..len).map(|i| start + i as f64 * step).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_grid() {
        let grid = create_test_grid(10, 5);
        assert_eq!(grid.len(), 50);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[1], 1000.0);
        assert_eq!(grid[10], 1.0);
        assert_eq!(grid[11], 1001.0);
    }

    #[test]
    fn test_create_test_cube_offsets_time() {
        let cube = create_test_cube(3, 4, 2);
        assert_eq!(cube.len(), 24);
        assert_eq!(cube[8], 1_000_000.0);
        assert_eq!(cube[16 + 1], 2_001_000.0);
    }

    #[test]
    fn test_temperature_series_range() {
        let data = create_temperature_series(365, 8, 6);
        assert_eq!(data.len(), 365 * 48);
        for &t in &data {
            assert!(t > 240.0 && t < 320.0, "temperature {} out of range", t);
        }
    }

    #[test]
    fn test_threshold_cube_margin() {
        let series = create_threshold_cube(2, 3, 3, 0.0);
        let shifted = create_threshold_cube(2, 3, 3, 5.0);
        for (a, b) in series.iter().zip(&shifted) {
            assert!((b - a - 5.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_coordinates() {
        assert_eq!(coordinates(3, 10.0, 0.5), vec![10.0, 10.5, 11.0]);
    }
}
