//! Layout properties of the partition planner over many domain sizes.

use test_utils::{domains, tiles};
use tiling_engine::{plan, TilingError, SUPPORTED_TILE_COUNTS};

fn expected_names(tile_count: usize) -> Vec<&'static str> {
    match tile_count {
        1 => tiles::ONE.to_vec(),
        2 => tiles::TWO.to_vec(),
        4 => tiles::FOUR.to_vec(),
        _ => tiles::EIGHT.to_vec(),
    }
}

#[test]
fn test_every_cell_covered_exactly_once() {
    for rows in 1..=17 {
        for cols in 1..=23 {
            for &tile_count in SUPPORTED_TILE_COUNTS.iter() {
                let set = plan(rows, cols, tile_count).unwrap();
                assert_eq!(set.len(), tile_count);
                assert!(
                    set.covers_exactly(rows, cols),
                    "{} tiles do not cover {}x{} exactly",
                    tile_count,
                    rows,
                    cols
                );
            }
        }
    }
}

#[test]
fn test_tile_names_per_count() {
    let (rows, cols) = domains::MEDIUM_64X96;
    for &tile_count in SUPPORTED_TILE_COUNTS.iter() {
        let set = plan(rows, cols, tile_count).unwrap();
        let names: Vec<&str> = set.tiles().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, expected_names(tile_count));
    }
}

#[test]
fn test_last_tile_on_each_axis_absorbs_remainder() {
    let (rows, cols) = domains::WIDE_9X39;
    let set = plan(rows, cols, 8).unwrap();

    // 39 / 4 = 9, so the last column strip is 39 - 27 = 12 wide.
    let (r, c) = set.get("south_east").unwrap().extents(rows, cols);
    assert_eq!(r, 4..9);
    assert_eq!(c, 27..39);

    for name in ["north_west", "north_west_central", "north_east_central"] {
        let (_, c) = set.get(name).unwrap().extents(rows, cols);
        assert_eq!(c.len(), 9, "{}", name);
    }
}

#[test]
fn test_merge_order_is_row_major() {
    let set = plan(10, 10, 4).unwrap();
    let order: Vec<&str> = set.merge_order().map(|t| t.name.as_str()).collect();
    assert_eq!(order, tiles::FOUR);
}

#[test]
fn test_short_axes_are_planned_not_rejected() {
    for &tile_count in SUPPORTED_TILE_COUNTS.iter() {
        for (rows, cols) in [(1, 1), (1, 3), (3, 1), (1, 10), (10, 3)] {
            let set = plan(rows, cols, tile_count).unwrap();
            assert!(set.covers_exactly(rows, cols), "{} tiles on {}x{}", tile_count, rows, cols);
        }
    }
}

#[test]
fn test_planning_is_deterministic() {
    for (rows, cols) in domains::ALL {
        assert_eq!(plan(rows, cols, 8).unwrap(), plan(rows, cols, 8).unwrap());
    }
}

#[test]
fn test_rejections() {
    assert!(matches!(plan(10, 10, 3), Err(TilingError::Configuration(_))));
    assert!(matches!(plan(10, 10, 16), Err(TilingError::Configuration(_))));
    assert!(matches!(plan(0, 10, 4), Err(TilingError::EmptyDomain { rows: 0, cols: 10 })));
    assert!(matches!(plan(10, 0, 8), Err(TilingError::EmptyDomain { rows: 10, cols: 0 })));
}
