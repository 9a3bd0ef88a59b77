//! Shared test utilities for the tiling workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic grid generators with predictable values
//! - Work-directory fixtures that can count leftover tile files
//! - Approximate-equality assertions for float arrays
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{assert_allclose, create_test_cube, WorkDir};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Macro for element-wise closeness of two float slices.
///
/// Passes when `|a - b| <= atol + rtol * |b|` for every element, or both
/// elements are NaN.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_allclose;
///
/// assert_allclose!(&[1.0_f32, 2.0], &[1.0_f32, 2.0000001], 1e-6, 1e-8);
/// ```
#[macro_export]
macro_rules! assert_allclose {
    ($actual:expr, $desired:expr, $rtol:expr, $atol:expr) => {{
        let actual = $actual;
        let desired = $desired;
        assert_eq!(
            actual.len(),
            desired.len(),
            "assertion failed: lengths differ ({} vs {})",
            actual.len(),
            desired.len()
        );
        if let Some(index) = $crate::first_mismatch(actual, desired, $rtol, $atol) {
            panic!(
                "assertion failed: arrays not close at index {}: {:?} vs {:?} (rtol {}, atol {})",
                index, actual[index], desired[index], $rtol, $atol
            );
        }
    }};
}

/// Index of the first element where `actual` and `desired` are not close.
pub fn first_mismatch(actual: &[f32], desired: &[f32], rtol: f64, atol: f64) -> Option<usize> {
    actual.iter().zip(desired).position(|(&a, &d)| {
        if a.is_nan() && d.is_nan() {
            return false;
        }
        let (a, d) = (a as f64, d as f64);
        !((a - d).abs() <= atol + rtol * d.abs())
    })
}
