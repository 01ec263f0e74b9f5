#![forbid(unsafe_code)]

use mxo_matrix::Matrix;
use serde::Serialize;

/// Absorbs engine-side noise only: the store round-trips bit-exactly,
/// so differences below this come from the computation itself.
pub const DEFAULT_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareError {
    ShapeMismatch {
        actual: (usize, usize),
        expected: (usize, usize),
    },
}

impl CompareError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::ShapeMismatch { .. } => "compare_shape_mismatch",
        }
    }
}

impl std::fmt::Display for CompareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShapeMismatch { actual, expected } => {
                write!(
                    f,
                    "shape mismatch actual={}x{} expected={}x{}",
                    actual.0, actual.1, expected.0, expected.1
                )
            }
        }
    }
}

impl std::error::Error for CompareError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MismatchLocation {
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub passed: bool,
    pub max_abs_difference: f64,
    pub first_mismatch: Option<MismatchLocation>,
    pub mismatch_count: usize,
}

/// Compares entries pairwise in row-major order. A pair matches iff
/// `(actual - expected).abs() <= tolerance`; a NaN difference never
/// matches. The scan always covers every entry so one run reports all
/// discrepancies, not just the first.
pub fn compare(
    actual: &Matrix,
    expected: &Matrix,
    tolerance: f64,
) -> Result<ComparisonResult, CompareError> {
    if actual.shape() != expected.shape() {
        return Err(CompareError::ShapeMismatch {
            actual: actual.shape(),
            expected: expected.shape(),
        });
    }

    let cols = actual.cols();
    let mut max_abs_difference = 0.0_f64;
    let mut mismatch_count = 0_usize;
    let mut first_mismatch = None;

    for (idx, (&got, &want)) in actual.values().iter().zip(expected.values()).enumerate() {
        let diff = (got - want).abs();
        if diff > max_abs_difference {
            max_abs_difference = diff;
        }
        if diff.is_nan() || diff > tolerance {
            mismatch_count += 1;
            if first_mismatch.is_none() {
                first_mismatch = Some(MismatchLocation {
                    row: idx / cols,
                    col: idx % cols,
                });
            }
        }
    }

    Ok(ComparisonResult {
        passed: mismatch_count == 0,
        max_abs_difference,
        first_mismatch,
        mismatch_count,
    })
}

#[cfg(test)]
mod tests {
    use super::{CompareError, DEFAULT_TOLERANCE, MismatchLocation, compare};
    use mxo_matrix::Matrix;

    fn matrix(rows: usize, cols: usize, values: &[f64]) -> Matrix {
        Matrix::from_values(rows, cols, values.to_vec()).expect("matrix")
    }

    #[test]
    fn shape_mismatch_is_refused_regardless_of_content() {
        let lhs = matrix(2, 3, &[0.0; 6]);
        let rhs = matrix(3, 2, &[0.0; 6]);
        let err = compare(&lhs, &rhs, DEFAULT_TOLERANCE).expect_err("shape mismatch");
        assert_eq!(
            err,
            CompareError::ShapeMismatch {
                actual: (2, 3),
                expected: (3, 2),
            }
        );
    }

    #[test]
    fn identical_matrices_pass_with_zero_difference() {
        let lhs = matrix(2, 2, &[1.0, -2.0, 0.0, 4.5]);
        let result = compare(&lhs, &lhs.clone(), 0.0).expect("comparable");
        assert!(result.passed);
        assert_eq!(result.max_abs_difference, 0.0);
        assert_eq!(result.mismatch_count, 0);
        assert!(result.first_mismatch.is_none());
    }

    #[test]
    fn reports_count_location_and_magnitude() {
        let actual = matrix(2, 3, &[1.0, 2.0, 3.5, 4.0, 6.0, 6.0]);
        let expected = matrix(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let result = compare(&actual, &expected, 0.25).expect("comparable");
        assert!(!result.passed);
        assert_eq!(result.mismatch_count, 2);
        assert_eq!(result.first_mismatch, Some(MismatchLocation { row: 0, col: 2 }));
        assert_eq!(result.max_abs_difference, 1.0);
    }

    #[test]
    fn difference_equal_to_tolerance_matches() {
        let actual = matrix(1, 1, &[1.25]);
        let expected = matrix(1, 1, &[1.0]);
        let at_bound = compare(&actual, &expected, 0.25).expect("comparable");
        assert!(at_bound.passed);
        assert_eq!(at_bound.max_abs_difference, 0.25);

        let below_bound = compare(&actual, &expected, 0.2).expect("comparable");
        assert!(!below_bound.passed);
        assert_eq!(below_bound.mismatch_count, 1);
    }

    #[test]
    fn tolerance_masks_sign_flips_only_below_the_threshold() {
        // A sign-dropping engine near zero: actual keeps the negative
        // input where expected has its absolute value. The pair within
        // tolerance of zero slips through; the larger one is flagged.
        let actual = matrix(1, 2, &[-5e-11, -2e-10]);
        let expected = matrix(1, 2, &[5e-11, 2e-10]);
        let result = compare(&actual, &expected, DEFAULT_TOLERANCE).expect("comparable");
        assert!(!result.passed);
        assert_eq!(result.mismatch_count, 1);
        assert_eq!(result.first_mismatch, Some(MismatchLocation { row: 0, col: 1 }));
        assert_eq!(result.max_abs_difference, 4e-10);
    }

    #[test]
    fn nan_entries_never_match() {
        let actual = matrix(1, 2, &[f64::NAN, 1.0]);
        let expected = matrix(1, 2, &[f64::NAN, 1.0]);
        let result = compare(&actual, &expected, f64::MAX).expect("comparable");
        assert!(!result.passed);
        assert_eq!(result.mismatch_count, 1);
        assert_eq!(result.first_mismatch, Some(MismatchLocation { row: 0, col: 0 }));
    }

    #[test]
    fn scan_does_not_stop_at_the_first_mismatch() {
        let actual = matrix(1, 4, &[9.0, 0.0, 9.0, 0.0]);
        let expected = matrix(1, 4, &[0.0, 0.0, 0.0, 8.0]);
        let result = compare(&actual, &expected, 0.5).expect("comparable");
        assert_eq!(result.mismatch_count, 3);
        assert_eq!(result.max_abs_difference, 9.0);
    }
}
