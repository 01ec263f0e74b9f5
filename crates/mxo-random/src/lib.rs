#![forbid(unsafe_code)]

use mxo_matrix::{Matrix, MatrixError, element_count};
use serde::{Deserialize, Serialize};

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const MIX_CONST1: u64 = 0xBF58_476D_1CE4_E5B9;
const MIX_CONST2: u64 = 0x94D0_49BB_1331_11EB;

pub const DEFAULT_FIXTURE_SEED: u64 = 0xFACE_FEED_0DDB_A115;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpecError {
    EmptyShape { rows: usize, cols: usize },
    ShapeOverflow,
    RangeInverted { min: f64, max: f64 },
    RangeNotFinite { min: f64, max: f64 },
    SparsityOutOfRange(f64),
    Matrix(MatrixError),
}

impl SpecError {
    #[must_use]
    pub const fn reason_code(self) -> &'static str {
        match self {
            Self::EmptyShape { .. } => "fixture_spec_shape_empty",
            Self::ShapeOverflow => "fixture_spec_shape_overflow",
            Self::RangeInverted { .. } => "fixture_spec_range_inverted",
            Self::RangeNotFinite { .. } => "fixture_spec_range_not_finite",
            Self::SparsityOutOfRange(_) => "fixture_spec_sparsity_out_of_range",
            Self::Matrix(_) => "fixture_spec_matrix_invalid",
        }
    }
}

impl std::fmt::Display for SpecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyShape { rows, cols } => {
                write!(f, "fixture shape must be > 0 in both dimensions, got {rows}x{cols}")
            }
            Self::ShapeOverflow => write!(f, "fixture entry count overflows usize"),
            Self::RangeInverted { min, max } => {
                write!(f, "min_value {min} must be <= max_value {max}")
            }
            Self::RangeNotFinite { min, max } => {
                write!(f, "value range [{min}, {max}] must be finite")
            }
            Self::SparsityOutOfRange(sparsity) => {
                write!(f, "sparsity {sparsity} must lie in [0, 1]")
            }
            Self::Matrix(err) => write!(f, "matrix construction failed: {err}"),
        }
    }
}

impl std::error::Error for SpecError {}

impl From<MatrixError> for SpecError {
    fn from(err: MatrixError) -> Self {
        Self::Matrix(err)
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(MIX_CONST1);
    x = (x ^ (x >> 27)).wrapping_mul(MIX_CONST2);
    x ^ (x >> 31)
}

/// Counter-based deterministic stream: the seed never mutates, so the
/// same (seed, counter) pair always reproduces the same tail of draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeterministicRng {
    stream_seed: u64,
    counter: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            stream_seed: seed,
            counter: 0,
        }
    }

    #[must_use]
    pub const fn from_state(seed: u64, counter: u64) -> Self {
        Self {
            stream_seed: seed,
            counter,
        }
    }

    #[must_use]
    pub const fn state(self) -> (u64, u64) {
        (self.stream_seed, self.counter)
    }

    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(1);
        splitmix64(
            self.stream_seed
                .wrapping_add(self.counter.wrapping_mul(GOLDEN_GAMMA)),
        )
    }

    /// Uniform draw in [0, 1) from the high 53 bits, so every value is
    /// exactly representable and 1.0 is never produced.
    #[must_use]
    pub fn next_f64(&mut self) -> f64 {
        let sample = self.next_u64() >> 11;
        sample as f64 / (1u64 << 53) as f64
    }
}

/// Configuration for one generated fixture. Entries are uniform over
/// [min_value, max_value), except a `sparsity` fraction forced to 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixtureSpec {
    pub rows: usize,
    pub cols: usize,
    pub min_value: f64,
    pub max_value: f64,
    pub sparsity: f64,
    pub seed: u64,
}

impl FixtureSpec {
    #[must_use]
    pub fn uniform(rows: usize, cols: usize, min_value: f64, max_value: f64, seed: u64) -> Self {
        Self {
            rows,
            cols,
            min_value,
            max_value,
            sparsity: 0.0,
            seed,
        }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_sparsity(mut self, sparsity: f64) -> Self {
        self.sparsity = sparsity;
        self
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.rows == 0 || self.cols == 0 {
            return Err(SpecError::EmptyShape {
                rows: self.rows,
                cols: self.cols,
            });
        }
        if self.rows.checked_mul(self.cols).is_none() {
            return Err(SpecError::ShapeOverflow);
        }
        if !self.min_value.is_finite() || !self.max_value.is_finite() {
            return Err(SpecError::RangeNotFinite {
                min: self.min_value,
                max: self.max_value,
            });
        }
        if self.min_value > self.max_value {
            return Err(SpecError::RangeInverted {
                min: self.min_value,
                max: self.max_value,
            });
        }
        if !(0.0..=1.0).contains(&self.sparsity) {
            return Err(SpecError::SparsityOutOfRange(self.sparsity));
        }
        Ok(())
    }
}

/// Generates the matrix a spec describes. Identical spec (seed included)
/// always yields a bit-identical matrix.
pub fn generate(spec: &FixtureSpec) -> Result<Matrix, SpecError> {
    spec.validate()?;

    let count = element_count(spec.rows, spec.cols)?;
    let span = spec.max_value - spec.min_value;
    let mut rng = DeterministicRng::new(spec.seed);
    let mut values = Vec::with_capacity(count);

    for _ in 0..count {
        // The mask draw is taken unconditionally to keep the value
        // stream aligned across specs that differ only in sparsity.
        let masked = rng.next_f64() < spec.sparsity;
        if masked {
            values.push(0.0);
        } else {
            values.push(spec.min_value + rng.next_f64() * span);
        }
    }

    Ok(Matrix::from_values(spec.rows, spec.cols, values)?)
}
