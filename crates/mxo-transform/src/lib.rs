#![forbid(unsafe_code)]

use mxo_matrix::Matrix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    UnknownTransform(String),
}

impl TransformError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::UnknownTransform(_) => "transform_unknown_identifier",
        }
    }
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTransform(token) => write!(f, "unknown transform '{token}'"),
        }
    }
}

impl std::error::Error for TransformError {}

/// Registry of pure entry-level transforms. Each variant is a total
/// `f64 -> f64` function; adding one touches only this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryTransform {
    #[serde(rename = "elementwise-abs")]
    Abs,
    #[serde(rename = "elementwise-negative")]
    Negative,
    #[serde(rename = "elementwise-sign")]
    Sign,
    #[serde(rename = "elementwise-square")]
    Square,
    #[serde(rename = "elementwise-sqrt")]
    Sqrt,
}

impl UnaryTransform {
    #[must_use]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Abs => x.abs(),
            Self::Negative => -x,
            Self::Sign => {
                if x.is_nan() {
                    f64::NAN
                } else if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Self::Square => x * x,
            Self::Sqrt => x.sqrt(),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Abs => "elementwise-abs",
            Self::Negative => "elementwise-negative",
            Self::Sign => "elementwise-sign",
            Self::Square => "elementwise-square",
            Self::Sqrt => "elementwise-sqrt",
        }
    }

    pub fn parse(token: &str) -> Result<Self, TransformError> {
        match token.trim() {
            "elementwise-abs" => Ok(Self::Abs),
            "elementwise-negative" => Ok(Self::Negative),
            "elementwise-sign" => Ok(Self::Sign),
            "elementwise-square" => Ok(Self::Square),
            "elementwise-sqrt" => Ok(Self::Sqrt),
            other => Err(TransformError::UnknownTransform(other.to_string())),
        }
    }
}

/// Reference computation: applies the transform entry by entry,
/// sharing no code with any engine under test.
#[must_use]
pub fn compute_expected(input: &Matrix, transform: UnaryTransform) -> Matrix {
    input.map(|x| transform.apply(x))
}
