//! Error types for detr_core operations.
//!
//! A plain enum with a hand-written `Display` so the crate stays dependency free.

use core::fmt;

/// Errors that can occur in detr_core operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetrCoreError {
    /// A flat matrix did not have `rows * cols` entries.
    DimensionMismatch {
        /// Number of entries implied by the declared dimensions.
        expected: usize,
        /// Number of entries actually supplied.
        got: usize,
    },
    /// A cost matrix entry was NaN or infinite.
    NonFiniteCost {
        /// Row of the offending entry.
        row: usize,
        /// Column of the offending entry.
        col: usize,
    },
}

impl fmt::Display for DetrCoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetrCoreError::DimensionMismatch { expected, got } => {
                write!(f, "matrix has {} entries, expected {}", got, expected)
            }
            DetrCoreError::NonFiniteCost { row, col } => {
                write!(f, "non-finite cost at ({}, {})", row, col)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DetrCoreError {}
