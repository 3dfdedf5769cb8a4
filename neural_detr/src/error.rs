//! Error types for neural_detr.

use thiserror::Error;

/// Errors that can occur while computing DETR losses or running training steps.
#[derive(Error, Debug)]
pub enum DetrError {
    /// Tensor shape mismatch.
    #[error("tensor shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Where the mismatch was detected.
        context: String,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid or corrupted data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The bipartite assignment could not be solved.
    #[error("assignment failed: {0}")]
    Assignment(#[from] detr_core::DetrCoreError),

    /// Gradient reduction across workers failed.
    #[error("distributed reduction failed: {message}")]
    Distributed {
        /// Description of the error.
        message: String,
    },

    /// Checkpoint store error.
    #[error("checkpoint error: {message}")]
    Checkpoint {
        /// Description of the error.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Burn recorder error.
    #[error("recorder error: {0}")]
    Recorder(String),
}

impl DetrError {
    /// Shorthand for a [`DetrError::ShapeMismatch`].
    pub fn shape(context: impl Into<String>, expected: &[usize], got: &[usize]) -> Self {
        DetrError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Shorthand for a [`DetrError::InvalidConfig`].
    pub fn config(message: impl Into<String>) -> Self {
        DetrError::InvalidConfig {
            message: message.into(),
        }
    }
}

impl From<burn::record::RecorderError> for DetrError {
    fn from(err: burn::record::RecorderError) -> Self {
        DetrError::Recorder(format!("{:?}", err))
    }
}

/// Result type for neural_detr operations.
pub type Result<T> = std::result::Result<T, DetrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_display() {
        let err = DetrError::shape("pred_boxes", &[2, 4, 4], &[2, 5, 4]);
        assert_eq!(
            err.to_string(),
            "tensor shape mismatch in pred_boxes: expected [2, 4, 4], got [2, 5, 4]"
        );
    }

    #[test]
    fn test_core_error_converts() {
        let core = detr_core::DetrCoreError::NonFiniteCost { row: 1, col: 2 };
        let err: DetrError = core.into();
        assert!(matches!(err, DetrError::Assignment(_)));
        assert!(err.to_string().contains("non-finite cost at (1, 2)"));
    }
}
