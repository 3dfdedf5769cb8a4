//! Device-to-host tensor copies.

use burn::prelude::*;

use crate::error::{DetrError, Result};

/// Copy a float tensor to a host `Vec<f32>` in row-major order.
pub(crate) fn float_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| DetrError::InvalidData(format!("tensor readback failed: {:?}", e)))
}

/// Copy an int tensor to a host `Vec<i64>` in row-major order.
pub(crate) fn int_values<B: Backend, const D: usize>(
    tensor: Tensor<B, D, Int>,
) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| DetrError::InvalidData(format!("tensor readback failed: {:?}", e)))
}

/// Read a single-element tensor.
pub(crate) fn scalar_value<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<f32> {
    float_values(tensor)?
        .first()
        .copied()
        .ok_or_else(|| DetrError::InvalidData("expected a scalar tensor".to_string()))
}
