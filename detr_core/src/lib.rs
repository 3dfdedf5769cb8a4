//! # detr_core
//!
//! Tensor-free math behind DETR set-prediction training.
//!
//! Everything here works on plain slices and `[f32; 4]` boxes so it can be
//! used on the host side of a training step (matching, gradient bookkeeping)
//! without pulling in a tensor backend. The differentiable counterparts live
//! in `neural_detr`.
//!
//! ## Features
//!
//! - **no_std compatible**: only needs `alloc`
//! - **Box geometry**: center-size / corner conversion, IoU and generalized IoU
//! - **Linear assignment**: exact minimum-cost bipartite matching for
//!   rectangular cost matrices (the Hungarian step of the set criterion)
//! - **Gradient norms**: global L2 norm and clip coefficient arithmetic
//!
//! ## Feature Flags
//!
//! - `std` (default): implements `std::error::Error` for [`DetrCoreError`]
//!
//! ## Usage
//!
//! ```
//! use detr_core::prelude::*;
//!
//! let a = center_size_to_corners([0.5, 0.5, 0.2, 0.2]);
//! let b = center_size_to_corners([0.55, 0.5, 0.2, 0.2]);
//! assert!(generalized_iou(a, b) > 0.5);
//!
//! let cost = [4.0, 1.0, 3.0, 2.0, 0.0, 5.0, 3.0, 2.0, 2.0];
//! let pairs = linear_sum_assignment(&cost, 3, 3).unwrap();
//! assert_eq!(pairs, vec![(0, 1), (1, 0), (2, 2)]);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod assignment;
pub mod boxes;
pub mod error;
pub mod norm;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::assignment::{assignment_cost, linear_sum_assignment};
    pub use crate::boxes::{
        box_area, box_iou, center_size_to_corners, corners_to_center_size, generalized_iou,
        l1_distance, BoxArray, MAX_EXTENT,
    };
    pub use crate::error::DetrCoreError;
    pub use crate::norm::{clip_coefficient, global_norm, squared_norm};
}

pub use assignment::{assignment_cost, linear_sum_assignment};
pub use boxes::{
    box_area, box_iou, center_size_to_corners, corners_to_center_size, generalized_iou,
    l1_distance, BoxArray, MAX_EXTENT,
};
pub use error::DetrCoreError;
pub use norm::{clip_coefficient, global_norm, squared_norm};
