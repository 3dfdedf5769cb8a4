//! Loss functions for DETR set prediction.
//!
//! This module provides:
//! - Tensor box geometry: format conversion, pairwise IoU and generalized IoU
//! - Classification loss: cross-entropy with a down-weighted no-object class
//! - Box loss: L1 and GIoU over matched queries
//! - `SetCriterion`: per-layer composition and auxiliary-layer aggregation

pub mod box_ops;
mod boxes;
mod classification;
mod criterion;

pub use box_ops::{
    box_area, box_cxcywh_to_xyxy, box_xyxy_to_cxcywh, generalized_iou, matched_generalized_iou,
    pairwise_extreme, pairwise_iou, Extreme,
};
pub use boxes::BoxLoss;
pub use classification::ClassificationLoss;
pub use criterion::{LayerLosses, SetCriterion};
