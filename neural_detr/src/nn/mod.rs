//! Network-facing pieces of the training core.
//!
//! This module provides:
//! - `DetrNetwork`: the interface a detector implements to be trained
//! - `DetrOutput`: per-decoder-layer predictions
//! - Encoders: the sine positional embedding fed to the transformer
//! - Post-processing of raw predictions into detections

pub mod encoder;
mod network;
mod postprocess;

pub use encoder::{resize_mask_nearest, PositionEmbeddingSine};
pub use network::{DetrNetwork, DetrOutput, LayerPrediction};
pub use postprocess::{post_process, Detections};
