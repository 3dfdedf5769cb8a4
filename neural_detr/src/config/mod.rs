//! Configuration types for neural_detr.
//!
//! Burn-style configuration structs for the set criterion, the matcher,
//! positional encoding, and the training loop.

mod criterion;
mod network;
mod training;

pub use criterion::{LossWeights, MatcherConfig, SetCriterionConfig};
pub use network::PositionEncodingConfig;
pub use training::{LossScaleConfig, ParallelConfig, TrainingConfig};
