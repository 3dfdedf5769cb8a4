//! Training infrastructure for DETR.
//!
//! This module provides:
//! - `TrainStep`: forward, backward, clip, reduce and apply for one batch
//! - `DetrTrainer`: epoch loop with progress logging and checkpoint rotation
//! - Host-side gradient buffers, loss-scale policies and cross-worker reduction
//! - Batches with padded ground truth
//! - Learning-rate schedule, metrics and checkpoint storage

mod batch;
mod checkpoint;
mod gradients;
mod loss_scale;
mod metrics;
mod param_paths;
mod reducer;
mod schedule;
mod step;
mod trainer;

pub use batch::{Annotation, DetectionTargets, DetrBatch};
pub use checkpoint::{
    checkpoint_exists, checkpoint_path, export_network, find_latest_checkpoint, import_network,
    load_network, save_network, CheckpointRotation, NamedTensor, NamedTensors, WRAPPED_PREFIX,
};
pub use gradients::{ClipReport, GradientSet, GradientSlot};
pub use loss_scale::{build_loss_scale, DynamicLossScale, LossScalePolicy, NoLossScale};
pub use metrics::{EpochSummary, LossMeter, StepOutput};
pub use reducer::{GradientReducer, InProcessReducer, ReduceGroup};
pub use schedule::{LearningRates, PiecewiseConstantLr};
pub use step::{adamw, TrainStep};
pub use trainer::DetrTrainer;
