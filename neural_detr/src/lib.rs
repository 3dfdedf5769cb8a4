//! # neural_detr
//!
//! DETR set-prediction training core on Burn.
//!
//! This crate provides the pieces needed to train a DETR-style detector:
//! the bipartite-matching set criterion, the sine positional embedding, and
//! a training step with global-norm clipping, loss scaling and data-parallel
//! gradient reduction. The detector itself is supplied by the caller through
//! the [`nn::DetrNetwork`] trait.
//!
//! ## Features
//!
//! - **Set criterion**: Hungarian matching, weighted cross-entropy with a
//!   no-object class, L1 and GIoU box losses, auxiliary decoder supervision
//! - **Positional encoding**: `PositionEmbeddingSine` over padding masks
//! - **Training step**: clip by global norm, optional dynamic loss scale
//!   with overflow skip, all-reduce across worker threads
//! - **Trainer**: epoch loop, step-decay learning rate, checkpoint rotation
//!
//! ## Quick Start
//!
//! ```ignore
//! use neural_detr::prelude::*;
//! use burn::backend::{Autodiff, NdArray};
//!
//! type MyBackend = Autodiff<NdArray>;
//!
//! let config = TrainingConfig::new(SetCriterionConfig::new(91));
//! let criterion = SetCriterion::hungarian(config.criterion.clone(), config.matcher.clone())?;
//! let step = TrainStep::new(criterion, adamw::<MyBackend, MyNet>(&config), &config)?;
//! let mut trainer = DetrTrainer::new(step, config)?;
//!
//! let history = trainer.fit(&mut model, &batches)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! detr_core (pure math: boxes, assignment, norms)
//!     │
//!     ▼
//! neural_detr
//!   matcher ──► loss ──► training::TrainStep ──► training::DetrTrainer
//!                 ▲              │
//!   nn::DetrNetwork ─────────────┘
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): Standard library support
//! - `ndarray` (default): CPU backend using ndarray
//! - `wgpu`: GPU acceleration via WebGPU

#![warn(missing_docs)]
#![warn(clippy::all)]

mod host;

pub mod config;
pub mod error;
pub mod loss;
pub mod matcher;
pub mod nn;
pub mod training;

pub use config::{SetCriterionConfig, TrainingConfig};
pub use error::{DetrError, Result};
pub use loss::SetCriterion;
pub use nn::{DetrNetwork, DetrOutput, PositionEmbeddingSine};
pub use training::{DetrBatch, DetrTrainer, TrainStep};

pub use detr_core::BoxArray;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{
        LossScaleConfig, LossWeights, MatcherConfig, ParallelConfig, PositionEncodingConfig,
        SetCriterionConfig, TrainingConfig,
    };
    pub use crate::error::{DetrError, Result};
    pub use crate::loss::{LayerLosses, SetCriterion};
    pub use crate::matcher::{Assignment, HungarianMatcher, Matcher};
    pub use crate::nn::{
        post_process, DetrNetwork, DetrOutput, Detections, LayerPrediction,
        PositionEmbeddingSine,
    };
    pub use crate::training::{
        adamw, build_loss_scale, export_network, find_latest_checkpoint, import_network,
        load_network, save_network,
        Annotation, CheckpointRotation, DetectionTargets, DetrBatch, DetrTrainer,
        DynamicLossScale, GradientReducer, GradientSet, InProcessReducer, LossScalePolicy,
        LearningRates, NamedTensors, NoLossScale, PiecewiseConstantLr, ReduceGroup, StepOutput,
        TrainStep,
    };

    pub use detr_core::BoxArray;
}
