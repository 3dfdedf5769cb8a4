//! One DETR optimization step.
//!
//! Forward, backward, unscale, clip, reduce, then apply or skip:
//!
//! 1. The network runs on the batch and the set criterion produces a scalar
//!    loss, which is multiplied by the loss-scale policy's current scale.
//! 2. Gradients are copied to host buffers and divided by the scale.
//! 3. Gradients are clipped by global norm, then averaged across workers
//!    when data-parallel.
//! 4. If the policy reports overflow the update is skipped and logged,
//!    otherwise the optimizer applies it once per parameter group: the
//!    network's backbone parameters at the backbone rate, everything else at
//!    the base rate.
//!
//! The model is updated in place and stays intact when a step fails.

use std::collections::HashSet;
use std::marker::PhantomData;

use burn::module::{AutodiffModule, ParamId};
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;

use crate::config::{ParallelConfig, TrainingConfig};
use crate::error::{DetrError, Result};
use crate::host::scalar_value;
use crate::loss::SetCriterion;
use crate::matcher::{HungarianMatcher, Matcher};
use crate::nn::DetrNetwork;

use super::batch::DetrBatch;
use super::gradients::GradientSet;
use super::loss_scale::{build_loss_scale, LossScalePolicy};
use super::metrics::StepOutput;
use super::reducer::GradientReducer;
use super::schedule::LearningRates;

/// AdamW with the configured weight decay.
///
/// Gradient clipping is done globally by [`TrainStep`], not per parameter by
/// the optimizer.
pub fn adamw<B, M>(config: &TrainingConfig) -> impl Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    AdamWConfig::new()
        .with_weight_decay(config.weight_decay)
        .init::<B, M>()
}

/// Training step for a DETR network.
pub struct TrainStep<B, M, O, Mt = HungarianMatcher>
where
    B: AutodiffBackend,
    M: DetrNetwork<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
    Mt: Matcher,
{
    criterion: SetCriterion<Mt>,
    optimizer: O,
    loss_scale: Box<dyn LossScalePolicy>,
    reducer: Option<Box<dyn GradientReducer>>,
    clip_max_norm: f32,
    parallel: ParallelConfig,
    _marker: PhantomData<(B, M)>,
}

impl<B, M, O, Mt> TrainStep<B, M, O, Mt>
where
    B: AutodiffBackend,
    M: DetrNetwork<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
    Mt: Matcher,
{
    /// Create a step from a criterion, an optimizer and the training configuration.
    pub fn new(criterion: SetCriterion<Mt>, optimizer: O, config: &TrainingConfig) -> Result<Self> {
        config.validate().map_err(DetrError::config)?;
        Ok(Self {
            criterion,
            optimizer,
            loss_scale: build_loss_scale(&config.loss_scale),
            reducer: None,
            clip_max_norm: config.clip_max_norm,
            parallel: config.parallel.clone(),
            _marker: PhantomData,
        })
    }

    /// Attach the cross-worker reducer used in data-parallel mode.
    pub fn with_reducer(mut self, reducer: Box<dyn GradientReducer>) -> Result<Self> {
        if reducer.world_size() != self.parallel.device_count {
            return Err(DetrError::config(format!(
                "reducer spans {} workers, device_count is {}",
                reducer.world_size(),
                self.parallel.device_count
            )));
        }
        self.reducer = Some(reducer);
        Ok(self)
    }

    /// Replace the loss-scale policy chosen from configuration.
    pub fn with_loss_scale(mut self, policy: Box<dyn LossScalePolicy>) -> Self {
        self.loss_scale = policy;
        self
    }

    /// The set criterion.
    pub fn criterion(&self) -> &SetCriterion<Mt> {
        &self.criterion
    }

    /// Parallel settings of this worker.
    pub fn parallel(&self) -> &ParallelConfig {
        &self.parallel
    }

    /// Current loss scale.
    pub fn loss_scale(&self) -> f32 {
        self.loss_scale.scale()
    }

    /// Run one step, updating `model` in place.
    ///
    /// On overflow the model is left unchanged and `skipped` is set. On error
    /// the model keeps its state from before the step.
    pub fn step(
        &mut self,
        model: &mut M,
        batch: &DetrBatch<B>,
        lr: impl Into<LearningRates>,
    ) -> Result<StepOutput> {
        let lr = lr.into();
        let reducer = self.active_reducer()?;
        batch.validate()?;

        let output = model.forward(batch.images.clone(), batch.mask.clone());
        let loss = self.criterion.forward(&output, &batch.targets)?;
        let loss_value = scalar_value(loss.clone())?;

        let scale = self.loss_scale.scale();
        let scaled = if scale != 1.0 { loss * scale } else { loss };
        let params = GradientsParams::from_grads(scaled.backward(), &*model);

        let mut grads = GradientSet::collect::<B, M>(model, &params)?;
        if scale != 1.0 {
            grads.scale(1.0 / scale);
        }

        let clip = grads.clip_by_global_norm(self.clip_max_norm);
        if let Some(reducer) = reducer {
            reducer.all_reduce(&mut grads)?;
        }

        let overflow = self.loss_scale.detects_overflow() && !grads.is_finite();
        let apply = self.loss_scale.update(overflow);

        if apply {
            let backbone: HashSet<ParamId> = model.backbone_param_ids().into_iter().collect();
            let (backbone_grads, base_grads) = grads.partition(&backbone);

            let mut next = model.clone();
            for (group, rate) in [(base_grads, lr.base), (backbone_grads, lr.backbone)] {
                if group.is_empty() {
                    continue;
                }
                let params = group.into_params::<B, M>(&next);
                next = self.optimizer.step(rate, next, params);
            }
            *model = next;
        } else {
            log::warn!(
                "gradient overflow at loss scale {}, skipping update (next scale {})",
                scale,
                self.loss_scale.scale()
            );
        }

        Ok(StepOutput {
            loss: loss_value,
            gradient_norm: clip.global_norm,
            clipped: clip.clipped(),
            skipped: !apply,
            loss_scale: scale,
            learning_rate: lr.base,
            backbone_learning_rate: lr.backbone,
        })
    }

    fn active_reducer(&self) -> Result<Option<&dyn GradientReducer>> {
        if !self.parallel.is_distributed || self.parallel.device_count <= 1 {
            return Ok(None);
        }
        match &self.reducer {
            Some(reducer) => Ok(Some(reducer.as_ref())),
            None => Err(DetrError::Distributed {
                message: format!(
                    "rank {} is distributed over {} devices but has no reducer",
                    self.parallel.rank, self.parallel.device_count
                ),
            }),
        }
    }
}
