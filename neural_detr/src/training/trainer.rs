//! Epoch loop around [`TrainStep`].

use std::path::PathBuf;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;

use crate::config::TrainingConfig;
use crate::error::{DetrError, Result};
use crate::matcher::{HungarianMatcher, Matcher};
use crate::nn::DetrNetwork;

use super::batch::DetrBatch;
use super::checkpoint::CheckpointRotation;
use super::metrics::{EpochSummary, LossMeter};
use super::schedule::{LearningRates, PiecewiseConstantLr};
use super::step::TrainStep;

/// DETR trainer.
///
/// Runs `start_epoch..epochs` over a fixed list of batches with the step
/// decay applied to both the base and the backbone learning rate, logs progress `log_per_epoch` times per epoch and,
/// on the main rank, writes a rotating checkpoint after each epoch.
pub struct DetrTrainer<B, M, O, Mt = HungarianMatcher>
where
    B: AutodiffBackend,
    M: DetrNetwork<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
    Mt: Matcher,
{
    step: TrainStep<B, M, O, Mt>,
    config: TrainingConfig,
    checkpoints: Option<CheckpointRotation>,
}

impl<B, M, O, Mt> DetrTrainer<B, M, O, Mt>
where
    B: AutodiffBackend,
    M: DetrNetwork<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
    Mt: Matcher,
{
    /// Create a trainer. Checkpoints go to `config.checkpoint_dir` on the main rank.
    pub fn new(step: TrainStep<B, M, O, Mt>, config: TrainingConfig) -> Result<Self> {
        config.validate().map_err(DetrError::config)?;
        let checkpoints = config.parallel.is_main_rank().then(|| {
            CheckpointRotation::new(PathBuf::from(&config.checkpoint_dir), config.keep_checkpoints)
        });
        Ok(Self {
            step,
            config,
            checkpoints,
        })
    }

    /// Disable checkpoint writing.
    pub fn without_checkpoints(mut self) -> Self {
        self.checkpoints = None;
        self
    }

    /// Training configuration.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// The underlying step.
    pub fn step(&self) -> &TrainStep<B, M, O, Mt> {
        &self.step
    }

    /// Train `model` in place on `batches` and return one summary per epoch.
    ///
    /// If a step fails, `model` keeps the state of the last completed step.
    pub fn fit(&mut self, model: &mut M, batches: &[DetrBatch<B>]) -> Result<Vec<EpochSummary>> {
        if batches.is_empty() {
            return Err(DetrError::InvalidData("no training batches".to_string()));
        }

        let steps_per_epoch = batches.len();
        let start_step = self.config.start_epoch * steps_per_epoch;
        let mut schedule = PiecewiseConstantLr::step_decay(
            self.config.learning_rate,
            self.config.lr_drop,
            steps_per_epoch,
        );
        schedule.seek(start_step);
        let mut backbone_schedule = PiecewiseConstantLr::step_decay(
            self.config.lr_backbone,
            self.config.lr_drop,
            steps_per_epoch,
        );
        backbone_schedule.seek(start_step);

        let log_interval = (steps_per_epoch / self.config.log_per_epoch.max(1)).max(1);
        let mut meter = LossMeter::new();
        let mut history = Vec::with_capacity(self.config.epochs - self.config.start_epoch);

        log::info!(
            "Training epochs {}..{} with {} batches per epoch",
            self.config.start_epoch,
            self.config.epochs,
            steps_per_epoch
        );

        for epoch in self.config.start_epoch..self.config.epochs {
            meter.reset();
            let mut skipped_steps = 0;

            for (i, batch) in batches.iter().enumerate() {
                let lr = LearningRates::new(schedule.next_lr(), backbone_schedule.next_lr());
                let start = Instant::now();
                let output = self.step.step(model, batch, lr)?;
                let elapsed = start.elapsed().as_secs_f32();

                meter.update(output.loss);
                if output.skipped {
                    skipped_steps += 1;
                }
                output.log("step");

                if i % log_interval == 0 {
                    let images_per_sec = if elapsed > 0.0 {
                        batch.batch_size() as f32 / elapsed
                    } else {
                        0.0
                    };
                    log::info!(
                        "epoch {} iter {}/{} loss {:.4} imgs/s {:.1} lr {:.2e} lr_backbone {:.2e}",
                        epoch,
                        i,
                        steps_per_epoch,
                        meter.average(),
                        images_per_sec,
                        lr.base,
                        lr.backbone
                    );
                }
            }

            let summary = EpochSummary {
                epoch,
                average_loss: meter.average(),
                skipped_steps,
                steps: steps_per_epoch,
            };
            log::info!(
                "epoch {} done: loss {:.4}, {} skipped",
                epoch,
                summary.average_loss,
                skipped_steps
            );

            if let Some(rotation) = self.checkpoints.as_mut() {
                rotation.save(&*model, epoch)?;
            }
            history.push(summary);
        }

        Ok(history)
    }
}
