//! Training metrics and step outputs.

/// Outcome of a single training step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepOutput {
    /// Unscaled forward loss.
    pub loss: f32,
    /// Global gradient norm before clipping.
    pub gradient_norm: f32,
    /// Whether gradients were clipped.
    pub clipped: bool,
    /// Whether the optimizer step was skipped on overflow.
    pub skipped: bool,
    /// Loss scale used for this step.
    pub loss_scale: f32,
    /// Base learning rate applied.
    pub learning_rate: f64,
    /// Backbone learning rate applied.
    pub backbone_learning_rate: f64,
}

impl StepOutput {
    /// Log the step at debug level.
    pub fn log(&self, prefix: &str) {
        log::debug!(
            "{} loss={:.6} grad_norm={:.4} clipped={} skipped={} scale={} lr={:.2e} lr_backbone={:.2e}",
            prefix,
            self.loss,
            self.gradient_norm,
            self.clipped,
            self.skipped,
            self.loss_scale,
            self.learning_rate,
            self.backbone_learning_rate,
        );
    }
}

/// Running mean of the loss over an epoch.
#[derive(Debug, Clone, Default)]
pub struct LossMeter {
    sum: f64,
    count: usize,
}

impl LossMeter {
    /// Create an empty meter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one loss value. Non-finite values are not counted.
    pub fn update(&mut self, loss: f32) {
        if loss.is_finite() {
            self.sum += loss as f64;
            self.count += 1;
        }
    }

    /// Mean of recorded values, 0 when empty.
    pub fn average(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }

    /// Number of recorded values.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Forget all values.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Summary of one training epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochSummary {
    /// Epoch index.
    pub epoch: usize,
    /// Mean loss over applied and skipped steps.
    pub average_loss: f32,
    /// Steps whose update was skipped.
    pub skipped_steps: usize,
    /// Steps in the epoch.
    pub steps: usize,
}
