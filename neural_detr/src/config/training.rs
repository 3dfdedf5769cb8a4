//! Training configuration types.

use burn::config::Config;

use super::{MatcherConfig, PositionEncodingConfig, SetCriterionConfig};

/// Data-parallel execution context.
///
/// Passed explicitly to the training step instead of being read from
/// process-global state.
#[derive(Config, Debug)]
pub struct ParallelConfig {
    /// Whether gradients are reduced across workers.
    #[config(default = false)]
    pub is_distributed: bool,

    /// Number of data-parallel workers.
    #[config(default = 1)]
    pub device_count: usize,

    /// Divide reduced gradients by `device_count`.
    #[config(default = true)]
    pub gradients_mean: bool,

    /// Rank of this worker in `[0, device_count)`.
    #[config(default = 0)]
    pub rank: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelConfig {
    /// Configuration for worker `rank` of `device_count`.
    pub fn distributed(device_count: usize, rank: usize) -> Self {
        Self::new()
            .with_is_distributed(true)
            .with_device_count(device_count)
            .with_rank(rank)
    }

    /// Whether this worker writes checkpoints.
    #[inline]
    pub fn is_main_rank(&self) -> bool {
        self.rank == 0
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.device_count == 0 {
            return Err("device_count must be positive".to_string());
        }
        if self.rank >= self.device_count {
            return Err(format!(
                "rank {} out of range for {} devices",
                self.rank, self.device_count
            ));
        }
        Ok(())
    }
}

/// Loss scaling policy selection.
#[derive(Config, Debug)]
pub struct LossScaleConfig {
    /// Use a dynamic, overflow-detecting scale instead of the identity.
    #[config(default = false)]
    pub dynamic: bool,

    /// Initial scale of the dynamic policy.
    #[config(default = 4096.0)]
    pub init_scale: f32,

    /// Growth and back-off factor.
    #[config(default = 2.0)]
    pub scale_factor: f32,

    /// Clean steps required before the scale grows.
    #[config(default = 1000)]
    pub scale_window: usize,
}

impl Default for LossScaleConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LossScaleConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.dynamic {
            if !(self.init_scale >= 1.0 && self.init_scale.is_finite()) {
                return Err("init_scale must be finite and >= 1".to_string());
            }
            if !(self.scale_factor > 1.0) {
                return Err("scale_factor must be greater than 1".to_string());
            }
            if self.scale_window == 0 {
                return Err("scale_window must be positive".to_string());
            }
        }
        Ok(())
    }
}

/// Configuration for the DETR trainer.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Set criterion configuration.
    pub criterion: SetCriterionConfig,

    /// Matcher cost weights.
    #[config(default = "MatcherConfig::new()")]
    pub matcher: MatcherConfig,

    /// Positional encoding configuration.
    #[config(default = "PositionEncodingConfig::new()")]
    pub position: PositionEncodingConfig,

    /// Data-parallel context.
    #[config(default = "ParallelConfig::new()")]
    pub parallel: ParallelConfig,

    /// Loss scaling policy.
    #[config(default = "LossScaleConfig::new()")]
    pub loss_scale: LossScaleConfig,

    /// Base learning rate.
    #[config(default = 1e-4)]
    pub learning_rate: f64,

    /// Learning rate of the backbone parameters (0 freezes them).
    #[config(default = 1e-5)]
    pub lr_backbone: f64,

    /// AdamW weight decay.
    #[config(default = 1e-4)]
    pub weight_decay: f32,

    /// Number of training epochs.
    #[config(default = 300)]
    pub epochs: usize,

    /// First epoch to run, for resumed runs.
    #[config(default = 0)]
    pub start_epoch: usize,

    /// Epoch after which the learning rate drops by 10x.
    #[config(default = 200)]
    pub lr_drop: usize,

    /// Global gradient-norm clipping threshold (0 = no clipping).
    #[config(default = 0.1)]
    pub clip_max_norm: f32,

    /// Number of progress lines logged per epoch.
    #[config(default = 50)]
    pub log_per_epoch: usize,

    /// Number of checkpoints kept on disk.
    #[config(default = 4)]
    pub keep_checkpoints: usize,

    /// Directory checkpoints are written to.
    #[config(default = "String::from(\"outputs\")")]
    pub checkpoint_dir: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new(SetCriterionConfig::default())
    }
}

impl TrainingConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.criterion.validate()?;
        self.matcher.validate()?;
        self.position.validate()?;
        self.parallel.validate()?;
        self.loss_scale.validate()?;

        if self.learning_rate <= 0.0 {
            return Err("learning_rate must be positive".to_string());
        }
        if !(self.lr_backbone >= 0.0 && self.lr_backbone.is_finite()) {
            return Err("lr_backbone must be finite and non-negative".to_string());
        }
        if self.clip_max_norm < 0.0 {
            return Err("clip_max_norm must be non-negative".to_string());
        }
        if self.epochs == 0 {
            return Err("epochs must be positive".to_string());
        }
        if self.start_epoch >= self.epochs {
            return Err(format!(
                "start_epoch {} must be below epochs {}",
                self.start_epoch, self.epochs
            ));
        }
        if self.keep_checkpoints == 0 {
            return Err("keep_checkpoints must be positive".to_string());
        }

        Ok(())
    }
}
