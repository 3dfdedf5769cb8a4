//! Loss and matcher configuration types.

use burn::config::Config;

/// Linear weights of the three loss terms.
#[derive(Config, Debug)]
pub struct LossWeights {
    /// Weight of the classification (cross-entropy) term.
    #[config(default = 1.0)]
    pub loss_ce: f32,

    /// Weight of the L1 box term.
    #[config(default = 5.0)]
    pub loss_bbox: f32,

    /// Weight of the generalized-IoU term.
    #[config(default = 2.0)]
    pub loss_giou: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self::new()
    }
}

impl LossWeights {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        for (name, w) in [
            ("loss_ce", self.loss_ce),
            ("loss_bbox", self.loss_bbox),
            ("loss_giou", self.loss_giou),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(format!("{} must be finite and non-negative", name));
            }
        }
        Ok(())
    }
}

/// Configuration for [`SetCriterion`](crate::loss::SetCriterion).
#[derive(Config, Debug)]
pub struct SetCriterionConfig {
    /// Number of real object classes, excluding the no-object class.
    pub num_classes: usize,

    /// Classification weight of the no-object class.
    #[config(default = 0.1)]
    pub eos_coef: f32,

    /// Loss term weights.
    #[config(default = "LossWeights::new()")]
    pub weights: LossWeights,

    /// Supervise every decoder layer and sum the per-layer losses.
    #[config(default = true)]
    pub aux_loss: bool,

    /// Number of decoder layers carried by auxiliary predictions.
    #[config(default = 6)]
    pub num_decoder_layers: usize,
}

impl Default for SetCriterionConfig {
    fn default() -> Self {
        Self::new(91)
    }
}

impl SetCriterionConfig {
    /// Width of the class logits: real classes plus no-object.
    #[inline]
    pub fn num_logits(&self) -> usize {
        self.num_classes + 1
    }

    /// Number of prediction layers the criterion expects.
    #[inline]
    pub fn expected_layers(&self) -> usize {
        if self.aux_loss {
            self.num_decoder_layers
        } else {
            1
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_classes == 0 {
            return Err("num_classes must be positive".to_string());
        }
        if !(self.eos_coef > 0.0 && self.eos_coef.is_finite()) {
            return Err("eos_coef must be positive".to_string());
        }
        if self.aux_loss && self.num_decoder_layers == 0 {
            return Err("num_decoder_layers must be positive with aux_loss".to_string());
        }
        self.weights.validate()
    }
}

/// Cost weights of the Hungarian matcher.
#[derive(Config, Debug)]
pub struct MatcherConfig {
    /// Weight of the negative class probability.
    #[config(default = 1.0)]
    pub cost_class: f32,

    /// Weight of the L1 box distance.
    #[config(default = 5.0)]
    pub cost_bbox: f32,

    /// Weight of the negative generalized IoU.
    #[config(default = 2.0)]
    pub cost_giou: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MatcherConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cost_class == 0.0 && self.cost_bbox == 0.0 && self.cost_giou == 0.0 {
            return Err("all matcher costs can't be 0".to_string());
        }
        Ok(())
    }
}
