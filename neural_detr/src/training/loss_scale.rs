//! Loss scaling policies.
//!
//! The loss is multiplied by `scale()` before backpropagation and the
//! gradients are divided by it afterwards. A policy that detects overflow
//! can veto the optimizer step for that iteration.

use crate::config::LossScaleConfig;

/// Strategy for the loss scale used by the training step.
pub trait LossScalePolicy: Send {
    /// Current scale applied to the loss.
    fn scale(&self) -> f32;

    /// Report whether this step's gradients overflowed.
    ///
    /// Returns `true` if the optimizer step should be applied.
    fn update(&mut self, overflow: bool) -> bool;

    /// Whether the policy inspects gradients for overflow at all.
    fn detects_overflow(&self) -> bool;
}

/// Identity policy: scale 1, every step is applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLossScale;

impl LossScalePolicy for NoLossScale {
    fn scale(&self) -> f32 {
        1.0
    }

    fn update(&mut self, _overflow: bool) -> bool {
        true
    }

    fn detects_overflow(&self) -> bool {
        false
    }
}

/// Dynamic loss scale.
///
/// On overflow the scale is divided by `factor` (never below 1) and the step
/// is skipped. After `window` consecutive clean steps it is multiplied by
/// `factor`.
#[derive(Debug, Clone)]
pub struct DynamicLossScale {
    scale: f32,
    factor: f32,
    window: usize,
    clean_steps: usize,
}

impl DynamicLossScale {
    /// Create a dynamic policy.
    pub fn new(init_scale: f32, factor: f32, window: usize) -> Self {
        Self {
            scale: init_scale,
            factor,
            window,
            clean_steps: 0,
        }
    }

    /// Steps since the last overflow or growth.
    pub fn clean_steps(&self) -> usize {
        self.clean_steps
    }
}

impl Default for DynamicLossScale {
    fn default() -> Self {
        Self::new(4096.0, 2.0, 1000)
    }
}

impl LossScalePolicy for DynamicLossScale {
    fn scale(&self) -> f32 {
        self.scale
    }

    fn update(&mut self, overflow: bool) -> bool {
        if overflow {
            self.scale = (self.scale / self.factor).max(1.0);
            self.clean_steps = 0;
            return false;
        }

        self.clean_steps += 1;
        if self.clean_steps >= self.window {
            self.scale *= self.factor;
            self.clean_steps = 0;
        }
        true
    }

    fn detects_overflow(&self) -> bool {
        true
    }
}

/// Build the policy selected by `config`.
pub fn build_loss_scale(config: &LossScaleConfig) -> Box<dyn LossScalePolicy> {
    if config.dynamic {
        Box::new(DynamicLossScale::new(
            config.init_scale,
            config.scale_factor,
            config.scale_window,
        ))
    } else {
        Box::new(NoLossScale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_policy() {
        let mut policy = NoLossScale;
        assert_eq!(policy.scale(), 1.0);
        assert!(policy.update(true));
        assert!(!policy.detects_overflow());
    }

    #[test]
    fn test_dynamic_backoff_and_growth() {
        let mut policy = DynamicLossScale::new(8.0, 2.0, 3);

        assert!(!policy.update(true));
        assert_eq!(policy.scale(), 4.0);

        assert!(policy.update(false));
        assert!(policy.update(false));
        assert_eq!(policy.scale(), 4.0);
        assert!(policy.update(false));
        assert_eq!(policy.scale(), 8.0);
        assert_eq!(policy.clean_steps(), 0);
    }

    #[test]
    fn test_dynamic_scale_floor() {
        let mut policy = DynamicLossScale::new(1.0, 2.0, 10);
        policy.update(true);
        assert_eq!(policy.scale(), 1.0);
    }

    #[test]
    fn test_build_from_config() {
        let policy = build_loss_scale(&LossScaleConfig::new());
        assert_eq!(policy.scale(), 1.0);

        let policy = build_loss_scale(&LossScaleConfig::new().with_dynamic(true));
        assert_eq!(policy.scale(), 4096.0);
        assert!(policy.detects_overflow());
    }
}
