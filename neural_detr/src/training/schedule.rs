//! Learning-rate schedule.

/// Learning rates of one step: the base group and the backbone group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRates {
    /// Rate of every parameter outside the backbone.
    pub base: f64,
    /// Rate of [`DetrNetwork::backbone_param_ids`](crate::nn::DetrNetwork::backbone_param_ids).
    pub backbone: f64,
}

impl LearningRates {
    /// Separate base and backbone rates.
    pub fn new(base: f64, backbone: f64) -> Self {
        Self { base, backbone }
    }
}

impl From<f64> for LearningRates {
    /// The same rate for both groups.
    fn from(lr: f64) -> Self {
        Self::new(lr, lr)
    }
}

/// Piecewise-constant learning rate.
///
/// `boundaries[i]` is the first step at which `values[i + 1]` applies.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseConstantLr {
    boundaries: Vec<usize>,
    values: Vec<f64>,
    step: usize,
}

impl PiecewiseConstantLr {
    /// Create a schedule. `values` must have one more entry than `boundaries`.
    pub fn new(boundaries: Vec<usize>, values: Vec<f64>) -> Result<Self, String> {
        if values.len() != boundaries.len() + 1 {
            return Err(format!(
                "{} boundaries need {} values, got {}",
                boundaries.len(),
                boundaries.len() + 1,
                values.len()
            ));
        }
        if boundaries.windows(2).any(|w| w[0] > w[1]) {
            return Err("boundaries must be non-decreasing".to_string());
        }
        Ok(Self {
            boundaries,
            values,
            step: 0,
        })
    }

    /// The DETR step decay: `lr` for the first `lr_drop` epochs, `lr * 0.1` afterwards.
    pub fn step_decay(lr: f64, lr_drop: usize, steps_per_epoch: usize) -> Self {
        Self {
            boundaries: vec![lr_drop * steps_per_epoch],
            values: vec![lr, lr * 0.1],
            step: 0,
        }
    }

    /// Learning rate at `step`.
    pub fn lr_at(&self, step: usize) -> f64 {
        let segment = self.boundaries.iter().take_while(|&&b| step >= b).count();
        self.values[segment]
    }

    /// Learning rate for the current step, then advance.
    pub fn next_lr(&mut self) -> f64 {
        let lr = self.lr_at(self.step);
        self.step += 1;
        lr
    }

    /// Jump to `step`, e.g. when resuming.
    pub fn seek(&mut self, step: usize) {
        self.step = step;
    }

    /// Current step.
    pub fn current_step(&self) -> usize {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_decay() {
        let schedule = PiecewiseConstantLr::step_decay(1e-4, 2, 10);
        assert_eq!(schedule.lr_at(0), 1e-4);
        assert_eq!(schedule.lr_at(19), 1e-4);
        assert!((schedule.lr_at(20) - 1e-5).abs() < 1e-12);
        assert!((schedule.lr_at(1000) - 1e-5).abs() < 1e-12);
    }

    #[test]
    fn test_next_lr_advances() {
        let mut schedule = PiecewiseConstantLr::new(vec![1, 3], vec![3.0, 2.0, 1.0]).unwrap();
        let lrs: Vec<f64> = (0..4).map(|_| schedule.next_lr()).collect();
        assert_eq!(lrs, vec![3.0, 2.0, 2.0, 1.0]);
        assert_eq!(schedule.current_step(), 4);

        schedule.seek(0);
        assert_eq!(schedule.next_lr(), 3.0);
    }

    #[test]
    fn test_backbone_schedule_drops_with_base() {
        let mut base = PiecewiseConstantLr::step_decay(1e-4, 1, 2);
        let mut backbone = PiecewiseConstantLr::step_decay(1e-5, 1, 2);
        let rates: Vec<LearningRates> = (0..3)
            .map(|_| LearningRates::new(base.next_lr(), backbone.next_lr()))
            .collect();

        assert_eq!(rates[1], LearningRates::new(1e-4, 1e-5));
        assert!((rates[2].base - 1e-5).abs() < 1e-12);
        assert!((rates[2].backbone - 1e-6).abs() < 1e-12);
        assert_eq!(LearningRates::from(0.5), LearningRates::new(0.5, 0.5));
    }

    #[test]
    fn test_invalid_schedule() {
        assert!(PiecewiseConstantLr::new(vec![1], vec![1.0]).is_err());
        assert!(PiecewiseConstantLr::new(vec![3, 1], vec![1.0, 2.0, 3.0]).is_err());
    }
}
