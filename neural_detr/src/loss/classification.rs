//! Weighted cross-entropy over query class logits.

use burn::prelude::*;
use burn::tensor::activation::log_softmax;

/// Softmax cross-entropy with a down-weighted no-object class.
///
/// Real classes have weight 1 and the trailing no-object class has weight
/// `eos_coef`. The reduction is the weighted mean over every query:
/// `sum(w[t_i] * -log p_i[t_i]) / sum(w[t_i])`.
#[derive(Debug, Clone)]
pub struct ClassificationLoss {
    class_weights: Vec<f32>,
}

impl ClassificationLoss {
    /// Create the loss for `num_classes` real classes plus no-object.
    pub fn new(num_classes: usize, eos_coef: f32) -> Self {
        let mut class_weights = vec![1.0f32; num_classes + 1];
        class_weights[num_classes] = eos_coef;
        Self { class_weights }
    }

    /// Per-class weights, no-object last.
    pub fn class_weights(&self) -> &[f32] {
        &self.class_weights
    }

    /// Compute the loss.
    ///
    /// Input: logits `[B, Q, C+1]`, target class indices `[B, Q]`
    /// Output: scalar loss `[1]`
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 3>,
        targets: Tensor<B, 2, Int>,
    ) -> Tensor<B, 1> {
        let [batch, queries, classes] = logits.dims();
        let n = batch * queries;
        let device = logits.device();

        let log_probs = log_softmax(logits.reshape([n, classes]), 1);
        let targets = targets.reshape([n]);

        let picked = log_probs
            .gather(1, targets.clone().reshape([n, 1]))
            .reshape([n]);

        let weights = Tensor::<B, 1>::from_data(self.class_weights.as_slice(), &device)
            .select(0, targets);

        (picked * weights.clone()).sum().neg() / weights.sum()
    }
}
