//! Bipartite matching between predicted queries and ground-truth objects.
//!
//! The matcher decides which queries are supervised as positives. Its
//! outputs are constants for backpropagation: the Hungarian matcher runs on
//! host copies of detached predictions and builds fresh tensors.

use burn::prelude::*;
use burn::tensor::activation::softmax;

use detr_core::{center_size_to_corners, generalized_iou, l1_distance, linear_sum_assignment, BoxArray};

use crate::config::MatcherConfig;
use crate::error::{DetrError, Result};
use crate::host::{float_values, int_values};
use crate::nn::LayerPrediction;
use crate::training::DetectionTargets;

/// Substitute for NaN or infinite matching costs.
///
/// Keeps the assignment solvable when degenerate boxes produce undefined IoU.
pub const NON_FINITE_COST: f32 = 1e6;

/// Per-query supervision targets produced by a [`Matcher`].
#[derive(Debug, Clone)]
pub struct Assignment<B: Backend> {
    /// Target class per query `[B, Q]`; `num_classes` for unmatched queries.
    pub target_classes: Tensor<B, 2, Int>,
    /// Target box per query `[B, Q, 4]`; zeros for unmatched queries.
    pub target_boxes: Tensor<B, 3>,
    /// 1 where the query was matched to a real object `[B, Q]`.
    pub valid: Tensor<B, 2>,
    /// Number of matched queries in the batch.
    pub num_matched: usize,
}

impl<B: Backend> Assignment<B> {
    /// Cut all three tensors out of the autodiff graph.
    pub fn detach(self) -> Self {
        Self {
            target_classes: self.target_classes,
            target_boxes: self.target_boxes.detach(),
            valid: self.valid.detach(),
            num_matched: self.num_matched,
        }
    }
}

/// Assigns ground-truth objects to predicted queries.
pub trait Matcher {
    /// Match one layer's predictions against the padded ground truth.
    fn assign<B: Backend>(
        &self,
        prediction: &LayerPrediction<B>,
        targets: &DetectionTargets<B>,
    ) -> Result<Assignment<B>>;
}

/// Optimal one-to-one matching under a weighted class / L1 / GIoU cost.
///
/// For query `p` and object `g` the cost is
/// `cost_class * -prob[p][label_g] + cost_bbox * L1(p, g) + cost_giou * -GIoU(p, g)`.
#[derive(Debug, Clone)]
pub struct HungarianMatcher {
    config: MatcherConfig,
}

impl Default for HungarianMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

impl HungarianMatcher {
    /// Create a matcher with the given cost weights.
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Matcher configuration.
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    fn pair_cost(&self, class_prob: f32, pred: BoxArray, gt: BoxArray) -> f32 {
        let giou = generalized_iou(center_size_to_corners(pred), center_size_to_corners(gt));
        let cost = self.config.cost_class * -class_prob
            + self.config.cost_bbox * l1_distance(pred, gt)
            + self.config.cost_giou * -giou;
        if cost.is_finite() {
            cost
        } else {
            NON_FINITE_COST
        }
    }
}

impl Matcher for HungarianMatcher {
    fn assign<B: Backend>(
        &self,
        prediction: &LayerPrediction<B>,
        targets: &DetectionTargets<B>,
    ) -> Result<Assignment<B>> {
        let [batch, queries, classes] = prediction.logits.dims();
        let num_classes = classes - 1;
        let [tb, slots] = targets.dims();
        if tb != batch {
            return Err(DetrError::shape("matcher targets", &[batch, slots], &[tb, slots]));
        }
        let device = prediction.logits.device();

        let probs = float_values(softmax(prediction.logits.clone().detach(), 2))?;
        let pred_boxes = float_values(prediction.boxes.clone().detach())?;
        let gt_boxes = float_values(targets.boxes.clone())?;
        let gt_labels = int_values(targets.labels.clone())?;
        let gt_valid = float_values(targets.valid.clone())?;

        let mut target_classes = vec![num_classes as i64; batch * queries];
        let mut target_boxes = vec![0.0f32; batch * queries * 4];
        let mut valid = vec![0.0f32; batch * queries];
        let mut num_matched = 0usize;

        let box_at = |data: &[f32], idx: usize| -> BoxArray {
            [data[idx * 4], data[idx * 4 + 1], data[idx * 4 + 2], data[idx * 4 + 3]]
        };

        for i in 0..batch {
            let objects: Vec<usize> = (0..slots)
                .filter(|&s| gt_valid[i * slots + s] > 0.5)
                .collect();
            if objects.is_empty() {
                continue;
            }

            let mut labels = Vec::with_capacity(objects.len());
            for &s in &objects {
                let label = gt_labels[i * slots + s];
                if label < 0 || label as usize >= num_classes {
                    return Err(DetrError::InvalidData(format!(
                        "label {} out of range for {} classes (image {}, slot {})",
                        label, num_classes, i, s
                    )));
                }
                labels.push(label as usize);
            }

            let cols = objects.len();
            let mut cost = Vec::with_capacity(queries * cols);
            for p in 0..queries {
                let query = i * queries + p;
                let pred = box_at(&pred_boxes, query);
                for (k, &s) in objects.iter().enumerate() {
                    let prob = probs[query * classes + labels[k]];
                    cost.push(self.pair_cost(prob, pred, box_at(&gt_boxes, i * slots + s)));
                }
            }

            for (p, k) in linear_sum_assignment(&cost, queries, cols)? {
                let query = i * queries + p;
                let slot = i * slots + objects[k];
                target_classes[query] = labels[k] as i64;
                target_boxes[query * 4..query * 4 + 4].copy_from_slice(&box_at(&gt_boxes, slot));
                valid[query] = 1.0;
                num_matched += 1;
            }
        }

        Ok(Assignment {
            target_classes: Tensor::from_data(
                TensorData::new(target_classes, [batch, queries]),
                &device,
            ),
            target_boxes: Tensor::from_data(
                TensorData::new(target_boxes, [batch, queries, 4]),
                &device,
            ),
            valid: Tensor::from_data(TensorData::new(valid, [batch, queries]), &device),
            num_matched,
        })
    }
}
