//! Set-prediction loss composition.

use burn::prelude::*;

use crate::config::{MatcherConfig, SetCriterionConfig};
use crate::error::{DetrError, Result};
use crate::matcher::{HungarianMatcher, Matcher};
use crate::nn::{DetrOutput, LayerPrediction};
use crate::training::DetectionTargets;

use super::boxes::BoxLoss;
use super::classification::ClassificationLoss;

/// Loss terms of a single decoder layer.
#[derive(Debug, Clone)]
pub struct LayerLosses<B: Backend> {
    /// Weighted-mean cross-entropy.
    pub loss_ce: Tensor<B, 1>,
    /// L1 box loss per matched box.
    pub loss_bbox: Tensor<B, 1>,
    /// `1 - GIoU` per matched box.
    pub loss_giou: Tensor<B, 1>,
    /// `w_ce * loss_ce + w_bbox * loss_bbox + w_giou * loss_giou`.
    pub total: Tensor<B, 1>,
    /// Number of matched queries.
    pub num_matched: usize,
}

/// DETR set criterion.
///
/// Per decoder layer: match queries to objects, then combine the weighted
/// classification, L1 and GIoU terms. With auxiliary loss enabled every
/// decoder layer is supervised and the per-layer totals are summed, not
/// averaged.
#[derive(Debug, Clone)]
pub struct SetCriterion<M = HungarianMatcher> {
    config: SetCriterionConfig,
    matcher: M,
    class_loss: ClassificationLoss,
    box_loss: BoxLoss,
}

impl SetCriterion<HungarianMatcher> {
    /// Criterion with a Hungarian matcher.
    pub fn hungarian(config: SetCriterionConfig, matcher: MatcherConfig) -> Result<Self> {
        matcher.validate().map_err(DetrError::config)?;
        Self::new(config, HungarianMatcher::new(matcher))
    }
}

impl<M: Matcher> SetCriterion<M> {
    /// Create a criterion around any matcher.
    pub fn new(config: SetCriterionConfig, matcher: M) -> Result<Self> {
        config.validate().map_err(DetrError::config)?;
        let class_loss = ClassificationLoss::new(config.num_classes, config.eos_coef);
        Ok(Self {
            config,
            matcher,
            class_loss,
            box_loss: BoxLoss::new(),
        })
    }

    /// Criterion configuration.
    pub fn config(&self) -> &SetCriterionConfig {
        &self.config
    }

    /// The matcher.
    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    /// Scalar loss used for backpropagation.
    pub fn forward<B: Backend>(
        &self,
        output: &DetrOutput<B>,
        targets: &DetectionTargets<B>,
    ) -> Result<Tensor<B, 1>> {
        let losses = self.forward_detailed(output, targets)?;
        let mut layers = losses.into_iter();
        let first = layers
            .next()
            .ok_or_else(|| DetrError::InvalidData("no decoder layers to supervise".to_string()))?;
        Ok(layers.fold(first.total, |acc, layer| acc + layer.total))
    }

    /// Per-layer loss terms for every supervised layer, in decoder order.
    pub fn forward_detailed<B: Backend>(
        &self,
        output: &DetrOutput<B>,
        targets: &DetectionTargets<B>,
    ) -> Result<Vec<LayerLosses<B>>> {
        targets.validate()?;
        self.supervised_layers(output)?
            .iter()
            .map(|layer| self.layer_loss(layer, targets))
            .collect()
    }

    /// Loss of a single layer prediction.
    pub fn layer_loss<B: Backend>(
        &self,
        prediction: &LayerPrediction<B>,
        targets: &DetectionTargets<B>,
    ) -> Result<LayerLosses<B>> {
        self.check_shapes(prediction, targets)?;

        let assignment = self.matcher.assign(prediction, targets)?.detach();

        let loss_ce = self
            .class_loss
            .forward(prediction.logits.clone(), assignment.target_classes);
        let (loss_bbox, loss_giou) = self.box_loss.forward(
            prediction.boxes.clone(),
            assignment.target_boxes,
            assignment.valid,
            assignment.num_matched,
        );

        let weights = &self.config.weights;
        let total = loss_ce.clone() * weights.loss_ce
            + loss_bbox.clone() * weights.loss_bbox
            + loss_giou.clone() * weights.loss_giou;

        Ok(LayerLosses {
            loss_ce,
            loss_bbox,
            loss_giou,
            total,
            num_matched: assignment.num_matched,
        })
    }

    fn supervised_layers<'a, B: Backend>(
        &self,
        output: &'a DetrOutput<B>,
    ) -> Result<&'a [LayerPrediction<B>]> {
        let n = output.num_layers();
        if self.config.aux_loss {
            if n != self.config.num_decoder_layers {
                return Err(DetrError::shape(
                    "decoder layers",
                    &[self.config.num_decoder_layers],
                    &[n],
                ));
            }
            Ok(&output.layers)
        } else if n == 0 {
            Err(DetrError::shape("decoder layers", &[1], &[0]))
        } else {
            Ok(&output.layers[n - 1..])
        }
    }

    fn check_shapes<B: Backend>(
        &self,
        prediction: &LayerPrediction<B>,
        targets: &DetectionTargets<B>,
    ) -> Result<()> {
        let [b, q] = targets.dims();
        let logits = prediction.logits.dims();
        let expected = [b, q, self.config.num_logits()];
        if logits != expected {
            return Err(DetrError::shape("pred_logits", &expected, &logits));
        }
        let boxes = prediction.boxes.dims();
        if boxes != [b, q, 4] {
            return Err(DetrError::shape("pred_boxes", &[b, q, 4], &boxes));
        }
        Ok(())
    }
}
