//! Shared fixtures: a tiny detector and synthetic batches.

#![allow(dead_code)]

use burn::backend::{Autodiff, NdArray};
use burn::module::ParamId;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;

use neural_detr::{
    config::{SetCriterionConfig, TrainingConfig},
    nn::{DetrNetwork, DetrOutput},
    training::{Annotation, DetectionTargets, DetrBatch},
};

pub type TestBackend = Autodiff<NdArray>;

pub const NUM_CLASSES: usize = 3;
pub const QUERIES: usize = 4;
pub const CHANNELS: usize = 3;

/// Global-pooled image features, a linear "backbone", then per-query heads.
#[derive(Module, Debug)]
pub struct TinyDetr<B: Backend> {
    backbone: Linear<B>,
    class_head: Linear<B>,
    box_head: Linear<B>,
}

fn linear_values<B: Backend>(layers: &[&Linear<B>]) -> Vec<f32> {
    let mut values = Vec::new();
    for layer in layers {
        values.extend(layer.weight.val().into_data().to_vec::<f32>().unwrap());
        if let Some(bias) = &layer.bias {
            values.extend(bias.val().into_data().to_vec::<f32>().unwrap());
        }
    }
    values
}

impl<B: Backend> TinyDetr<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            backbone: LinearConfig::new(CHANNELS, CHANNELS).init(device),
            class_head: LinearConfig::new(CHANNELS, QUERIES * (NUM_CLASSES + 1)).init(device),
            box_head: LinearConfig::new(CHANNELS, QUERIES * 4).init(device),
        }
    }

    /// All parameter values, for comparing replicas.
    pub fn parameters(&self) -> Vec<f32> {
        linear_values(&[&self.backbone, &self.class_head, &self.box_head])
    }

    pub fn backbone_parameters(&self) -> Vec<f32> {
        linear_values(&[&self.backbone])
    }

    pub fn head_parameters(&self) -> Vec<f32> {
        linear_values(&[&self.class_head, &self.box_head])
    }
}

impl<B: Backend> DetrNetwork<B> for TinyDetr<B> {
    fn forward(&self, images: Tensor<B, 4>, _mask: Tensor<B, 3>) -> DetrOutput<B> {
        let [batch, channels, _, _] = images.dims();
        let pooled = images.mean_dim(3).mean_dim(2).reshape([batch, channels]);
        let pooled = self.backbone.forward(pooled);

        let logits = self
            .class_head
            .forward(pooled.clone())
            .reshape([batch, QUERIES, NUM_CLASSES + 1]);
        let boxes = sigmoid(self.box_head.forward(pooled)).reshape([batch, QUERIES, 4]);

        DetrOutput::single(logits, boxes)
    }

    fn backbone_param_ids(&self) -> Vec<ParamId> {
        let mut ids = vec![self.backbone.weight.id];
        ids.extend(self.backbone.bias.as_ref().map(|bias| bias.id));
        ids
    }
}

pub fn training_config() -> TrainingConfig {
    TrainingConfig::new(SetCriterionConfig::new(NUM_CLASSES).with_aux_loss(false))
        .with_learning_rate(1e-2)
        .with_clip_max_norm(1.0)
}

/// A batch of two 8x8 images, the second padded, one or two objects each.
pub fn batch(device: &<TestBackend as Backend>::Device, seed: f32) -> DetrBatch<TestBackend> {
    let (images, mask, targets) = batch_parts(device, seed);
    DetrBatch::new(images, mask, targets)
}

/// Like [`batch`] but with a mask that does not match the image size.
pub fn mismatched_batch(device: &<TestBackend as Backend>::Device) -> DetrBatch<TestBackend> {
    let (images, _, targets) = batch_parts(device, 0.0);
    DetrBatch::new(images, Tensor::zeros([2, 4, 4], device), targets)
}

fn batch_parts(
    device: &<TestBackend as Backend>::Device,
    seed: f32,
) -> (
    Tensor<TestBackend, 4>,
    Tensor<TestBackend, 3>,
    DetectionTargets<TestBackend>,
) {
    let images: Vec<f32> = (0..2 * CHANNELS * 8 * 8)
        .map(|i| ((i as f32 * 0.37 + seed).sin() + 1.0) * 0.5)
        .collect();
    let mut mask = vec![0.0f32; 2 * 8 * 8];
    for y in 0..8 {
        for x in 6..8 {
            mask[64 + y * 8 + x] = 1.0;
        }
    }

    let targets = DetectionTargets::from_objects(
        &[
            vec![Annotation::new(0, [0.4, 0.5, 0.3, 0.2])],
            vec![
                Annotation::new(2, [0.3, 0.3, 0.2, 0.2]),
                Annotation::new(1, [0.7, 0.6, 0.2, 0.3]),
            ],
        ],
        QUERIES,
        device,
    )
    .unwrap();

    (
        Tensor::from_data(TensorData::new(images, [2, CHANNELS, 8, 8]), device),
        Tensor::from_data(TensorData::new(mask, [2, 8, 8]), device),
        targets,
    )
}
