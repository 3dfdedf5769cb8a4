//! Training batches and padded ground truth.

use burn::prelude::*;

use detr_core::BoxArray;

use crate::error::{DetrError, Result};

/// One ground-truth object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Annotation {
    /// Class index in `[0, num_classes)`.
    pub label: usize,
    /// Box in normalized center-size format.
    pub bbox: BoxArray,
}

impl Annotation {
    /// Create an annotation.
    pub fn new(label: usize, bbox: BoxArray) -> Self {
        Self { label, bbox }
    }
}

/// Ground truth padded to a fixed number of object slots per image.
#[derive(Debug, Clone)]
pub struct DetectionTargets<B: Backend> {
    /// Boxes `[B, Q, 4]` in center-size format.
    pub boxes: Tensor<B, 3>,
    /// Class labels `[B, Q]`.
    pub labels: Tensor<B, 2, Int>,
    /// Slot validity `[B, Q]`: 1 for a real object, 0 for padding.
    pub valid: Tensor<B, 2>,
}

impl<B: Backend> DetectionTargets<B> {
    /// Create targets from padded tensors.
    pub fn new(boxes: Tensor<B, 3>, labels: Tensor<B, 2, Int>, valid: Tensor<B, 2>) -> Self {
        Self {
            boxes,
            labels,
            valid,
        }
    }

    /// Pad per-image object lists into `capacity` slots.
    ///
    /// Returns `InvalidData` if an image has more objects than slots.
    pub fn from_objects(
        objects: &[Vec<Annotation>],
        capacity: usize,
        device: &B::Device,
    ) -> Result<Self> {
        let batch = objects.len();
        let mut boxes = vec![0.0f32; batch * capacity * 4];
        let mut labels = vec![0i64; batch * capacity];
        let mut valid = vec![0.0f32; batch * capacity];

        for (i, image) in objects.iter().enumerate() {
            if image.len() > capacity {
                return Err(DetrError::InvalidData(format!(
                    "image {} has {} objects but only {} slots",
                    i,
                    image.len(),
                    capacity
                )));
            }
            for (j, object) in image.iter().enumerate() {
                let slot = i * capacity + j;
                boxes[slot * 4..slot * 4 + 4].copy_from_slice(&object.bbox);
                labels[slot] = object.label as i64;
                valid[slot] = 1.0;
            }
        }

        Ok(Self {
            boxes: Tensor::from_data(TensorData::new(boxes, [batch, capacity, 4]), device),
            labels: Tensor::from_data(TensorData::new(labels, [batch, capacity]), device),
            valid: Tensor::from_data(TensorData::new(valid, [batch, capacity]), device),
        })
    }

    /// Batch size and slot count.
    pub fn dims(&self) -> [usize; 2] {
        let [b, q, _] = self.boxes.dims();
        [b, q]
    }

    /// Check that boxes, labels and validity share the `[B, Q]` prefix.
    pub fn validate(&self) -> Result<()> {
        let [b, q] = self.dims();
        let box_dims = self.boxes.dims();
        if box_dims[2] != 4 {
            return Err(DetrError::shape("gt_boxes", &[b, q, 4], &box_dims));
        }
        let label_dims = self.labels.dims();
        if label_dims != [b, q] {
            return Err(DetrError::shape("gt_labels", &[b, q], &label_dims));
        }
        let valid_dims = self.valid.dims();
        if valid_dims != [b, q] {
            return Err(DetrError::shape("gt_valid", &[b, q], &valid_dims));
        }
        Ok(())
    }
}

/// A batch of padded images with their ground truth.
#[derive(Debug, Clone)]
pub struct DetrBatch<B: Backend> {
    /// Images `[B, C, H, W]`.
    pub images: Tensor<B, 4>,
    /// Padding mask `[B, H, W]`: 1 for padding, 0 for valid pixels.
    pub mask: Tensor<B, 3>,
    /// Ground truth.
    pub targets: DetectionTargets<B>,
}

impl<B: Backend> DetrBatch<B> {
    /// Create a new batch.
    pub fn new(images: Tensor<B, 4>, mask: Tensor<B, 3>, targets: DetectionTargets<B>) -> Self {
        Self {
            images,
            mask,
            targets,
        }
    }

    /// Number of images.
    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }

    /// Get the device of this batch.
    pub fn device(&self) -> B::Device {
        self.images.device()
    }

    /// Check that images, mask and targets agree on batch and spatial size.
    pub fn validate(&self) -> Result<()> {
        let [b, _, h, w] = self.images.dims();
        let mask_dims = self.mask.dims();
        if mask_dims != [b, h, w] {
            return Err(DetrError::shape("mask", &[b, h, w], &mask_dims));
        }
        self.targets.validate()?;
        let [tb, tq] = self.targets.dims();
        if tb != b {
            return Err(DetrError::shape("targets", &[b, tq], &[tb, tq]));
        }
        Ok(())
    }
}
