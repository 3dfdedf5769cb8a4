//! Conversion of raw network output into per-image detections.

use burn::prelude::*;
use burn::tensor::activation::softmax;

use detr_core::BoxArray;

use crate::error::{DetrError, Result};
use crate::host::{float_values, int_values};

use super::network::LayerPrediction;

/// Detections of a single image, one entry per query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    /// Probability of the best real class.
    pub scores: Vec<f32>,
    /// Best real class index.
    pub labels: Vec<usize>,
    /// Boxes `(x0, y0, x1, y1)` in absolute image coordinates.
    pub boxes: Vec<BoxArray>,
}

impl Detections {
    /// Keep only detections scoring at least `threshold`.
    pub fn above(&self, threshold: f32) -> Self {
        let mut out = Self::default();
        for i in 0..self.scores.len() {
            if self.scores[i] >= threshold {
                out.scores.push(self.scores[i]);
                out.labels.push(self.labels[i]);
                out.boxes.push(self.boxes[i]);
            }
        }
        out
    }

    /// Number of detections.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether there are no detections.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Turn a layer prediction into detections.
///
/// The no-object class is excluded from the label choice; its probability
/// only lowers the scores of the real classes. `image_sizes` holds
/// `(height, width)` per image.
pub fn post_process<B: Backend>(
    prediction: &LayerPrediction<B>,
    image_sizes: &[(f32, f32)],
) -> Result<Vec<Detections>> {
    let [batch, queries, classes] = prediction.logits.dims();
    if image_sizes.len() != batch {
        return Err(DetrError::shape(
            "image_sizes",
            &[batch, 2],
            &[image_sizes.len(), 2],
        ));
    }

    let probs = softmax(prediction.logits.clone().detach(), 2).narrow(2, 0, classes - 1);
    let scores = float_values(probs.clone().max_dim(2))?;
    let labels = int_values(probs.argmax(2))?;
    let boxes = float_values(prediction.boxes.clone().detach())?;

    let detections = image_sizes
        .iter()
        .enumerate()
        .map(|(i, &(height, width))| {
            let range = i * queries..(i + 1) * queries;
            Detections {
                scores: scores[range.clone()].to_vec(),
                labels: labels[range.clone()].iter().map(|&l| l as usize).collect(),
                boxes: range
                    .map(|q| {
                        let b = detr_core::center_size_to_corners([
                            boxes[q * 4],
                            boxes[q * 4 + 1],
                            boxes[q * 4 + 2],
                            boxes[q * 4 + 3],
                        ]);
                        [b[0] * width, b[1] * height, b[2] * width, b[3] * height]
                    })
                    .collect(),
            }
        })
        .collect();

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_post_process() {
        let device = Default::default();
        let prediction = LayerPrediction::<TestBackend>::new(
            // query 0 confident in class 1, query 1 mostly no-object
            Tensor::from_data([[[0.0f32, 4.0, 0.0], [0.0, 0.0, 4.0]]], &device),
            Tensor::from_data(
                [[[0.5f32, 0.5, 0.2, 0.4], [0.25, 0.25, 0.5, 0.5]]],
                &device,
            ),
        );

        let out = post_process(&prediction, &[(100.0, 200.0)]).unwrap();
        assert_eq!(out.len(), 1);
        let det = &out[0];
        assert_eq!(det.labels[0], 1);
        assert!(det.scores[0] > 0.9);
        assert!(det.scores[1] < 0.1);

        let b = det.boxes[0];
        assert!((b[0] - 80.0).abs() < 1e-3);
        assert!((b[1] - 30.0).abs() < 1e-3);
        assert!((b[2] - 120.0).abs() < 1e-3);
        assert!((b[3] - 70.0).abs() < 1e-3);

        let kept = det.above(0.5);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_post_process_size_mismatch() {
        let device = Default::default();
        let prediction = LayerPrediction::<TestBackend>::new(
            Tensor::zeros([2, 1, 3], &device),
            Tensor::zeros([2, 1, 4], &device),
        );
        assert!(post_process(&prediction, &[(1.0, 1.0)]).is_err());
    }
}
