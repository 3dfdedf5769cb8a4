//! L1 and generalized-IoU box regression losses.

use burn::prelude::*;

use super::box_ops::{box_cxcywh_to_xyxy, matched_generalized_iou};

/// Box regression loss over matched queries.
///
/// Both terms are summed over matched queries only and divided by the
/// number of matches:
/// - L1: `sum(valid * |pred - target|) / num_boxes`
/// - GIoU: `sum(valid * (1 - giou(pred, target))) / num_boxes`
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxLoss;

impl BoxLoss {
    /// Create a new box loss.
    pub fn new() -> Self {
        Self
    }

    /// Compute `(l1_loss, giou_loss)`.
    ///
    /// Inputs:
    /// - pred_boxes: `[B, Q, 4]` center-size predictions
    /// - target_boxes: `[B, Q, 4]` center-size targets
    /// - valid: `[B, Q]`, 1 where the query was matched
    /// - num_boxes: number of matched queries, the sum of `valid`
    ///
    /// With zero matches both terms are zero.
    pub fn forward<B: Backend>(
        &self,
        pred_boxes: Tensor<B, 3>,
        target_boxes: Tensor<B, 3>,
        valid: Tensor<B, 2>,
        num_boxes: usize,
    ) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let [batch, queries, _] = pred_boxes.dims();
        let n = batch * queries;
        let device = pred_boxes.device();

        if num_boxes == 0 {
            log::debug!("no matched queries in batch, box losses are zero");
            return (Tensor::zeros([1], &device), Tensor::zeros([1], &device));
        }
        let norm = num_boxes as f32;

        let pred = pred_boxes.reshape([n, 4]);
        let target = target_boxes.reshape([n, 4]);
        let valid = valid.reshape([n]);
        let valid_col = valid.clone().reshape([n, 1]).repeat_dim(1, 4);

        let loss_bbox = ((pred.clone() - target.clone()).abs() * valid_col.clone()).sum() / norm;

        // Unmatched slots are compared against the full image so their
        // masked-out terms stay finite.
        let full_image = Tensor::<B, 2>::from_data([[0.5f32, 0.5, 1.0, 1.0]], &device).repeat_dim(0, n);
        let target = target.mask_where(valid_col.equal_elem(0.0), full_image);

        let giou = matched_generalized_iou(box_cxcywh_to_xyxy(pred), box_cxcywh_to_xyxy(target));
        let loss_giou = (giou.neg().add_scalar(1.0) * valid).sum() / norm;

        (loss_bbox, loss_giou)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_single_match() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 3>::from_data(
            [[[0.5f32, 0.5, 0.2, 0.2], [0.1, 0.1, 0.1, 0.1]]],
            &device,
        );
        let target = Tensor::<TestBackend, 3>::from_data(
            [[[0.6f32, 0.5, 0.2, 0.2], [0.0, 0.0, 0.0, 0.0]]],
            &device,
        );
        let valid = Tensor::<TestBackend, 2>::from_data([[1.0f32, 0.0]], &device);

        let (l1, giou) = BoxLoss::new().forward(pred, target, valid, 1);
        let l1: f32 = l1.into_scalar().elem();
        let giou: f32 = giou.into_scalar().elem();

        assert!((l1 - 0.1).abs() < 1e-5);
        // inter 0.1*0.2, union 0.06, enclosing 0.06 -> giou = 1/3
        assert!((giou - (1.0 - 1.0 / 3.0)).abs() < 1e-5, "giou loss {}", giou);
    }

    #[test]
    fn test_zero_matches() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 3>::ones([2, 3, 4], &device);
        let target = Tensor::<TestBackend, 3>::zeros([2, 3, 4], &device);
        let valid = Tensor::<TestBackend, 2>::zeros([2, 3], &device);

        let (l1, giou) = BoxLoss::new().forward(pred, target, valid, 0);
        assert_eq!(l1.into_scalar().elem::<f32>(), 0.0);
        assert_eq!(giou.into_scalar().elem::<f32>(), 0.0);
    }

    #[test]
    fn test_degenerate_prediction_on_unmatched_slot_is_finite() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 3>::from_data(
            [[[0.5f32, 0.5, 0.2, 0.2], [0.0, 0.0, 0.0, 0.0]]],
            &device,
        );
        let target = Tensor::<TestBackend, 3>::from_data(
            [[[0.5f32, 0.5, 0.2, 0.2], [0.0, 0.0, 0.0, 0.0]]],
            &device,
        );
        let valid = Tensor::<TestBackend, 2>::from_data([[1.0f32, 0.0]], &device);

        let (l1, giou) = BoxLoss::new().forward(pred, target, valid, 1);
        let l1: f32 = l1.into_scalar().elem();
        let giou: f32 = giou.into_scalar().elem();
        assert!(l1.abs() < 1e-6);
        assert!(giou.abs() < 1e-5);
    }
}
