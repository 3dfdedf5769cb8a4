//! Differentiable bounding-box geometry on tensors.
//!
//! Mirrors the scalar versions in `detr_core::boxes`, batched over `[N, 4]`
//! tensors so gradients flow through IoU terms.

use burn::prelude::*;

use detr_core::MAX_EXTENT;

/// Which element-wise extreme [`pairwise_extreme`] takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extreme {
    /// Element-wise maximum.
    Max,
    /// Element-wise minimum.
    Min,
}

/// Convert `(cx, cy, w, h)` boxes to `(x0, y0, x1, y1)` along the last dimension.
pub fn box_cxcywh_to_xyxy<B: Backend, const D: usize>(boxes: Tensor<B, D>) -> Tensor<B, D> {
    let last = D - 1;
    let center = boxes.clone().narrow(last, 0, 2);
    let half = boxes.narrow(last, 2, 2) * 0.5;
    Tensor::cat(vec![center.clone() - half.clone(), center + half], last)
}

/// Convert `(x0, y0, x1, y1)` boxes to `(cx, cy, w, h)` along the last dimension.
pub fn box_xyxy_to_cxcywh<B: Backend, const D: usize>(boxes: Tensor<B, D>) -> Tensor<B, D> {
    let last = D - 1;
    let min = boxes.clone().narrow(last, 0, 2);
    let max = boxes.narrow(last, 2, 2);
    Tensor::cat(vec![(min.clone() + max.clone()) * 0.5, max - min], last)
}

/// Broadcast `[N, 2]` and `[M, 2]` coordinate sets into their `[N, M, 2]`
/// element-wise maximum or minimum.
///
/// Either side may be empty, in which case an empty `[N, M, 2]` tensor is returned.
pub fn pairwise_extreme<B: Backend>(
    a: Tensor<B, 2>,
    b: Tensor<B, 2>,
    mode: Extreme,
) -> Tensor<B, 3> {
    let [n, _] = a.dims();
    let [m, _] = b.dims();
    let device = a.device();

    if n == 0 || m == 0 {
        return Tensor::zeros([n, m, 2], &device);
    }

    let a = a.reshape([n, 1, 2]).repeat_dim(1, m);
    let b = b.reshape([1, m, 2]).repeat_dim(0, n);

    match mode {
        Extreme::Max => {
            let take_b = b.clone().greater(a.clone());
            a.mask_where(take_b, b)
        }
        Extreme::Min => {
            let take_b = b.clone().lower(a.clone());
            a.mask_where(take_b, b)
        }
    }
}

/// Area of corner-format boxes `[N, 4] -> [N]`.
///
/// Inverted boxes yield negative areas; nothing is validated.
pub fn box_area<B: Backend>(boxes: Tensor<B, 2>) -> Tensor<B, 1> {
    let [n, _] = boxes.dims();
    let w = boxes.clone().narrow(1, 2, 1) - boxes.clone().narrow(1, 0, 1);
    let h = boxes.clone().narrow(1, 3, 1) - boxes.narrow(1, 1, 1);
    (w * h).reshape([n])
}

/// Product of the two channels of a clamped `[N, M, 2]` extent tensor.
fn extent_area<B: Backend>(wh: Tensor<B, 3>) -> Tensor<B, 2> {
    let [n, m, _] = wh.dims();
    let wh = wh.clamp(0.0, MAX_EXTENT);
    (wh.clone().narrow(2, 0, 1) * wh.narrow(2, 1, 1)).reshape([n, m])
}

/// Pairwise IoU between `[N, 4]` and `[M, 4]` corner-format boxes.
///
/// Returns `(iou, union)`, both `[N, M]`. Intersection extents are clamped
/// into `[0, MAX_EXTENT]`. A zero union yields NaN.
pub fn pairwise_iou<B: Backend>(
    boxes1: Tensor<B, 2>,
    boxes2: Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let [n, _] = boxes1.dims();
    let [m, _] = boxes2.dims();
    let device = boxes1.device();

    if n == 0 || m == 0 {
        return (Tensor::zeros([n, m], &device), Tensor::zeros([n, m], &device));
    }

    let area1 = box_area(boxes1.clone()).reshape([n, 1]).repeat_dim(1, m);
    let area2 = box_area(boxes2.clone()).reshape([1, m]).repeat_dim(0, n);

    let lt = pairwise_extreme(
        boxes1.clone().narrow(1, 0, 2),
        boxes2.clone().narrow(1, 0, 2),
        Extreme::Max,
    );
    let rb = pairwise_extreme(boxes1.narrow(1, 2, 2), boxes2.narrow(1, 2, 2), Extreme::Min);

    let inter = extent_area(rb - lt);
    let union = area1 + area2 - inter.clone();
    (inter / union.clone(), union)
}

/// Pairwise generalized IoU between `[N, 4]` and `[M, 4]` corner-format boxes.
pub fn generalized_iou<B: Backend>(boxes1: Tensor<B, 2>, boxes2: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, _] = boxes1.dims();
    let [m, _] = boxes2.dims();
    let device = boxes1.device();

    if n == 0 || m == 0 {
        return Tensor::zeros([n, m], &device);
    }

    let (iou, union) = pairwise_iou(boxes1.clone(), boxes2.clone());

    let lt = pairwise_extreme(
        boxes1.clone().narrow(1, 0, 2),
        boxes2.clone().narrow(1, 0, 2),
        Extreme::Min,
    );
    let rb = pairwise_extreme(boxes1.narrow(1, 2, 2), boxes2.narrow(1, 2, 2), Extreme::Max);
    let enclosing = extent_area(rb - lt);

    iou - (enclosing.clone() - union) / enclosing
}

/// Generalized IoU of row-aligned pairs `[N, 4]` x `[N, 4] -> [N]`.
///
/// Equal to the diagonal of [`generalized_iou`] without building the
/// `[N, N]` matrix.
pub fn matched_generalized_iou<B: Backend>(
    boxes1: Tensor<B, 2>,
    boxes2: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let [n, _] = boxes1.dims();

    let area1 = box_area(boxes1.clone());
    let area2 = box_area(boxes2.clone());

    let (min1, max1) = (boxes1.clone().narrow(1, 0, 2), boxes1.narrow(1, 2, 2));
    let (min2, max2) = (boxes2.clone().narrow(1, 0, 2), boxes2.narrow(1, 2, 2));

    let inner_lt = min1.clone().max_pair(min2.clone());
    let inner_rb = max1.clone().min_pair(max2.clone());
    let inter = extent_product(inner_rb - inner_lt, n);
    let union = area1 + area2 - inter.clone();
    let iou = inter / union.clone();

    let outer_lt = min1.min_pair(min2);
    let outer_rb = max1.max_pair(max2);
    let enclosing = extent_product(outer_rb - outer_lt, n);

    iou - (enclosing.clone() - union) / enclosing
}

fn extent_product<B: Backend>(wh: Tensor<B, 2>, n: usize) -> Tensor<B, 1> {
    let wh = wh.clamp(0.0, MAX_EXTENT);
    (wh.clone().narrow(1, 0, 1) * wh.narrow(1, 1, 1)).reshape([n])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn values<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
        t.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_conversion_roundtrip() {
        let device = Default::default();
        let boxes = Tensor::<TestBackend, 2>::from_data(
            [[0.5f32, 0.5, 0.2, 0.4], [0.1, 0.9, 0.05, 0.1]],
            &device,
        );
        let back = box_xyxy_to_cxcywh(box_cxcywh_to_xyxy(boxes.clone()));
        for (a, b) in values(back).iter().zip(values(boxes)) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_pairwise_extreme_shapes() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_data([[0.0f32, 1.0], [2.0, 0.5]], &device);
        let b = Tensor::<TestBackend, 2>::from_data([[1.0f32, 0.0], [0.5, 3.0], [4.0, 4.0]], &device);

        let max = pairwise_extreme(a.clone(), b.clone(), Extreme::Max);
        assert_eq!(max.dims(), [2, 3, 2]);
        let max = values(max);
        // a[0] vs b[1] -> (0.5, 3.0)
        assert_eq!(&max[2..4], &[0.5, 3.0]);

        let min = values(pairwise_extreme(a, b, Extreme::Min));
        // a[1] vs b[0] -> (1.0, 0.0)
        assert_eq!(&min[6..8], &[1.0, 0.0]);
    }

    #[test]
    fn test_pairwise_extreme_empty() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::zeros([0, 2], &device);
        let b = Tensor::<TestBackend, 2>::ones([3, 2], &device);
        assert_eq!(pairwise_extreme(a, b, Extreme::Max).dims(), [0, 3, 2]);
    }

    #[test]
    fn test_self_iou_diagonal() {
        let device = Default::default();
        let boxes = Tensor::<TestBackend, 2>::from_data(
            [[0.0f32, 0.0, 1.0, 1.0], [0.2, 0.3, 0.6, 0.9], [0.5, 0.5, 0.7, 0.6]],
            &device,
        );
        let (iou, _) = pairwise_iou(boxes.clone(), boxes.clone());
        let giou = values(generalized_iou(boxes.clone(), boxes.clone()));
        let iou = values(iou);
        for i in 0..3 {
            assert!((iou[i * 3 + i] - 1.0).abs() < 1e-5);
            assert!((giou[i * 3 + i] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_disjoint_boxes() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_data([[0.0f32, 0.0, 1.0, 1.0]], &device);
        let b = Tensor::<TestBackend, 2>::from_data([[2.0f32, 0.0, 3.0, 1.0]], &device);
        let (iou, union) = pairwise_iou(a.clone(), b.clone());
        assert_eq!(values(iou), vec![0.0]);
        assert!((values(union)[0] - 2.0).abs() < 1e-6);
        let giou = values(generalized_iou(a, b))[0];
        assert!((giou + 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_matched_giou_equals_diagonal() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_data(
            [[0.0f32, 0.0, 0.5, 0.5], [0.1, 0.1, 0.4, 0.8], [0.6, 0.6, 0.9, 0.7]],
            &device,
        );
        let b = Tensor::<TestBackend, 2>::from_data(
            [[0.25f32, 0.25, 0.75, 0.75], [0.0, 0.0, 1.0, 1.0], [0.1, 0.1, 0.2, 0.2]],
            &device,
        );
        let full = values(generalized_iou(a.clone(), b.clone()));
        let diag = values(matched_generalized_iou(a, b));
        for i in 0..3 {
            assert!((full[i * 3 + i] - diag[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_box_area_inverted() {
        let device = Default::default();
        let boxes = Tensor::<TestBackend, 2>::from_data([[0.6f32, 0.0, 0.4, 1.0]], &device);
        assert!(values(box_area(boxes))[0] < 0.0);
    }
}
