//! Scalar bounding-box geometry.
//!
//! Boxes are `[f32; 4]` in one of two layouts:
//! - center-size `(cx, cy, w, h)`, the format the network predicts
//! - corners `(x0, y0, x1, y1)`, the format IoU is computed in
//!
//! Well-formedness (`x1 >= x0`, `y1 >= y0`) is not validated. Negative
//! widths propagate into `box_area`; intersection extents are clamped to zero.

/// A single box as four coordinates.
pub type BoxArray = [f32; 4];

/// Upper bound applied to intersection and enclosing extents.
///
/// Coordinates are normalized to `[0, 1]`, so any extent above this only
/// comes from diverging predictions.
pub const MAX_EXTENT: f32 = 100.0;

/// Convert `(cx, cy, w, h)` to `(x0, y0, x1, y1)`.
#[inline]
pub fn center_size_to_corners(b: BoxArray) -> BoxArray {
    let [cx, cy, w, h] = b;
    [cx - 0.5 * w, cy - 0.5 * h, cx + 0.5 * w, cy + 0.5 * h]
}

/// Convert `(x0, y0, x1, y1)` to `(cx, cy, w, h)`.
///
/// Exact inverse of [`center_size_to_corners`] up to float rounding.
#[inline]
pub fn corners_to_center_size(b: BoxArray) -> BoxArray {
    let [x0, y0, x1, y1] = b;
    [(x0 + x1) / 2.0, (y0 + y1) / 2.0, x1 - x0, y1 - y0]
}

/// Area of a corner-format box.
#[inline]
pub fn box_area(b: BoxArray) -> f32 {
    (b[2] - b[0]) * (b[3] - b[1])
}

#[inline]
fn clamp_extent(v: f32) -> f32 {
    v.max(0.0).min(MAX_EXTENT)
}

/// IoU of two corner-format boxes.
///
/// Returns `(iou, union)`. When both boxes have zero area the union is zero
/// and the IoU is NaN; callers that need a number must handle that case.
#[inline]
pub fn box_iou(a: BoxArray, b: BoxArray) -> (f32, f32) {
    let w = clamp_extent(a[2].min(b[2]) - a[0].max(b[0]));
    let h = clamp_extent(a[3].min(b[3]) - a[1].max(b[1]));
    let inter = w * h;
    let union = box_area(a) + box_area(b) - inter;
    (inter / union, union)
}

/// Generalized IoU of two corner-format boxes.
///
/// `iou - (enclosing - union) / enclosing`, in `[-1, 1]` for well-formed boxes.
#[inline]
pub fn generalized_iou(a: BoxArray, b: BoxArray) -> f32 {
    let (iou, union) = box_iou(a, b);
    let w = clamp_extent(a[2].max(b[2]) - a[0].min(b[0]));
    let h = clamp_extent(a[3].max(b[3]) - a[1].min(b[1]));
    let enclosing = w * h;
    iou - (enclosing - union) / enclosing
}

/// Sum of absolute coordinate differences.
#[inline]
pub fn l1_distance(a: BoxArray, b: BoxArray) -> f32 {
    libm::fabsf(a[0] - b[0])
        + libm::fabsf(a[1] - b[1])
        + libm::fabsf(a[2] - b[2])
        + libm::fabsf(a[3] - b[3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_size_to_corners() {
        let c = center_size_to_corners([0.5, 0.5, 0.2, 0.4]);
        assert!((c[0] - 0.4).abs() < 1e-6);
        assert!((c[1] - 0.3).abs() < 1e-6);
        assert!((c[2] - 0.6).abs() < 1e-6);
        assert!((c[3] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_area_of_inverted_box_is_negative() {
        assert!(box_area([0.6, 0.0, 0.4, 1.0]) < 0.0);
    }

    #[test]
    fn test_identical_boxes() {
        let b = [0.1, 0.2, 0.5, 0.6];
        let (iou, union) = box_iou(b, b);
        assert!((iou - 1.0).abs() < 1e-6);
        assert!((union - 0.16).abs() < 1e-6);
        assert!((generalized_iou(b, b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_half_overlap() {
        let a = [0.0, 0.0, 2.0, 1.0];
        let b = [1.0, 0.0, 3.0, 1.0];
        let (iou, union) = box_iou(a, b);
        // inter 1, union 3
        assert!((iou - 1.0 / 3.0).abs() < 1e-6);
        assert!((union - 3.0).abs() < 1e-6);
        // enclosing 3 == union, so giou == iou
        assert!((generalized_iou(a, b) - iou).abs() < 1e-6);
    }

    #[test]
    fn test_disjoint_boxes() {
        let a = [0.0, 0.0, 1.0, 1.0];
        let b = [2.0, 0.0, 3.0, 1.0];
        let (iou, _) = box_iou(a, b);
        assert_eq!(iou, 0.0);
        // enclosing 3, union 2 -> -1/3
        assert!((generalized_iou(a, b) + 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_boxes_give_nan() {
        let p = [0.5, 0.5, 0.5, 0.5];
        let (iou, union) = box_iou(p, p);
        assert_eq!(union, 0.0);
        assert!(iou.is_nan());
    }

    #[test]
    fn test_l1_distance() {
        let d = l1_distance([0.0, 0.0, 1.0, 1.0], [0.1, -0.1, 1.2, 1.0]);
        assert!((d - 0.4).abs() < 1e-6);
    }
}
