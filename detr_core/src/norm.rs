//! Gradient norm arithmetic for global-norm clipping.

/// Sum of squares of a slice, accumulated in f64.
#[inline]
pub fn squared_norm(values: &[f32]) -> f64 {
    values.iter().map(|&v| (v as f64) * (v as f64)).sum()
}

/// L2 norm of the concatenation of several slices.
///
/// `sqrt(sum_i ||g_i||²)`: the norm of all parameter gradients viewed as one vector.
pub fn global_norm<'a, I>(chunks: I) -> f32
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let total: f64 = chunks.into_iter().map(squared_norm).sum();
    libm::sqrt(total) as f32
}

/// Factor every gradient must be multiplied by to bring `global_norm` down to `max_norm`.
///
/// Returns 1.0 when the norm is already within bounds. A NaN norm also yields
/// 1.0 and an infinite norm yields 0.0, so callers should check finiteness first.
#[inline]
pub fn clip_coefficient(global_norm: f32, max_norm: f32) -> f32 {
    if global_norm > max_norm {
        max_norm / global_norm
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_norm_spans_chunks() {
        let a = [3.0f32];
        let b = [4.0f32, 0.0];
        let n = global_norm([&a[..], &b[..]]);
        assert!((n - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_global_norm_empty() {
        let n = global_norm(core::iter::empty::<&[f32]>());
        assert_eq!(n, 0.0);
    }

    #[test]
    fn test_clip_coefficient() {
        assert!((clip_coefficient(10.0, 1.0) - 0.1).abs() < 1e-7);
        assert_eq!(clip_coefficient(0.5, 1.0), 1.0);
        assert_eq!(clip_coefficient(1.0, 1.0), 1.0);
    }
}
