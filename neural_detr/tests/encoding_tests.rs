//! Integration tests for the sine positional embedding.

use burn::backend::NdArray;
use burn::prelude::*;

use neural_detr::{config::PositionEncodingConfig, nn::PositionEmbeddingSine};

type TestBackend = NdArray;

fn padded_mask(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 3> {
    // second image padded on the right and bottom
    let mut values = vec![0.0f32; 2 * 6 * 8];
    for y in 0..6 {
        for x in 0..8 {
            if y >= 4 || x >= 5 {
                values[48 + y * 8 + x] = 1.0;
            }
        }
    }
    Tensor::from_data(TensorData::new(values, [2, 6, 8]), device)
}

#[test]
fn test_embedding_is_deterministic() {
    let device = Default::default();
    let embed = PositionEmbeddingSine::new(&PositionEncodingConfig::new().with_hidden_dim(32)).unwrap();

    let first: Vec<f32> = embed
        .forward(padded_mask(&device))
        .into_data()
        .to_vec()
        .unwrap();
    let second: Vec<f32> = embed
        .forward(padded_mask(&device))
        .into_data()
        .to_vec()
        .unwrap();

    assert_eq!(first.len(), second.len());
    assert!(first
        .iter()
        .zip(&second)
        .all(|(a, b)| a.to_bits() == b.to_bits()));
}

#[test]
fn test_channel_count_matches_hidden_dim() {
    let device = Default::default();
    for hidden_dim in [4, 64, 256] {
        let config = PositionEncodingConfig::new().with_hidden_dim(hidden_dim);
        let embed = PositionEmbeddingSine::new(&config).unwrap();
        let out = embed.forward(padded_mask(&device));
        assert_eq!(out.dims(), [2, hidden_dim, 6, 8]);
    }
}

#[test]
fn test_values_are_bounded() {
    let device = Default::default();
    let embed = PositionEmbeddingSine::new(&PositionEncodingConfig::new().with_hidden_dim(16)).unwrap();
    let values: Vec<f32> = embed
        .forward(padded_mask(&device))
        .into_data()
        .to_vec()
        .unwrap();
    assert!(values.iter().all(|v| v.is_finite() && v.abs() <= 1.0 + 1e-6));
}

#[test]
fn test_feature_map_embedding() {
    let device = Default::default();
    let embed = PositionEmbeddingSine::new(&PositionEncodingConfig::new().with_hidden_dim(8)).unwrap();
    let out = embed.embed_feature_map(padded_mask(&device), [3, 4]);
    assert_eq!(out.dims(), [2, 8, 3, 4]);
}

#[test]
fn test_invalid_hidden_dim() {
    assert!(PositionEmbeddingSine::new(&PositionEncodingConfig::new().with_hidden_dim(6)).is_err());
}

/// Direct per-pixel evaluation of the normalized sine embedding.
fn reference_embedding(mask: &[f32], [batch, height, width]: [usize; 3], hidden_dim: usize) -> Vec<f32> {
    let npf = hidden_dim / 2;
    let scale = 2.0 * std::f64::consts::PI;
    let at = |b: usize, y: usize, x: usize| 1.0 - mask[(b * height + y) * width + x] as f64;

    let mut out = vec![0.0f32; batch * hidden_dim * height * width];
    for b in 0..batch {
        for y in 0..height {
            for x in 0..width {
                let y_count: f64 = (0..=y).map(|i| at(b, i, x)).sum();
                let y_total: f64 = (0..height).map(|i| at(b, i, x)).sum();
                let x_count: f64 = (0..=x).map(|j| at(b, y, j)).sum();
                let x_total: f64 = (0..width).map(|j| at(b, y, j)).sum();
                let y_embed = y_count / (y_total + 1e-6) * scale;
                let x_embed = x_count / (x_total + 1e-6) * scale;

                for c in 0..npf {
                    let dim_t = 10000f64.powf((2 * (c / 2)) as f64 / npf as f64);
                    let wave = |v: f64| if c % 2 == 0 { v.sin() } else { v.cos() };
                    let index = |ch: usize| ((b * hidden_dim + ch) * height + y) * width + x;
                    out[index(c)] = wave(y_embed / dim_t) as f32;
                    out[index(npf + c)] = wave(x_embed / dim_t) as f32;
                }
            }
        }
    }
    out
}

#[test]
fn test_normalized_embedding_with_padding_and_holes() {
    let device = Default::default();
    let dims = [2, 5, 6];
    let mut mask = vec![0.0f32; 2 * 5 * 6];
    // first image: interior holes only
    mask[2 * 6 + 2] = 1.0;
    mask[6 + 3] = 1.0;
    // second image: right two columns and bottom row padded, one hole
    for y in 0..5 {
        for x in 0..6 {
            if y == 4 || x >= 4 || (y, x) == (1, 1) {
                mask[30 + y * 6 + x] = 1.0;
            }
        }
    }

    for hidden_dim in [8, 16] {
        let embed = PositionEmbeddingSine::new(&PositionEncodingConfig::new().with_hidden_dim(hidden_dim))
            .unwrap();
        let actual: Vec<f32> = embed
            .forward(Tensor::<TestBackend, 3>::from_data(TensorData::new(mask.clone(), dims), &device))
            .into_data()
            .to_vec()
            .unwrap();
        let expected = reference_embedding(&mask, dims, hidden_dim);

        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(&expected).enumerate() {
            assert!((a - e).abs() < 1e-5, "value {} differs: {} vs {}", i, a, e);
        }
    }
}
