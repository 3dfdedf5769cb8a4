//! Sine positional embedding over a padded 2-D feature map.

use burn::prelude::*;

use crate::config::PositionEncodingConfig;
use crate::error::{DetrError, Result};

const NORMALIZE_EPS: f32 = 1e-6;

/// Parameter-free sinusoidal position embedding for image features.
///
/// Every valid pixel gets its running row and column count (padding pixels
/// do not advance it), optionally normalized to `[0, scale]`. Each count is
/// divided by `num_pos_feats / 2` geometric frequencies and expanded into
/// interleaved `sin, cos` pairs. The y embedding comes first in the channel
/// dimension, then x.
#[derive(Debug, Clone)]
pub struct PositionEmbeddingSine {
    num_pos_feats: usize,
    normalize: bool,
    scale: f32,
    /// `temperature^(2k / num_pos_feats)` for `k < num_pos_feats / 2`.
    frequencies: Vec<f32>,
}

impl PositionEmbeddingSine {
    /// Create the embedding from configuration.
    pub fn new(config: &PositionEncodingConfig) -> Result<Self> {
        config.validate().map_err(DetrError::config)?;

        let num_pos_feats = config.num_pos_feats();
        let frequencies = (0..num_pos_feats / 2)
            .map(|k| config.temperature.powf((2 * k) as f32 / num_pos_feats as f32))
            .collect();

        Ok(Self {
            num_pos_feats,
            normalize: config.normalize,
            scale: config.effective_scale(),
            frequencies,
        })
    }

    /// Channels per axis.
    pub fn num_pos_feats(&self) -> usize {
        self.num_pos_feats
    }

    /// Total output channels, equal to the hidden dimension.
    pub fn output_dim(&self) -> usize {
        2 * self.num_pos_feats
    }

    /// Embed a padding mask.
    ///
    /// Input: mask `[B, H, W]`, 1 for padding and 0 for valid pixels
    /// Output: `[B, 2 * num_pos_feats, H, W]`
    ///
    /// An empty mask (`H` or `W` zero) gives an empty embedding.
    pub fn forward<B: Backend>(&self, mask: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, height, width] = mask.dims();
        let device = mask.device();
        if height == 0 || width == 0 {
            return Tensor::zeros([batch, self.output_dim(), height, width], &device);
        }

        let not_mask = mask.sub_scalar(1.0).abs();

        // Running counts as triangular matmuls: rows from the left, columns from the right.
        let rows = lower_triangular::<B>(height, &device)
            .reshape([1, height, height])
            .repeat_dim(0, batch);
        let cols = lower_triangular::<B>(width, &device)
            .transpose()
            .reshape([1, width, width])
            .repeat_dim(0, batch);
        let mut y_embed = rows.matmul(not_mask.clone());
        let mut x_embed = not_mask.matmul(cols);

        if self.normalize {
            let y_last = y_embed
                .clone()
                .narrow(1, height - 1, 1)
                .repeat_dim(1, height);
            let x_last = x_embed.clone().narrow(2, width - 1, 1).repeat_dim(2, width);
            y_embed = y_embed / y_last.add_scalar(NORMALIZE_EPS) * self.scale;
            x_embed = x_embed / x_last.add_scalar(NORMALIZE_EPS) * self.scale;
        }

        let pos_y = self.expand_axis(y_embed, &device);
        let pos_x = self.expand_axis(x_embed, &device);

        Tensor::cat(vec![pos_y, pos_x], 3).permute([0, 3, 1, 2])
    }

    /// Embed a padding mask at a backbone feature resolution.
    ///
    /// The mask is resized with nearest-neighbour sampling
    /// (`src = floor(dst * in / out)`) before embedding.
    pub fn embed_feature_map<B: Backend>(
        &self,
        mask: Tensor<B, 3>,
        feature_size: [usize; 2],
    ) -> Tensor<B, 4> {
        self.forward(resize_mask_nearest(mask, feature_size))
    }

    /// `[B, H, W]` coordinates to interleaved `[B, H, W, num_pos_feats]` sin/cos features.
    fn expand_axis<B: Backend>(&self, embed: Tensor<B, 3>, device: &B::Device) -> Tensor<B, 4> {
        let [batch, height, width] = embed.dims();
        let half = self.frequencies.len();

        let freqs = Tensor::<B, 4>::from_data(
            TensorData::new(self.frequencies.clone(), [1, 1, 1, half]),
            device,
        )
        .repeat_dim(0, batch)
        .repeat_dim(1, height)
        .repeat_dim(2, width);

        let scaled = embed.reshape([batch, height, width, 1]).repeat_dim(3, half) / freqs;
        Tensor::stack::<5>(vec![scaled.clone().sin(), scaled.cos()], 4)
            .reshape([batch, height, width, 2 * half])
    }
}

/// `[n, n]` matrix with ones on and below the diagonal.
fn lower_triangular<B: Backend>(n: usize, device: &B::Device) -> Tensor<B, 2> {
    let values: Vec<f32> = (0..n * n)
        .map(|idx| if idx % n <= idx / n { 1.0 } else { 0.0 })
        .collect();
    Tensor::from_data(TensorData::new(values, [n, n]), device)
}

/// Nearest-neighbour resize of a `[B, H, W]` mask to `[B, h, w]`.
///
/// An empty input has no valid pixels, so it resizes to all padding.
pub fn resize_mask_nearest<B: Backend>(mask: Tensor<B, 3>, size: [usize; 2]) -> Tensor<B, 3> {
    let [batch, in_h, in_w] = mask.dims();
    let [out_h, out_w] = size;
    let device = mask.device();
    if in_h == 0 || in_w == 0 || out_h == 0 || out_w == 0 {
        return Tensor::ones([batch, out_h, out_w], &device);
    }

    let source = |out: usize, input: usize| -> Tensor<B, 1, Int> {
        let idx: Vec<i64> = (0..out).map(|i| ((i * input) / out) as i64).collect();
        Tensor::from_data(TensorData::new(idx, [out]), &device)
    };

    mask.select(1, source(out_h, in_h)).select(2, source(out_w, in_w))
}
