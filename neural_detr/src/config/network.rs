//! Network-side configuration types.

use burn::config::Config;

/// Configuration for the sine positional embedding.
#[derive(Config, Debug)]
pub struct PositionEncodingConfig {
    /// Transformer hidden dimension; the embedding has this many channels.
    #[config(default = 256)]
    pub hidden_dim: usize,

    /// Base of the frequency progression.
    #[config(default = 10000.0)]
    pub temperature: f32,

    /// Normalize cumulative coordinates to `[0, scale]`.
    #[config(default = true)]
    pub normalize: bool,

    /// Normalization scale. `None` means 2π.
    pub scale: Option<f32>,
}

impl Default for PositionEncodingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionEncodingConfig {
    /// Features per axis: half the hidden dimension.
    #[inline]
    pub fn num_pos_feats(&self) -> usize {
        self.hidden_dim / 2
    }

    /// Effective normalization scale.
    #[inline]
    pub fn effective_scale(&self) -> f32 {
        self.scale.unwrap_or(2.0 * std::f32::consts::PI)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.hidden_dim == 0 || self.hidden_dim % 4 != 0 {
            return Err("hidden_dim must be a positive multiple of 4".to_string());
        }
        if !(self.temperature > 0.0) {
            return Err("temperature must be positive".to_string());
        }
        if self.scale.is_some() && !self.normalize {
            return Err("normalize should be true if scale is passed".to_string());
        }
        Ok(())
    }
}
