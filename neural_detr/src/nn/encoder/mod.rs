//! Positional encodings for transformer inputs.

mod sine;

pub use sine::{resize_mask_nearest, PositionEmbeddingSine};
