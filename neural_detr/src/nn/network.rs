//! The network interface the training step drives.

use burn::module::{Module, ParamId};
use burn::prelude::*;

use crate::error::{DetrError, Result};

/// Predictions of one decoder layer.
#[derive(Debug, Clone)]
pub struct LayerPrediction<B: Backend> {
    /// Class logits `[B, Q, num_classes + 1]`, no-object last.
    pub logits: Tensor<B, 3>,
    /// Boxes `[B, Q, 4]` in normalized center-size format.
    pub boxes: Tensor<B, 3>,
}

impl<B: Backend> LayerPrediction<B> {
    /// Create a layer prediction.
    pub fn new(logits: Tensor<B, 3>, boxes: Tensor<B, 3>) -> Self {
        Self { logits, boxes }
    }

    /// Batch size and number of queries.
    pub fn batch_queries(&self) -> [usize; 2] {
        let [b, q, _] = self.logits.dims();
        [b, q]
    }
}

/// Network output: one prediction per supervised decoder layer, last layer last.
#[derive(Debug, Clone)]
pub struct DetrOutput<B: Backend> {
    /// Per-layer predictions in decoder order.
    pub layers: Vec<LayerPrediction<B>>,
}

impl<B: Backend> DetrOutput<B> {
    /// Output of a network without auxiliary heads.
    pub fn single(logits: Tensor<B, 3>, boxes: Tensor<B, 3>) -> Self {
        Self {
            layers: vec![LayerPrediction::new(logits, boxes)],
        }
    }

    /// Split predictions stacked along a leading layer dimension.
    ///
    /// Inputs: logits `[L, B, Q, C+1]`, boxes `[L, B, Q, 4]`
    pub fn from_stacked(logits: Tensor<B, 4>, boxes: Tensor<B, 4>) -> Result<Self> {
        let [layers, batch, queries, classes] = logits.dims();
        let box_dims = boxes.dims();
        if box_dims != [layers, batch, queries, 4] {
            return Err(DetrError::shape(
                "stacked pred_boxes",
                &[layers, batch, queries, 4],
                &box_dims,
            ));
        }

        let layers = (0..layers)
            .map(|i| {
                LayerPrediction::new(
                    logits.clone().narrow(0, i, 1).reshape([batch, queries, classes]),
                    boxes.clone().narrow(0, i, 1).reshape([batch, queries, 4]),
                )
            })
            .collect();

        Ok(Self { layers })
    }

    /// Number of decoder layers carried.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Final decoder layer, the one used for inference.
    pub fn last(&self) -> Option<&LayerPrediction<B>> {
        self.layers.last()
    }
}

/// A DETR-style detector: backbone, transformer and prediction heads.
///
/// The architecture is opaque to the training core; it only needs the
/// per-layer predictions for an image batch and its padding mask.
pub trait DetrNetwork<B: Backend>: Module<B> {
    /// Run the network.
    ///
    /// Inputs: images `[B, C, H, W]`, mask `[B, H, W]` (1 = padding)
    fn forward(&self, images: Tensor<B, 4>, mask: Tensor<B, 3>) -> DetrOutput<B>;

    /// Parameters trained at the backbone learning rate.
    ///
    /// Every other parameter uses the base learning rate. The default puts
    /// the whole network in the base group.
    fn backbone_param_ids(&self) -> Vec<ParamId> {
        Vec::new()
    }
}
