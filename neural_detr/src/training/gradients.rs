//! Host-side gradient buffers for clipping and cross-worker reduction.
//!
//! Gradients leave the autodiff graph as one flat `Vec<f32>` per parameter,
//! in module visiting order. That order is identical for every replica of
//! the same network, which is what makes slot-wise reduction valid.

use std::collections::{HashMap, HashSet};

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::error::{DetrError, Result};
use crate::host::float_values;

/// Gradient of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientSlot {
    /// Parameter the gradient belongs to.
    pub id: ParamId,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub values: Vec<f32>,
}

/// Result of global-norm clipping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipReport {
    /// Norm before clipping.
    pub global_norm: f32,
    /// Factor every gradient was multiplied by.
    pub coefficient: f32,
}

impl ClipReport {
    /// Whether gradients were scaled down.
    pub fn clipped(&self) -> bool {
        self.coefficient < 1.0
    }
}

/// Ordered gradients of every trainable parameter that received one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradientSet {
    slots: Vec<GradientSlot>,
}

impl GradientSet {
    /// Create a set from slots in parameter order.
    pub fn new(slots: Vec<GradientSlot>) -> Self {
        Self { slots }
    }

    /// Copy the gradients of `module`'s parameters out of `grads`.
    pub fn collect<B, M>(module: &M, grads: &GradientsParams) -> Result<Self>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let mut collector = GradientCollector {
            grads,
            slots: Vec::new(),
            error: None,
        };
        module.visit(&mut collector);

        match collector.error {
            Some(err) => Err(err),
            None => Ok(Self {
                slots: collector.slots,
            }),
        }
    }

    /// Turn the set back into optimizer-ready gradients for `module`.
    ///
    /// Slots whose id does not belong to `module` are dropped.
    pub fn into_params<B, M>(self, module: &M) -> GradientsParams
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let mut writer = GradientWriter {
            slots: self.slots.into_iter().map(|s| (s.id, s)).collect(),
            grads: GradientsParams::new(),
        };
        module.visit(&mut writer);
        writer.grads
    }

    /// Split into the slots whose id is in `ids` and the rest, keeping order.
    pub fn partition(self, ids: &HashSet<ParamId>) -> (Self, Self) {
        let (selected, rest) = self.slots.into_iter().partition(|s| ids.contains(&s.id));
        (Self { slots: selected }, Self { slots: rest })
    }

    /// Gradient slots in parameter order.
    pub fn slots(&self) -> &[GradientSlot] {
        &self.slots
    }

    /// Mutable gradient slots in parameter order.
    pub fn slots_mut(&mut self) -> &mut [GradientSlot] {
        &mut self.slots
    }

    /// Number of parameters with a gradient.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no parameter received a gradient.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total number of gradient values.
    pub fn num_values(&self) -> usize {
        self.slots.iter().map(|s| s.values.len()).sum()
    }

    /// Shapes in parameter order, used to verify replicas agree.
    pub fn layout(&self) -> Vec<Vec<usize>> {
        self.slots.iter().map(|s| s.shape.clone()).collect()
    }

    /// Multiply every gradient by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for slot in &mut self.slots {
            for v in &mut slot.values {
                *v *= factor;
            }
        }
    }

    /// `sqrt(sum over parameters of ||g||²)`.
    pub fn global_norm(&self) -> f32 {
        detr_core::global_norm(self.slots.iter().map(|s| s.values.as_slice()))
    }

    /// Whether every value is finite.
    pub fn is_finite(&self) -> bool {
        self.slots
            .iter()
            .all(|s| s.values.iter().all(|v| v.is_finite()))
    }

    /// Scale all gradients so their global norm does not exceed `max_norm`.
    ///
    /// A non-positive `max_norm` disables clipping. A non-finite norm leaves
    /// the gradients untouched so overflow detection still sees them.
    pub fn clip_by_global_norm(&mut self, max_norm: f32) -> ClipReport {
        let global_norm = self.global_norm();
        let coefficient = if max_norm > 0.0 && global_norm.is_finite() {
            detr_core::clip_coefficient(global_norm, max_norm)
        } else {
            1.0
        };

        if coefficient < 1.0 {
            log::debug!(
                "clipping gradients: norm {:.4} > {:.4}, scale {:.4}",
                global_norm,
                max_norm,
                coefficient
            );
            self.scale(coefficient);
        }

        ClipReport {
            global_norm,
            coefficient,
        }
    }
}

struct GradientCollector<'a> {
    grads: &'a GradientsParams,
    slots: Vec<GradientSlot>,
    error: Option<DetrError>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientCollector<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if self.error.is_some() {
            return;
        }
        let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) else {
            return;
        };
        let shape = grad.dims().to_vec();
        match float_values(grad) {
            Ok(values) => self.slots.push(GradientSlot { id, shape, values }),
            Err(err) => self.error = Some(err),
        }
    }
}

struct GradientWriter {
    slots: HashMap<ParamId, GradientSlot>,
    grads: GradientsParams,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientWriter {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if let Some(slot) = self.slots.remove(&id) {
            let grad = Tensor::<B::InnerBackend, D>::from_data(
                TensorData::new(slot.values, slot.shape),
                &tensor.device(),
            );
            self.grads.register::<B::InnerBackend, D>(id, grad);
        }
    }
}
