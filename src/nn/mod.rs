//! # Neural Network Module (`nn`)
//!
//! Building blocks for the forecasting model: layers, the recurrent
//! backbones, the series decomposition, functional helpers and loss metrics.

use crate::tensor::{Tensor, TensorError};
use std::collections::BTreeMap;
use std::fmt::Debug;

// --- Submodules ---
pub mod functional;
pub mod loss;
pub mod modules;

// Re-export common items
pub use loss::{Loss, Metric};
pub use modules::*;

/// Base trait for all neural network modules.
///
/// `Send + Sync` so that a model can be shared across threads; modules with
/// mode-dependent behaviour keep their training flag (and any buffers) behind
/// interior mutability, which is why `train`/`eval` take `&self`.
pub trait Module: Debug + Send + Sync {
    /// Performs the forward pass of the module.
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError>;

    /// Learnable tensors, keyed by a dotted name (e.g. "weight", "layers.0.bias").
    /// BTreeMap for deterministic order.
    fn parameters(&self) -> BTreeMap<String, Tensor>;

    /// Parameters plus buffers (e.g. running mean/variance in BatchNorm).
    fn tensors(&self) -> BTreeMap<String, Tensor> {
        self.parameters()
    }

    /// Sets the module to training mode.
    fn train(&self) {}

    /// Sets the module to evaluation mode.
    fn eval(&self) {}
}

/// Prefixes every key of a child's tensor map with `prefix.`.
pub(crate) fn prefixed(prefix: &str, tensors: BTreeMap<String, Tensor>) -> BTreeMap<String, Tensor> {
    tensors
        .into_iter()
        .map(|(name, tensor)| (format!("{}.{}", prefix, name), tensor))
        .collect()
}
