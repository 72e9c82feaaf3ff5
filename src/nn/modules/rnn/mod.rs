//! # Recurrent Backbones
//!
//! Two interchangeable multi-layer recurrent networks consume a time-major
//! `(time, batch, features)` sequence:
//!
//! - [`SLstmNetwork`] (scalar memory) carries a 2-element state `(h, c)` and
//!   returns a bare `(batch, out)` readout.
//! - [`MLstmNetwork`] (matrix memory) carries a 3-element state `(h, C, n)` and
//!   returns a tuple whose first element is the `(1, batch, out)` readout.
//!
//! Callers hold the state as an opaque [`HiddenState`] and only ever hand it
//! back to the backbone that produced it.

use crate::nn::Module;
use crate::tensor::{Tensor, TensorError};

pub mod mlstm;
pub mod slstm;

pub use mlstm::{MLstmCell, MLstmNetwork};
pub use slstm::{SLstmCell, SLstmNetwork};

/// Ordered tuple of state tensors. Arity and shapes belong to the backbone.
#[derive(Debug, Clone)]
pub struct HiddenState(Vec<Tensor>);

impl HiddenState {
    pub fn new(parts: Vec<Tensor>) -> Self {
        HiddenState(parts)
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn parts(&self) -> &[Tensor] {
        &self.0
    }

    pub fn into_parts(self) -> Vec<Tensor> {
        self.0
    }

    /// Copies every element into fresh storage.
    pub fn deep_clone(&self) -> Self {
        HiddenState(self.0.iter().map(Tensor::deep_clone).collect())
    }
}

/// What a backbone call returns in place of a plain sequence.
#[derive(Debug, Clone)]
pub enum BackboneOutput {
    Sequence(Tensor),
    /// The first element is the sequence; the rest are auxiliary outputs.
    Tuple(Vec<Tensor>),
}

impl BackboneOutput {
    /// The sequence itself, or the first tuple element. `None` for an empty tuple.
    pub fn into_sequence(self) -> Option<Tensor> {
        match self {
            BackboneOutput::Sequence(sequence) => Some(sequence),
            BackboneOutput::Tuple(parts) => parts.into_iter().next(),
        }
    }
}

/// Runs `backbone` from a fresh state and returns its sequence output.
pub(crate) fn forward_from_zero<B: Backbone + ?Sized>(backbone: &B, sequence: &Tensor) -> Result<Tensor, TensorError> {
    let batch = sequence.shape().get(1).copied().unwrap_or(0);
    let hidden = backbone.init_hidden(batch);
    let (output, _) = backbone.call(sequence, hidden.parts())?;
    output
        .into_sequence()
        .ok_or_else(|| TensorError::Generic(format!("{} returned an empty tuple", backbone.variant())))
}

/// Capability contract shared by the recurrent variants.
pub trait Backbone: Module {
    /// Short selector name, e.g. `"slstm"`.
    fn variant(&self) -> &'static str;

    /// Number of tensors in this backbone's hidden state.
    fn hidden_arity(&self) -> usize;

    /// A zeroed state for `batch_size` sequences.
    fn init_hidden(&self, batch_size: usize) -> HiddenState;

    /// Runs the network over a time-major sequence starting from `hidden`.
    fn call(&self, sequence: &Tensor, hidden: &[Tensor]) -> Result<(BackboneOutput, HiddenState), TensorError>;
}

/// Validates a `(time, batch, input_size)` sequence; returns `(time, batch)`.
pub(crate) fn check_sequence(op: &str, sequence: &Tensor, input_size: usize) -> Result<(usize, usize), TensorError> {
    match *sequence.shape() {
        [_, _, f] if f != input_size => Err(TensorError::ShapeMismatch {
            expected: vec![input_size],
            got: vec![f],
        }),
        [0, _, _] => Err(TensorError::Generic(format!("{}: empty sequence", op))),
        [t, b, _] => Ok((t, b)),
        _ => Err(TensorError::InvalidRank {
            op: op.to_string(),
            expected: 3,
            shape: sequence.shape().to_vec(),
        }),
    }
}

/// Checks a supplied state against the arity and element shapes the backbone expects.
pub(crate) fn check_hidden(op: &str, hidden: &[Tensor], expected: &[Vec<usize>]) -> Result<(), TensorError> {
    if hidden.len() != expected.len() {
        return Err(TensorError::Generic(format!(
            "{}: expected a hidden state of {} tensors, got {}",
            op,
            expected.len(),
            hidden.len()
        )));
    }
    for (part, shape) in hidden.iter().zip(expected) {
        if part.shape() != shape.as_slice() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.clone(),
                got: part.shape().to_vec(),
            });
        }
    }
    Ok(())
}
