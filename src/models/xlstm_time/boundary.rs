//! Shape normalization where backbone output re-enters the model.

use crate::nn::BackboneOutput;
use crate::tensor::{ops, Tensor, TensorError};

/// The backbone's sequence: the tensor itself, or the first tuple element.
pub fn unwrap_sequence(output: BackboneOutput) -> Result<Tensor, TensorError> {
    output
        .into_sequence()
        .ok_or_else(|| TensorError::Generic("backbone returned an empty tuple".to_string()))
}

/// Puts back the leading axis a backbone squeezed away: rank 2 gains a
/// leading singleton, rank 3 passes through, anything else is an error.
pub fn restore_leading_axis(sequence: Tensor) -> Result<Tensor, TensorError> {
    match sequence.ndim() {
        2 => ops::unsqueeze(&sequence, 0),
        3 => Ok(sequence),
        _ => Err(TensorError::InvalidRank {
            op: "restore_leading_axis".to_string(),
            expected: 3,
            shape: sequence.shape().to_vec(),
        }),
    }
}
