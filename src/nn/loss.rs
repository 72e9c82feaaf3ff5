//! # Loss Metrics
//!
//! Point-forecast metrics the model can be configured with. The surrounding
//! training loop owns loss computation; the model only carries the handle and
//! uses it to deduce its output width.

use crate::tensor::{Tensor, TensorData, TensorError};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A loss metric between a prediction and a target of the same shape.
pub trait Metric: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Mean loss over all elements.
    fn loss(&self, prediction: &Tensor, target: &Tensor) -> Result<TensorData, TensorError>;

    /// Number of network outputs needed to forecast `n_targets` target series.
    fn output_size(&self, n_targets: usize) -> usize {
        n_targets
    }
}

/// Specifies the metric to use. Defaults to SMAPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loss {
    #[default]
    Smape,
    Mae,
    Mse,
    Rmse,
}

fn mean_of<F>(prediction: &Tensor, target: &Tensor, f: F) -> Result<TensorData, TensorError>
where
    F: Fn(TensorData, TensorData) -> TensorData,
{
    if prediction.shape() != target.shape() {
        return Err(TensorError::ShapeMismatch {
            expected: target.shape().to_vec(),
            got: prediction.shape().to_vec(),
        });
    }
    let n = prediction.size();
    if n == 0 {
        return Err(TensorError::Generic("loss of an empty tensor".to_string()));
    }
    let p = prediction.data();
    let t = target.data();
    let total: TensorData = p.iter().zip(t.iter()).map(|(&y, &x)| f(y, x)).sum();
    Ok(total / n as TensorData)
}

impl Metric for Loss {
    fn name(&self) -> &'static str {
        match self {
            Loss::Smape => "SMAPE",
            Loss::Mae => "MAE",
            Loss::Mse => "MSE",
            Loss::Rmse => "RMSE",
        }
    }

    fn loss(&self, prediction: &Tensor, target: &Tensor) -> Result<TensorData, TensorError> {
        match self {
            Loss::Smape => mean_of(prediction, target, |y, x| {
                2.0 * (y - x).abs() / (y.abs() + x.abs() + 1e-8)
            }),
            Loss::Mae => mean_of(prediction, target, |y, x| (y - x).abs()),
            Loss::Mse => mean_of(prediction, target, |y, x| (y - x) * (y - x)),
            Loss::Rmse => mean_of(prediction, target, |y, x| (y - x) * (y - x)).map(TensorData::sqrt),
        }
    }
}

impl std::str::FromStr for Loss {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smape" => Ok(Loss::Smape),
            "mae" => Ok(Loss::Mae),
            "mse" => Ok(Loss::Mse),
            "rmse" => Ok(Loss::Rmse),
            _ => Err(format!("unknown loss '{}'", s)),
        }
    }
}
