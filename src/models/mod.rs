//! # Forecasting Models (`models`)
//!
//! The contract a forecasting model offers its surrounding framework
//! ([`BaseModel`]), the prediction envelope, the dataset description used to
//! deduce default widths, and the xLSTMTime model itself.

use crate::nn::{HiddenState, Loss, Metric};
use crate::tensor::{Device, Tensor, TensorError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod xlstm_time;

pub use xlstm_time::{XLstmTime, XLstmTimeConfig, XLstmType};

/// Errors raised while building or running a model.
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("xlstm_type must be either 'slstm' or 'mlstm', got '{0}'")]
    InvalidVariant(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Device {0} is not available")]
    DeviceUnavailable(Device),
    #[error("Batch is missing required entry '{0}'")]
    MissingInput(String),
    #[error("{variant} hidden state has {expected} parts, got {got}")]
    HiddenStateArity {
        variant: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Input tensor is empty: shape {0:?}")]
    EmptyInput(Vec<usize>),
    #[error("Hyperparameters could not be serialized: {0}")]
    Hyperparameters(#[from] serde_json::Error),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Named input tensors for one forward pass, e.g. `"encoder_cont"`.
pub type Batch = BTreeMap<String, Tensor>;

/// Prediction envelope handed back to the framework.
#[derive(Debug, Clone)]
pub struct NetworkOutput {
    pub prediction: Tensor,
    /// The backbone's updated state; pass it to the next call to carry memory forward.
    pub hidden_state: HiddenState,
}

/// What a forecasting model exposes to the training framework around it.
pub trait BaseModel {
    type HParams: Serialize;

    fn hparams(&self) -> &Self::HParams;

    fn loss(&self) -> &dyn Metric;

    fn forward(&self, batch: &Batch, hidden_state: Option<HiddenState>) -> Result<NetworkOutput, ModelError>;

    fn to_network_output(&self, prediction: Tensor, hidden_state: HiddenState) -> NetworkOutput {
        NetworkOutput {
            prediction,
            hidden_state,
        }
    }

    /// Hyperparameters as pretty-printed JSON.
    fn save_hyperparameters(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self.hparams())?)
    }
}

/// Column layout of a time-series dataset, as far as model construction needs it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub target: Vec<String>,
    #[serde(default)]
    pub target_lags: BTreeMap<String, Vec<usize>>,
    #[serde(default)]
    pub static_reals: Vec<String>,
    #[serde(default)]
    pub time_varying_known_reals: Vec<String>,
    #[serde(default)]
    pub time_varying_unknown_reals: Vec<String>,
    pub max_encoder_length: usize,
    pub max_prediction_length: usize,
}

impl DatasetDescriptor {
    /// Every continuous column fed to the encoder, in model input order.
    pub fn reals(&self) -> Vec<&str> {
        self.static_reals
            .iter()
            .chain(&self.time_varying_known_reals)
            .chain(&self.time_varying_unknown_reals)
            .map(String::as_str)
            .collect()
    }
}

/// Input and output widths implied by `dataset` for the metric `loss`.
pub fn deduce_default_output_parameters(dataset: &DatasetDescriptor, loss: Loss) -> Result<(usize, usize), ModelError> {
    if dataset.target.is_empty() {
        return Err(ModelError::InvalidConfig("dataset has no target".to_string()));
    }
    let input_size = dataset.reals().len();
    if input_size == 0 {
        return Err(ModelError::InvalidConfig("dataset has no continuous inputs".to_string()));
    }
    Ok((input_size, loss.output_size(dataset.target.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> DatasetDescriptor {
        DatasetDescriptor {
            target: vec!["sales".to_string()],
            static_reals: vec!["store_size".to_string()],
            time_varying_known_reals: vec!["price".to_string(), "discount".to_string()],
            time_varying_unknown_reals: vec!["sales".to_string()],
            max_encoder_length: 30,
            max_prediction_length: 5,
            ..Default::default()
        }
    }

    #[test]
    fn reals_keep_column_order() {
        assert_eq!(dataset().reals(), vec!["store_size", "price", "discount", "sales"]);
    }

    #[test]
    fn deduces_widths_from_columns() {
        assert_eq!(deduce_default_output_parameters(&dataset(), Loss::Smape).unwrap(), (4, 1));
        let mut no_target = dataset();
        no_target.target.clear();
        assert!(matches!(
            deduce_default_output_parameters(&no_target, Loss::Mae),
            Err(ModelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn variant_error_message() {
        let err = ModelError::InvalidVariant("gru".to_string());
        assert_eq!(err.to_string(), "xlstm_type must be either 'slstm' or 'mlstm', got 'gru'");
    }
}
