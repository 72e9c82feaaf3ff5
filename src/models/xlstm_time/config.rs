//! Hyperparameters of the xLSTMTime model.

use crate::models::ModelError;
use crate::nn::Loss;
use crate::tensor::Device;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which recurrent backbone the model runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XLstmType {
    /// Scalar-memory LSTM, hidden state `(h, c)`.
    SLstm,
    /// Matrix-memory LSTM, hidden state `(h, C, n)`.
    MLstm,
}

impl XLstmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            XLstmType::SLstm => "slstm",
            XLstmType::MLstm => "mlstm",
        }
    }
}

impl FromStr for XLstmType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slstm" => Ok(XLstmType::SLstm),
            "mlstm" => Ok(XLstmType::MLstm),
            other => Err(ModelError::InvalidVariant(other.to_string())),
        }
    }
}

impl fmt::Display for XLstmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// xLSTMTime configuration.
///
/// `xlstm_type` stays a plain string so that any selector can be written to
/// or read from JSON; it is parsed when the model is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XLstmTimeConfig {
    /// Number of continuous input features. Informational: the projector
    /// sizes itself from the first batch.
    pub input_size: usize,

    pub hidden_size: usize,

    /// Width of the forecast.
    pub output_size: usize,

    /// "slstm" or "mlstm" (default: "slstm")
    #[serde(default = "default_xlstm_type")]
    pub xlstm_type: String,

    #[serde(default = "default_num_layers")]
    pub num_layers: usize,

    /// Moving-average window of the trend extraction (default: 25)
    #[serde(default = "default_decomposition_kernel")]
    pub decomposition_kernel: usize,

    /// Width of the projected sequence fed to the backbone (default: hidden_size)
    #[serde(default)]
    pub input_projection_size: Option<usize>,

    #[serde(default = "default_dropout")]
    pub dropout: f64,

    #[serde(default)]
    pub loss: Loss,

    /// Explicit placement; resolved against the available backends when unset.
    #[serde(default)]
    pub device: Option<Device>,

    /// Parameter initialization seed; fresh entropy when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_xlstm_type() -> String {
    XLstmType::SLstm.as_str().to_string()
}

fn default_num_layers() -> usize {
    1
}

fn default_decomposition_kernel() -> usize {
    25
}

fn default_dropout() -> f64 {
    0.1
}

impl XLstmTimeConfig {
    pub fn new(input_size: usize, hidden_size: usize, output_size: usize) -> Self {
        XLstmTimeConfig {
            input_size,
            hidden_size,
            output_size,
            xlstm_type: default_xlstm_type(),
            num_layers: default_num_layers(),
            decomposition_kernel: default_decomposition_kernel(),
            input_projection_size: None,
            dropout: default_dropout(),
            loss: Loss::default(),
            device: None,
            seed: None,
        }
    }

    pub fn with_xlstm_type(mut self, xlstm_type: impl Into<String>) -> Self {
        self.xlstm_type = xlstm_type.into();
        self
    }

    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    pub fn with_decomposition_kernel(mut self, kernel: usize) -> Self {
        self.decomposition_kernel = kernel;
        self
    }

    pub fn with_input_projection_size(mut self, size: usize) -> Self {
        self.input_projection_size = Some(size);
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn projection_size(&self) -> usize {
        self.input_projection_size.unwrap_or(self.hidden_size)
    }

    /// Parses the variant selector, then checks the numeric fields.
    pub fn validate(&self) -> Result<XLstmType, ModelError> {
        let variant = self.xlstm_type.parse::<XLstmType>()?;
        let widths = [
            ("input_size", self.input_size),
            ("hidden_size", self.hidden_size),
            ("output_size", self.output_size),
            ("num_layers", self.num_layers),
            ("decomposition_kernel", self.decomposition_kernel),
            ("input_projection_size", self.projection_size()),
        ];
        if let Some((name, _)) = widths.iter().find(|(_, value)| *value == 0) {
            return Err(ModelError::InvalidConfig(format!("{} must be positive", name)));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_round_trip() {
        for variant in [XLstmType::SLstm, XLstmType::MLstm] {
            assert_eq!(variant.to_string().parse::<XLstmType>().unwrap(), variant);
        }
        assert!(matches!("SLSTM".parse::<XLstmType>(), Err(ModelError::InvalidVariant(_))));
    }

    #[test]
    fn json_defaults() {
        let config: XLstmTimeConfig =
            serde_json::from_str(r#"{"input_size": 6, "hidden_size": 16, "output_size": 5}"#).unwrap();
        assert_eq!(config, XLstmTimeConfig::new(6, 16, 5));
        assert_eq!(config.xlstm_type, "slstm");
        assert_eq!(config.decomposition_kernel, 25);
        assert_eq!(config.projection_size(), 16);
        assert_eq!(config.loss, Loss::Smape);
    }

    #[test]
    fn validation_order_and_bounds() {
        let bad_variant = XLstmTimeConfig::new(0, 16, 5).with_xlstm_type("transformer");
        assert!(matches!(bad_variant.validate(), Err(ModelError::InvalidVariant(_))));

        assert!(matches!(
            XLstmTimeConfig::new(6, 0, 5).validate(),
            Err(ModelError::InvalidConfig(_))
        ));
        assert!(XLstmTimeConfig::new(6, 16, 5).with_dropout(1.0).validate().is_err());
        assert_eq!(
            XLstmTimeConfig::new(6, 16, 5).with_xlstm_type("mlstm").validate().unwrap(),
            XLstmType::MLstm
        );
    }
}
