//! # xLSTMTime
//!
//! Forecasting model that decomposes the encoder window into trend and
//! seasonal parts, projects the fused features, and runs them through a
//! scalar (sLSTM) or matrix (mLSTM) memory backbone.
//!
//! The forward pass, for an `encoder_cont` input of shape `(B, T, F)`:
//!
//! 1. decompose and fuse: `(B, T, 2F)`
//! 2. lazy projection: `(B, T, P)`, built on the first call
//! 3. batch normalization over the `P` channels
//! 4. backbone in time-major order `(T, B, P)`, from a fresh state unless one is carried
//! 5. output head and instance normalization over `(1, B, output_size)`
//! 6. row 0 of the leading axis, truncated to `output_size`: `(B, output_size)`

mod boundary;
pub mod config;

pub use boundary::{restore_leading_axis, unwrap_sequence};
pub use config::{XLstmTimeConfig, XLstmType};

use crate::models::{deduce_default_output_parameters, BaseModel, Batch, DatasetDescriptor, ModelError, NetworkOutput};
use crate::nn::{
    prefixed, Backbone, BatchNorm1d, Decomposer, HiddenState, InstanceNorm1d, LazyLinear, Linear, MLstmNetwork,
    Metric, Module, SLstmNetwork, SeriesDecomposition,
};
use crate::tensor::{ops, Device, Tensor, TensorData, TensorError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::{debug, info, trace};

/// Batch entry holding the continuous encoder covariates.
pub const ENCODER_CONT: &str = "encoder_cont";

#[derive(Debug)]
pub struct XLstmTime {
    hparams: XLstmTimeConfig,
    variant: XLstmType,
    device: Device,
    decomposition: Box<dyn Decomposer>,
    input_linear: LazyLinear,
    batch_norm: BatchNorm1d,
    backbone: Box<dyn Backbone>,
    output_linear: Linear,
    instance_norm: InstanceNorm1d,
}

fn build_backbone(
    variant: XLstmType,
    config: &XLstmTimeConfig,
    rng: &mut StdRng,
) -> Result<Box<dyn Backbone>, TensorError> {
    let (input, hidden) = (config.projection_size(), config.hidden_size);
    let backbone: Box<dyn Backbone> = match variant {
        XLstmType::SLstm => Box::new(SLstmNetwork::new(input, hidden, hidden, config.num_layers, config.dropout, rng)?),
        XLstmType::MLstm => Box::new(MLstmNetwork::new(input, hidden, hidden, config.num_layers, config.dropout, rng)?),
    };
    Ok(backbone)
}

impl XLstmTime {
    /// Builds the model. The variant selector is checked before anything is
    /// allocated; the projector stays unbuilt until the first forward call.
    pub fn new(config: XLstmTimeConfig) -> Result<Self, ModelError> {
        Self::with_backbone(config, build_backbone)
    }

    /// Builds the model with widths deduced from `dataset`, overriding the
    /// `input_size` and `output_size` of `config`.
    pub fn from_dataset(dataset: &DatasetDescriptor, config: XLstmTimeConfig) -> Result<Self, ModelError> {
        let (input_size, output_size) = deduce_default_output_parameters(dataset, config.loss)?;
        Self::new(XLstmTimeConfig {
            input_size,
            output_size,
            ..config
        })
    }

    pub(crate) fn with_backbone<F>(config: XLstmTimeConfig, make_backbone: F) -> Result<Self, ModelError>
    where
        F: FnOnce(XLstmType, &XLstmTimeConfig, &mut StdRng) -> Result<Box<dyn Backbone>, TensorError>,
    {
        let variant = config.validate()?;
        let device = Device::resolve(config.device, Device::accelerator_available());
        if !device.is_available() {
            return Err(ModelError::DeviceUnavailable(device));
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let projection_size = config.projection_size();
        let decomposition = Box::new(SeriesDecomposition::new(config.decomposition_kernel)?);
        let input_linear = LazyLinear::new(projection_size, true, rng.gen());
        let batch_norm = BatchNorm1d::new(projection_size);
        let backbone = make_backbone(variant, &config, &mut rng)?;
        let output_linear = Linear::new(config.hidden_size, config.output_size, true, &mut rng);
        let instance_norm = InstanceNorm1d::new(config.output_size);

        info!(
            variant = %variant,
            device = %device,
            hidden_size = config.hidden_size,
            output_size = config.output_size,
            projection_size,
            num_layers = config.num_layers,
            "built xLSTMTime model"
        );

        Ok(XLstmTime {
            hparams: config,
            variant,
            device,
            decomposition,
            input_linear,
            batch_norm,
            backbone,
            output_linear,
            instance_norm,
        })
    }

    pub fn variant(&self) -> XLstmType {
        self.variant
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Fused feature width the projector was built for, once it exists.
    pub fn projector_in_features(&self) -> Option<usize> {
        self.input_linear.in_features()
    }

    /// Builds the projector for `in_features` if it does not exist yet.
    pub(crate) fn materialize_projector(&self, in_features: usize) -> Result<(), TensorError> {
        self.input_linear.get_or_init(in_features).map(|_| ())
    }

    /// Parameters and buffers by dotted name. The projector appears only once built.
    pub fn state_dict(&self) -> BTreeMap<String, Tensor> {
        self.tensors()
    }

    /// The configured metric evaluated on `prediction` against `target`.
    pub fn loss_on(&self, prediction: &Tensor, target: &Tensor) -> Result<TensorData, ModelError> {
        Ok(self.hparams.loss.loss(prediction, target)?)
    }

    /// Runs the model on an `encoder_cont` tensor alone.
    pub fn predict(&self, encoder_cont: &Tensor, hidden_state: Option<HiddenState>) -> Result<NetworkOutput, ModelError> {
        let (batch_size, time, features) = match *encoder_cont.shape() {
            [b, t, f] => (b, t, f),
            _ => {
                return Err(TensorError::InvalidRank {
                    op: "XLstmTime::forward".to_string(),
                    expected: 3,
                    shape: encoder_cont.shape().to_vec(),
                }
                .into())
            }
        };
        if batch_size == 0 || time == 0 || features == 0 {
            return Err(ModelError::EmptyInput(encoder_cont.shape().to_vec()));
        }

        let (trend, seasonal) = self.decomposition.decompose(encoder_cont)?;
        let fused = ops::cat(&[trend, seasonal], 2)?;
        trace!(shape = ?fused.shape(), "fused decomposition");

        let projected = self.input_linear.forward(&fused)?;
        let normalized = ops::transpose(&self.batch_norm.forward(&ops::transpose(&projected, 1, 2)?)?, 1, 2)?;
        trace!(shape = ?normalized.shape(), "projected and normalized");

        let hidden = match hidden_state {
            Some(hidden) if hidden.arity() != self.backbone.hidden_arity() => {
                return Err(ModelError::HiddenStateArity {
                    variant: self.backbone.variant(),
                    expected: self.backbone.hidden_arity(),
                    got: hidden.arity(),
                })
            }
            Some(hidden) => hidden,
            None => {
                debug!(batch_size, variant = %self.variant, "initializing hidden state");
                self.backbone.init_hidden(batch_size)
            }
        };
        let time_major = ops::transpose(&normalized, 0, 1)?;
        let (output, hidden_state) = self.backbone.call(&time_major, hidden.parts())?;
        if hidden_state.arity() != self.backbone.hidden_arity() {
            return Err(ModelError::HiddenStateArity {
                variant: self.backbone.variant(),
                expected: self.backbone.hidden_arity(),
                got: hidden_state.arity(),
            });
        }

        let sequence = restore_leading_axis(unwrap_sequence(output)?)?;
        let head = self.output_linear.forward(&sequence)?;
        let head = ops::transpose(&self.instance_norm.forward(&ops::transpose(&head, 1, 2)?)?, 1, 2)?;
        trace!(shape = ?head.shape(), "output head");

        let first = ops::select(&head, 0, 0)?;
        let last_axis = first.ndim() - 1;
        let prediction = ops::narrow(&first, last_axis, 0, self.hparams.output_size)?;
        Ok(self.to_network_output(prediction, hidden_state))
    }
}

impl BaseModel for XLstmTime {
    type HParams = XLstmTimeConfig;

    fn hparams(&self) -> &XLstmTimeConfig {
        &self.hparams
    }

    fn loss(&self) -> &dyn Metric {
        &self.hparams.loss
    }

    /// Reads `encoder_cont` from `batch` and forecasts from it.
    fn forward(&self, batch: &Batch, hidden_state: Option<HiddenState>) -> Result<NetworkOutput, ModelError> {
        let encoder_cont = batch
            .get(ENCODER_CONT)
            .ok_or_else(|| ModelError::MissingInput(ENCODER_CONT.to_string()))?;
        self.predict(encoder_cont, hidden_state)
    }
}

impl Module for XLstmTime {
    /// `encoder_cont` in, prediction out, from a fresh hidden state.
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        match self.predict(input, None) {
            Ok(output) => Ok(output.prediction),
            Err(ModelError::Tensor(err)) => Err(err),
            Err(err) => Err(TensorError::Generic(err.to_string())),
        }
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = prefixed("input_linear", self.input_linear.parameters());
        params.extend(prefixed("batch_norm", self.batch_norm.parameters()));
        params.extend(prefixed("backbone", self.backbone.parameters()));
        params.extend(prefixed("output_linear", self.output_linear.parameters()));
        params
    }

    fn tensors(&self) -> BTreeMap<String, Tensor> {
        let mut tensors = self.parameters();
        tensors.extend(prefixed("batch_norm", self.batch_norm.tensors()));
        tensors
    }

    fn train(&self) {
        self.batch_norm.train();
        self.backbone.train();
        self.instance_norm.train();
    }

    fn eval(&self) {
        self.batch_norm.eval();
        self.backbone.eval();
        self.instance_norm.eval();
    }
}
