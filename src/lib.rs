//! # xLSTMTime
//!
//! Time-series forecasting with a trend/seasonal decomposition in front of
//! an extended LSTM backbone, in either its scalar-memory (sLSTM) or
//! matrix-memory (mLSTM) form.
//!
//! The crate carries its own small tensor layer on `ndarray`, the layers the
//! model is built from, checkpointing, and optional Python bindings (feature
//! `python`).

pub mod bindings;
pub mod models;
pub mod nn;
pub mod tensor;
pub mod utils;

pub use models::{BaseModel, Batch, DatasetDescriptor, ModelError, NetworkOutput, XLstmTime, XLstmTimeConfig, XLstmType};
pub use nn::{Backbone, BackboneOutput, HiddenState, Loss, Metric, Module};
pub use tensor::{Device, Tensor, TensorError};
