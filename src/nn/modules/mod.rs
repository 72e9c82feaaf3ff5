//! # Neural Network Layer Modules
//!
//! Layers used by the forecasting model.

pub mod linear;
pub use linear::{LazyLinear, Linear};

pub mod dropout;
pub use dropout::Dropout;

pub mod normalization;
pub use normalization::{BatchNorm1d, InstanceNorm1d, LayerNorm};

pub mod pooling;
pub use pooling::AvgPool1d;

pub mod decomposition;
pub use decomposition::{Decomposer, SeriesDecomposition};

pub mod rnn;
pub use rnn::{Backbone, BackboneOutput, HiddenState, MLstmNetwork, SLstmNetwork};
