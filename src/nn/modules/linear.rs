//! # Linear Layer Modules
//!
//! `Linear` applies `y = xA^T + b` over the last axis. `LazyLinear` defers
//! building its `Linear` until the first input reveals the input width.

use crate::nn::Module;
use crate::tensor::{ops, uniform, Tensor, TensorData, TensorError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing::debug;

/// Applies a linear transformation to the incoming data: `y = xA^T + b`.
///
/// Input shape: `(*, in_features)` where `*` means any number of leading dimensions.
/// Output shape: `(*, out_features)`
#[derive(Debug)]
pub struct Linear {
    pub weight: Tensor,       // Shape: (out_features, in_features)
    pub bias: Option<Tensor>, // Shape: (out_features)

    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Creates a new Linear module.
    ///
    /// Weight and bias are drawn from `U(-k, k)` with `k = 1 / sqrt(in_features)`,
    /// the PyTorch default. `in_features` must be positive.
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, bias: bool, rng: &mut R) -> Self {
        let k = (1.0 / in_features as TensorData).sqrt();
        let weight = uniform(&[out_features, in_features], -k, k, rng);
        let bias = bias.then(|| uniform(&[out_features], -k, k, rng));
        Linear {
            weight,
            bias,
            in_features,
            out_features,
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        let width = input.shape().last().copied().unwrap_or(0);
        if input.ndim() == 0 || width != self.in_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.in_features],
                got: vec![width],
            });
        }
        let weight_t = ops::transpose(&self.weight, 0, 1)?;
        let output = ops::matmul(input, &weight_t)?;
        match self.bias {
            Some(ref bias) => ops::add(&output, bias),
            None => Ok(output),
        }
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = BTreeMap::new();
        params.insert("weight".to_string(), self.weight.clone());
        if let Some(ref bias) = self.bias {
            params.insert("bias".to_string(), bias.clone());
        }
        params
    }
}

/// A `Linear` whose input width is fixed by the first tensor it sees.
///
/// Construction happens at most once, even when several threads race on the
/// first call; every later caller observes the same layer. Once built, an
/// input of a different width fails in `Linear::forward` with a shape
/// mismatch.
#[derive(Debug)]
pub struct LazyLinear {
    out_features: usize,
    bias: bool,
    inner: OnceLock<Linear>,
    // Consumed only by the one-time construction.
    rng: Mutex<StdRng>,
}

impl LazyLinear {
    pub fn new(out_features: usize, bias: bool, seed: u64) -> Self {
        LazyLinear {
            out_features,
            bias,
            inner: OnceLock::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// The constructed layer, if any input has been seen yet.
    pub fn get(&self) -> Option<&Linear> {
        self.inner.get()
    }

    /// Input width the layer was built for.
    pub fn in_features(&self) -> Option<usize> {
        self.get().map(Linear::in_features)
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Returns the layer, building it for `in_features` if this is the first use.
    pub fn get_or_init(&self, in_features: usize) -> Result<&Linear, TensorError> {
        if in_features == 0 {
            return Err(TensorError::Generic(
                "lazy linear layer cannot be built for an input width of 0".to_string(),
            ));
        }
        Ok(self.inner.get_or_init(|| {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            debug!(in_features, out_features = self.out_features, "materializing lazy linear layer");
            Linear::new(in_features, self.out_features, self.bias, &mut *rng)
        }))
    }
}

impl Module for LazyLinear {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        let width = input.shape().last().copied().unwrap_or(0);
        self.get_or_init(width)?.forward(input)
    }

    /// Empty until the first forward call.
    fn parameters(&self) -> BTreeMap<String, Tensor> {
        self.get().map(Linear::parameters).unwrap_or_default()
    }
}
