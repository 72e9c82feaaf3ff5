//! # mLSTM
//!
//! Matrix-memory LSTM. Each layer keeps a `(hidden, hidden)` memory per
//! sequence, written with the outer product of value and key and read back
//! with the query, plus a normalizer vector that bounds the readout.

use super::slstm::GATE_CLAMP;
use super::{check_hidden, check_sequence, forward_from_zero, Backbone, BackboneOutput, HiddenState};
use crate::nn::modules::{Dropout, LayerNorm, Linear};
use crate::nn::{prefixed, Module};
use crate::tensor::{ops, ones, zeros, Tensor, TensorData, TensorError};
use rand::Rng;
use std::collections::BTreeMap;

/// A single mLSTM layer.
#[derive(Debug)]
pub struct MLstmCell {
    w_q: Linear,
    w_k: Linear,
    w_v: Linear,
    w_i: Linear, // input -> 1
    w_f: Linear, // input -> 1
    w_o: Linear,
    u_o: Linear, // hidden -> hidden, no bias
    hidden_norm: Option<LayerNorm>,
    hidden_size: usize,
}

/// Initial forget-gate bias of the first and last layer; layers in between
/// are spaced linearly. Keeps a carried memory alive across a long window.
pub const FORGET_BIAS_RANGE: (TensorData, TensorData) = (3.0, 6.0);

/// One step's updated `(h, C, n)`.
pub type MLstmStep = (Tensor, Tensor, Tensor);

impl MLstmCell {
    /// `forget_bias` replaces the random bias of the forget gate.
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        hidden_size: usize,
        layer_norm: bool,
        forget_bias: TensorData,
        rng: &mut R,
    ) -> Self {
        let w_q = Linear::new(input_size, hidden_size, true, rng);
        let w_k = Linear::new(input_size, hidden_size, true, rng);
        let w_v = Linear::new(input_size, hidden_size, true, rng);
        let w_i = Linear::new(input_size, 1, true, rng);
        let mut w_f = Linear::new(input_size, 1, true, rng);
        w_f.bias = Some(ops::mul_scalar(&ones(&[1]), forget_bias));
        MLstmCell {
            w_q,
            w_k,
            w_v,
            w_i,
            w_f,
            w_o: Linear::new(input_size, hidden_size, true, rng),
            u_o: Linear::new(hidden_size, hidden_size, false, rng),
            hidden_norm: layer_norm.then(|| LayerNorm::new(hidden_size)),
            hidden_size,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Advances one step. `x` is `(batch, input)`, `h` and `n` are
    /// `(batch, hidden)`, `memory` is `(batch, hidden, hidden)`.
    pub fn step(&self, x: &Tensor, h: &Tensor, memory: &Tensor, n: &Tensor) -> Result<MLstmStep, TensorError> {
        let scale = 1.0 / (self.hidden_size as TensorData).sqrt();
        let q = self.w_q.forward(x)?;
        let k = ops::mul_scalar(&self.w_k.forward(x)?, scale);
        let v = self.w_v.forward(x)?;

        let i = ops::exp(&ops::clamp(&self.w_i.forward(x)?, -GATE_CLAMP, GATE_CLAMP)); // (batch, 1)
        let f = ops::sigmoid(&self.w_f.forward(x)?); // (batch, 1)
        let o = ops::sigmoid(&ops::add(&self.w_o.forward(x)?, &self.u_o.forward(h)?)?);

        // C' = f C + i v k^T
        let outer = ops::mul(&ops::unsqueeze(&v, 2)?, &ops::unsqueeze(&k, 1)?)?;
        let f3 = ops::unsqueeze(&f, 2)?;
        let i3 = ops::unsqueeze(&i, 2)?;
        let memory_next = ops::add(&ops::mul(&f3, memory)?, &ops::mul(&i3, &outer)?)?;
        let n_next = ops::add(&ops::mul(&f, n)?, &ops::mul(&i, &k)?)?;

        let read = ops::sum_axis(&ops::mul(&memory_next, &ops::unsqueeze(&q, 1)?)?, 2, false)?;
        let norm = ops::sum_axis(&ops::mul(&n_next, &q)?, 1, true)?;
        let norm = Tensor::new(norm.data().mapv(|v| v.abs().max(1.0)));
        let mut h_next = ops::mul(&o, &ops::div(&read, &norm)?)?;
        if let Some(ln) = &self.hidden_norm {
            h_next = ln.forward(&h_next)?;
        }
        Ok((h_next, memory_next, n_next))
    }
}

impl Module for MLstmCell {
    /// One step from a zero state; input `(batch, input)`, output `(batch, hidden)`.
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        let batch = input.shape().first().copied().unwrap_or(0);
        let h = zeros(&[batch, self.hidden_size]);
        let memory = zeros(&[batch, self.hidden_size, self.hidden_size]);
        let (h, _, _) = self.step(input, &h, &memory, &h)?;
        Ok(h)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = BTreeMap::new();
        for (name, layer) in [
            ("w_q", &self.w_q),
            ("w_k", &self.w_k),
            ("w_v", &self.w_v),
            ("w_i", &self.w_i),
            ("w_f", &self.w_f),
            ("w_o", &self.w_o),
            ("u_o", &self.u_o),
        ] {
            params.extend(prefixed(name, layer.parameters()));
        }
        if let Some(ln) = &self.hidden_norm {
            params.extend(prefixed("hidden_norm", ln.parameters()));
        }
        params
    }
}

/// Stacked mLSTM layers with dropout between layers.
///
/// Hidden state: `(h, C, n)` with `h` and `n` of shape
/// `(num_layers, batch, hidden_size)` and `C` of shape
/// `(num_layers, batch, hidden_size, hidden_size)`.
/// Output: a tuple of the `(1, batch, output_size)` readout of the top layer's
/// final step and the top layer's `(time, batch, hidden_size)` sequence. The
/// sequence is auxiliary; it is stacked on every call and callers that only
/// forecast can drop it.
#[derive(Debug)]
pub struct MLstmNetwork {
    layers: Vec<MLstmCell>,
    dropout: Dropout,
    fc: Linear,
    input_size: usize,
    hidden_size: usize,
}

impl MLstmNetwork {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        hidden_size: usize,
        output_size: usize,
        num_layers: usize,
        dropout: f64,
        rng: &mut R,
    ) -> Result<Self, TensorError> {
        if input_size == 0 || hidden_size == 0 || output_size == 0 || num_layers == 0 {
            return Err(TensorError::Generic(
                "mLSTM: sizes and layer count must be positive".to_string(),
            ));
        }
        let (low, high) = FORGET_BIAS_RANGE;
        let layers = (0..num_layers)
            .map(|l| {
                let width = if l == 0 { input_size } else { hidden_size };
                let forget_bias = if num_layers == 1 {
                    low
                } else {
                    low + (high - low) * l as TensorData / (num_layers - 1) as TensorData
                };
                MLstmCell::new(width, hidden_size, true, forget_bias, rng)
            })
            .collect();
        let fc = Linear::new(hidden_size, output_size, true, rng);
        let dropout = Dropout::new(dropout, rng.gen())?;
        Ok(MLstmNetwork {
            layers,
            dropout,
            fc,
            input_size,
            hidden_size,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn state_shapes(&self, batch_size: usize) -> [Vec<usize>; 3] {
        let (l, h) = (self.layers.len(), self.hidden_size);
        [vec![l, batch_size, h], vec![l, batch_size, h, h], vec![l, batch_size, h]]
    }
}

impl Backbone for MLstmNetwork {
    fn variant(&self) -> &'static str {
        "mlstm"
    }

    fn hidden_arity(&self) -> usize {
        3
    }

    fn init_hidden(&self, batch_size: usize) -> HiddenState {
        HiddenState::new(self.state_shapes(batch_size).iter().map(|s| zeros(s)).collect())
    }

    fn call(&self, sequence: &Tensor, hidden: &[Tensor]) -> Result<(BackboneOutput, HiddenState), TensorError> {
        let (time, batch) = check_sequence("mLSTM", sequence, self.input_size)?;
        check_hidden("mLSTM", hidden, &self.state_shapes(batch))?;

        let mut inputs = (0..time)
            .map(|t| ops::select(sequence, 0, t))
            .collect::<Result<Vec<_>, _>>()?;
        let mut final_h = Vec::with_capacity(self.layers.len());
        let mut final_memory = Vec::with_capacity(self.layers.len());
        let mut final_n = Vec::with_capacity(self.layers.len());

        for (l, cell) in self.layers.iter().enumerate() {
            if l > 0 {
                inputs = inputs
                    .iter()
                    .map(|x| self.dropout.forward(x))
                    .collect::<Result<Vec<_>, _>>()?;
            }
            let mut h = ops::select(&hidden[0], 0, l)?;
            let mut memory = ops::select(&hidden[1], 0, l)?;
            let mut n = ops::select(&hidden[2], 0, l)?;
            let mut outputs = Vec::with_capacity(time);
            for x in &inputs {
                let (h_next, memory_next, n_next) = cell.step(x, &h, &memory, &n)?;
                outputs.push(h_next.clone());
                h = h_next;
                memory = memory_next;
                n = n_next;
            }
            final_h.push(h);
            final_memory.push(memory);
            final_n.push(n);
            inputs = outputs;
        }

        let top = final_h
            .last()
            .ok_or_else(|| TensorError::Generic("mLSTM has no layers".to_string()))?;
        let readout = ops::unsqueeze(&self.fc.forward(top)?, 0)?;
        let top_sequence = ops::stack(&inputs, 0)?;
        let state = HiddenState::new(vec![
            ops::stack(&final_h, 0)?,
            ops::stack(&final_memory, 0)?,
            ops::stack(&final_n, 0)?,
        ]);
        Ok((BackboneOutput::Tuple(vec![readout, top_sequence]), state))
    }
}

impl Module for MLstmNetwork {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        forward_from_zero(self, input)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = BTreeMap::new();
        for (l, cell) in self.layers.iter().enumerate() {
            params.extend(prefixed(&format!("layers.{}", l), cell.parameters()));
        }
        params.extend(prefixed("fc", self.fc.parameters()));
        params
    }

    fn train(&self) {
        self.dropout.train();
    }

    fn eval(&self) {
        self.dropout.eval();
    }
}
