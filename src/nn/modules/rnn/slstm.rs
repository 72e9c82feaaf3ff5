//! # sLSTM
//!
//! Scalar-memory LSTM: exponential input gate, sigmoid forget and output
//! gates, and a cell state normalized by the sum of the input and forget
//! gates.

use super::{check_hidden, check_sequence, forward_from_zero, Backbone, BackboneOutput, HiddenState};
use crate::nn::modules::{Dropout, LayerNorm, Linear};
use crate::nn::{prefixed, Module};
use crate::tensor::{ops, zeros, Tensor, TensorData, TensorError};
use rand::Rng;
use std::collections::BTreeMap;

/// Pre-activations of the exponential input gate are clamped to this range.
pub(crate) const GATE_CLAMP: TensorData = 10.0;

/// A single sLSTM layer.
#[derive(Debug)]
pub struct SLstmCell {
    input_weights: Linear,  // input_size -> 4 * hidden_size
    hidden_weights: Linear, // hidden_size -> 4 * hidden_size
    hidden_norm: Option<LayerNorm>,
    hidden_size: usize,
}

impl SLstmCell {
    pub fn new<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, layer_norm: bool, rng: &mut R) -> Self {
        SLstmCell {
            input_weights: Linear::new(input_size, 4 * hidden_size, true, rng),
            hidden_weights: Linear::new(hidden_size, 4 * hidden_size, true, rng),
            hidden_norm: layer_norm.then(|| LayerNorm::new(hidden_size)),
            hidden_size,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Advances one step. `x` is `(batch, input)`, `h` and `c` are
    /// `(batch, hidden)`; returns the new `(h, c)`.
    pub fn step(&self, x: &Tensor, h: &Tensor, c: &Tensor) -> Result<(Tensor, Tensor), TensorError> {
        let gates = ops::add(&self.input_weights.forward(x)?, &self.hidden_weights.forward(h)?)?;
        let gates = ops::chunk(&gates, 4, 1)?;
        let i = ops::exp(&ops::clamp(&gates[0], -GATE_CLAMP, GATE_CLAMP));
        let f = ops::sigmoid(&gates[1]);
        let z = ops::tanh(&gates[2]);
        let o = ops::sigmoid(&gates[3]);

        // f + i > 0, the exponential gate is strictly positive
        let c_next = ops::div(
            &ops::add(&ops::mul(&f, c)?, &ops::mul(&i, &z)?)?,
            &ops::add(&f, &i)?,
        )?;
        let mut h_next = ops::mul(&o, &ops::tanh(&c_next))?;
        if let Some(norm) = &self.hidden_norm {
            h_next = norm.forward(&h_next)?;
        }
        Ok((h_next, c_next))
    }
}

impl Module for SLstmCell {
    /// One step from a zero state; input `(batch, input)`, output `(batch, hidden)`.
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        let batch = input.shape().first().copied().unwrap_or(0);
        let state = zeros(&[batch, self.hidden_size]);
        let (h, _) = self.step(input, &state, &state)?;
        Ok(h)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = prefixed("input_weights", self.input_weights.parameters());
        params.extend(prefixed("hidden_weights", self.hidden_weights.parameters()));
        if let Some(norm) = &self.hidden_norm {
            params.extend(prefixed("hidden_norm", norm.parameters()));
        }
        params
    }
}

/// Stacked sLSTM layers with dropout between layers and a linear readout of
/// the top layer's final hidden state.
///
/// Hidden state: `(h, c)`, each `(num_layers, batch, hidden_size)`.
/// Output: a bare `(batch, output_size)` tensor.
#[derive(Debug)]
pub struct SLstmNetwork {
    layers: Vec<SLstmCell>,
    dropout: Dropout,
    fc: Linear,
    input_size: usize,
    hidden_size: usize,
}

impl SLstmNetwork {
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
                "sLSTM: sizes and layer count must be positive".to_string(),
            ));
        }
        let layers = (0..num_layers)
            .map(|l| {
                let width = if l == 0 { input_size } else { hidden_size };
                SLstmCell::new(width, hidden_size, true, rng)
            })
            .collect();
        let fc = Linear::new(hidden_size, output_size, true, rng);
        let dropout = Dropout::new(dropout, rng.gen())?;
        Ok(SLstmNetwork {
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

    fn state_shape(&self, batch_size: usize) -> Vec<usize> {
        vec![self.layers.len(), batch_size, self.hidden_size]
    }
}

impl Backbone for SLstmNetwork {
    fn variant(&self) -> &'static str {
        "slstm"
    }

    fn hidden_arity(&self) -> usize {
        2
    }

    fn init_hidden(&self, batch_size: usize) -> HiddenState {
        let shape = self.state_shape(batch_size);
        HiddenState::new(vec![zeros(&shape), zeros(&shape)])
    }

    fn call(&self, sequence: &Tensor, hidden: &[Tensor]) -> Result<(BackboneOutput, HiddenState), TensorError> {
        let (time, batch) = check_sequence("sLSTM", sequence, self.input_size)?;
        let shape = self.state_shape(batch);
        check_hidden("sLSTM", hidden, &[shape.clone(), shape])?;

        let mut inputs = (0..time)
            .map(|t| ops::select(sequence, 0, t))
            .collect::<Result<Vec<_>, _>>()?;
        let mut final_h = Vec::with_capacity(self.layers.len());
        let mut final_c = Vec::with_capacity(self.layers.len());

        for (l, cell) in self.layers.iter().enumerate() {
            if l > 0 {
                inputs = inputs
                    .iter()
                    .map(|x| self.dropout.forward(x))
                    .collect::<Result<Vec<_>, _>>()?;
            }
            let mut h = ops::select(&hidden[0], 0, l)?;
            let mut c = ops::select(&hidden[1], 0, l)?;
            let mut outputs = Vec::with_capacity(time);
            for x in &inputs {
                let (h_next, c_next) = cell.step(x, &h, &c)?;
                outputs.push(h_next.clone());
                h = h_next;
                c = c_next;
            }
            final_h.push(h);
            final_c.push(c);
            inputs = outputs;
        }

        let top = final_h
            .last()
            .ok_or_else(|| TensorError::Generic("sLSTM has no layers".to_string()))?;
        let readout = self.fc.forward(top)?;
        let state = HiddenState::new(vec![ops::stack(&final_h, 0)?, ops::stack(&final_c, 0)?]);
        Ok((BackboneOutput::Sequence(readout), state))
    }
}

impl Module for SLstmNetwork {
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

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn network(layers: usize) -> SLstmNetwork {
        let mut rng = StdRng::seed_from_u64(7);
        let net = SLstmNetwork::new(3, 8, 8, layers, 0.0, &mut rng).unwrap();
        net.eval();
        net
    }

    fn sequence(time: usize, batch: usize) -> Tensor {
        let mut rng = StdRng::seed_from_u64(11);
        crate::tensor::rand(&[time, batch, 3], &mut rng)
    }

    #[test]
    fn returns_bare_readout_and_two_part_state() {
        let net = network(2);
        let hidden = net.init_hidden(4);
        assert_eq!(hidden.arity(), 2);
        let (output, state) = net.call(&sequence(6, 4), hidden.parts()).unwrap();
        match output {
            BackboneOutput::Sequence(t) => assert_eq!(t.shape(), &[4, 8]),
            other => panic!("expected a bare sequence, got {:?}", other),
        }
        assert_eq!(state.parts()[0].shape(), &[2, 4, 8]);
        assert_eq!(state.parts()[1].shape(), &[2, 4, 8]);
    }

    #[test]
    fn carried_state_changes_the_readout() {
        let net = network(1);
        let seq = sequence(5, 2);
        let (first, state) = net.call(&seq, net.init_hidden(2).parts()).unwrap();
        let (second, _) = net.call(&seq, state.parts()).unwrap();
        let a = first.into_sequence().unwrap();
        let b = second.into_sequence().unwrap();
        assert!(!a.all_close(&b, 1e-6));
    }

    #[test]
    fn rejects_foreign_state() {
        let net = network(1);
        let wrong = vec![zeros(&[1, 2, 8])];
        assert!(net.call(&sequence(5, 2), &wrong).is_err());
    }

    #[test]
    fn cell_state_stays_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        let cell = SLstmCell::new(2, 4, false, &mut rng);
        let x = crate::tensor::uniform(&[3, 2], -50.0, 50.0, &mut rng);
        let (h, c) = cell.step(&x, &zeros(&[3, 4]), &zeros(&[3, 4])).unwrap();
        // c is a convex mix of the previous cell and tanh(z)
        assert!(c.to_vec().iter().all(|v| v.abs() <= 1.0 + 1e-5));
        assert!(h.to_vec().iter().all(|v| v.is_finite()));
        assert_eq!(cell.parameters().len(), 4);
    }

    #[test]
    fn module_forward_starts_from_zero() {
        let net = network(1);
        let y = net.forward(&sequence(4, 3)).unwrap();
        assert_eq!(y.shape(), &[3, 8]);
        assert_eq!(net.parameters().len(), 8);
    }
}
