//! # Dropout Layer Module

use crate::nn::Module;
use crate::tensor::{ops, Tensor, TensorData, TensorError};
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// During training, randomly zeroes some elements of the input tensor with probability `p`.
/// The remaining elements are scaled up by `1 / (1 - p)`.
/// During evaluation, this layer does nothing and acts as an identity function.
#[derive(Debug)]
pub struct Dropout {
    p: f64,
    is_training: AtomicBool,
    rng: Mutex<StdRng>,
}

impl Dropout {
    /// Creates a new Dropout module drawing its masks from a generator seeded with `seed`.
    pub fn new(p: f64, seed: u64) -> Result<Self, TensorError> {
        if !(0.0..=1.0).contains(&p) {
            return Err(TensorError::Generic(
                "Dropout probability must be between 0 and 1".to_string(),
            ));
        }
        Ok(Dropout {
            p,
            is_training: AtomicBool::new(true),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    pub fn p(&self) -> f64 {
        self.p
    }

    pub fn is_training(&self) -> bool {
        self.is_training.load(Ordering::Relaxed)
    }
}

impl Module for Dropout {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        if !self.is_training() || self.p == 0.0 {
            return Ok(input.clone());
        }
        let scale = if self.p < 1.0 { (1.0 / (1.0 - self.p)) as TensorData } else { 0.0 };
        let mask_data = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            ArrayD::from_shape_simple_fn(IxDyn(input.shape()), || {
                if rng.gen::<f64>() < self.p {
                    0.0
                } else {
                    scale
                }
            })
        };
        ops::mul(input, &Tensor::new(mask_data))
    }

    /// Dropout has no parameters.
    fn parameters(&self) -> BTreeMap<String, Tensor> {
        BTreeMap::new()
    }

    fn train(&self) {
        self.is_training.store(true, Ordering::Relaxed);
    }

    fn eval(&self) {
        self.is_training.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_probability() {
        assert!(Dropout::new(1.5, 0).is_err());
        assert!(Dropout::new(-0.1, 0).is_err());
    }

    #[test]
    fn identity_in_eval_mode() {
        let dropout = Dropout::new(0.5, 3).unwrap();
        dropout.eval();
        let x = crate::tensor::ones(&[8, 8]);
        assert!(dropout.forward(&x).unwrap().all_close(&x, 0.0));
    }

    #[test]
    fn training_mode_zeroes_and_rescales() {
        let dropout = Dropout::new(0.5, 3).unwrap();
        let y = dropout.forward(&crate::tensor::ones(&[64, 64])).unwrap().to_vec();
        assert!(y.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        let kept = y.iter().filter(|&&v| v > 0.0).count() as f64 / y.len() as f64;
        assert!((0.4..0.6).contains(&kept));
    }
}
