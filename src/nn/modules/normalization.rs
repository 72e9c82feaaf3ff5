//! # Normalization Layer Modules
//!
//! `BatchNorm1d` (per channel across the batch), `InstanceNorm1d` (per sample
//! and channel across the length axis) and `LayerNorm` (per row across the
//! last axis).

use crate::nn::Module;
use crate::tensor::{ones, ops, zeros, Tensor, TensorData, TensorError};
use ndarray::{Array1, Axis, Ix3};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

const DEFAULT_EPS: f64 = 1e-5;
const DEFAULT_MOMENTUM: f64 = 0.1;

/// Per-channel mean and biased variance of an `(N, C, L)` array, pooled over
/// the batch and length axes.
fn channel_moments(data: &ndarray::ArrayView3<'_, TensorData>) -> (Array1<f64>, Array1<f64>) {
    let channels = data.len_of(Axis(1));
    let mut mean = Array1::<f64>::zeros(channels);
    let mut var = Array1::<f64>::zeros(channels);
    for (c, lane) in data.axis_iter(Axis(1)).enumerate() {
        let count = lane.len() as f64;
        let m = lane.iter().map(|&v| v as f64).sum::<f64>() / count;
        let v = lane.iter().map(|&v| (v as f64 - m).powi(2)).sum::<f64>() / count;
        mean[c] = m;
        var[c] = v;
    }
    (mean, var)
}

fn as_f64(tensor: &Tensor) -> Vec<f64> {
    tensor.data().iter().map(|&v| v as f64).collect()
}

/// Promotes `(N, C)` input to `(N, C, 1)`; passes `(N, C, L)` through.
fn as_three_dim(op: &str, input: &Tensor) -> Result<Tensor, TensorError> {
    match input.ndim() {
        2 => ops::unsqueeze(input, 2),
        3 => Ok(input.clone()),
        _ => Err(TensorError::InvalidRank {
            op: op.to_string(),
            expected: 3,
            shape: input.shape().to_vec(),
        }),
    }
}

/// Applies Batch Normalization over a 2D `(N, C)` or 3D `(N, C, L)` input.
/// `y = gamma * (x - mean) / sqrt(variance + eps) + beta`
///
/// In training mode the statistics come from the batch and the running
/// estimates are updated; in evaluation mode the running estimates are used.
#[derive(Debug)]
pub struct BatchNorm1d {
    pub weight: Tensor, // gamma, shape (C)
    pub bias: Tensor,   // beta, shape (C)

    running_mean: Tensor,
    running_var: Tensor,

    num_features: usize,
    eps: f64,
    momentum: f64,
    is_training: AtomicBool,
}

impl BatchNorm1d {
    pub fn new(num_features: usize) -> Self {
        BatchNorm1d {
            weight: ones(&[num_features]),
            bias: zeros(&[num_features]),
            running_mean: zeros(&[num_features]),
            running_var: ones(&[num_features]),
            num_features,
            eps: DEFAULT_EPS,
            momentum: DEFAULT_MOMENTUM,
            is_training: AtomicBool::new(true),
        }
    }

    pub fn running_mean(&self) -> &Tensor {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Tensor {
        &self.running_var
    }

    fn batch_statistics(
        &self,
        x: &ndarray::ArrayView3<'_, TensorData>,
    ) -> Result<(Array1<f64>, Array1<f64>), TensorError> {
        let count = x.len_of(Axis(0)) * x.len_of(Axis(2));
        if count < 2 {
            return Err(TensorError::Generic(format!(
                "BatchNorm1d: expected more than 1 value per channel when training, got input shape {:?}",
                x.shape()
            )));
        }
        let (mean, var) = channel_moments(x);

        let unbiased = count as f64 / (count as f64 - 1.0);
        let m = self.momentum;
        {
            let mut running_mean = self.running_mean.data_mut();
            let mut running_var = self.running_var.data_mut();
            let running = running_mean.iter_mut().zip(running_var.iter_mut());
            for ((rm, rv), (&bm, &bv)) in running.zip(mean.iter().zip(var.iter())) {
                *rm = ((1.0 - m) * *rm as f64 + m * bm) as TensorData;
                *rv = ((1.0 - m) * *rv as f64 + m * bv * unbiased) as TensorData;
            }
        }
        Ok((mean, var))
    }
}

impl Module for BatchNorm1d {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        let x3 = as_three_dim("BatchNorm1d", input)?;
        if x3.shape()[1] != self.num_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.num_features],
                got: vec![x3.shape()[1]],
            });
        }

        let data = x3.data();
        let x = data.view().into_dimensionality::<Ix3>()?;
        let (mean, var) = if self.is_training.load(Ordering::Relaxed) {
            self.batch_statistics(&x)?
        } else {
            let mean = as_f64(&self.running_mean).into_iter().collect();
            let var = as_f64(&self.running_var).into_iter().collect();
            (mean, var)
        };

        let weight = as_f64(&self.weight);
        let bias = as_f64(&self.bias);
        let mut out = x.to_owned();
        for (c, mut lane) in out.axis_iter_mut(Axis(1)).enumerate() {
            let inv_std = 1.0 / (var[c] + self.eps).sqrt();
            let (m, w, b) = (mean[c], weight[c], bias[c]);
            lane.mapv_inplace(|v| (((v as f64 - m) * inv_std) * w + b) as TensorData);
        }

        let out = Tensor::new(out.into_dyn());
        if input.ndim() == 2 {
            ops::select(&out, 2, 0)
        } else {
            Ok(out)
        }
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = BTreeMap::new();
        params.insert("weight".to_string(), self.weight.clone());
        params.insert("bias".to_string(), self.bias.clone());
        params
    }

    /// Returns parameters AND buffers (running_mean, running_var).
    fn tensors(&self) -> BTreeMap<String, Tensor> {
        let mut tensors = self.parameters();
        tensors.insert("running_mean".to_string(), self.running_mean.clone());
        tensors.insert("running_var".to_string(), self.running_var.clone());
        tensors
    }

    fn train(&self) {
        self.is_training.store(true, Ordering::Relaxed);
    }

    fn eval(&self) {
        self.is_training.store(false, Ordering::Relaxed);
    }
}

/// Applies Instance Normalization over a 3D `(N, C, L)` input: every
/// `(n, c)` row is normalized with its own mean and variance over `L`.
///
/// No affine parameters and no running statistics, so train and eval modes
/// compute the same thing; like PyTorch, training mode refuses rows of length 1.
#[derive(Debug)]
pub struct InstanceNorm1d {
    num_features: usize,
    eps: f64,
    is_training: AtomicBool,
}

impl InstanceNorm1d {
    pub fn new(num_features: usize) -> Self {
        InstanceNorm1d {
            num_features,
            eps: DEFAULT_EPS,
            is_training: AtomicBool::new(true),
        }
    }
}

impl Module for InstanceNorm1d {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        let (channels, length) = match *input.shape() {
            [_, c, l] => (c, l),
            _ => {
                return Err(TensorError::InvalidRank {
                    op: "InstanceNorm1d".to_string(),
                    expected: 3,
                    shape: input.shape().to_vec(),
                })
            }
        };
        if channels != self.num_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.num_features],
                got: vec![channels],
            });
        }
        if length == 0 || (length == 1 && self.is_training.load(Ordering::Relaxed)) {
            return Err(TensorError::Generic(format!(
                "InstanceNorm1d: expected more than 1 spatial element when training, got input shape {:?}",
                input.shape()
            )));
        }

        let mut out = input.data_clone().into_dimensionality::<Ix3>()?;
        for mut row in out.rows_mut() {
            let n = row.len() as f64;
            let mean = row.iter().map(|&v| v as f64).sum::<f64>() / n;
            let var = row.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
            let inv_std = 1.0 / (var + self.eps).sqrt();
            row.mapv_inplace(|v| ((v as f64 - mean) * inv_std) as TensorData);
        }
        Ok(Tensor::new(out.into_dyn()))
    }

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

/// Applies Layer Normalization over the last axis, with a learnable
/// per-feature scale and shift.
#[derive(Debug)]
pub struct LayerNorm {
    pub weight: Tensor,
    pub bias: Tensor,
    normalized_size: usize,
    eps: f64,
}

impl LayerNorm {
    pub fn new(normalized_size: usize) -> Self {
        LayerNorm {
            weight: ones(&[normalized_size]),
            bias: zeros(&[normalized_size]),
            normalized_size,
            eps: DEFAULT_EPS,
        }
    }
}

impl Module for LayerNorm {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        let width = input.shape().last().copied().unwrap_or(0);
        if input.ndim() == 0 || width != self.normalized_size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.normalized_size],
                got: vec![width],
            });
        }
        let last = Axis(input.ndim() - 1);
        let weight = as_f64(&self.weight);
        let bias = as_f64(&self.bias);
        let mut out = input.data_clone();
        for mut lane in out.lanes_mut(last) {
            let n = lane.len() as f64;
            let mean = lane.iter().map(|&v| v as f64).sum::<f64>() / n;
            let var = lane.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
            let inv_std = 1.0 / (var + self.eps).sqrt();
            for (i, v) in lane.iter_mut().enumerate() {
                *v = (((*v as f64 - mean) * inv_std) * weight[i] + bias[i]) as TensorData;
            }
        }
        Ok(Tensor::new(out))
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = BTreeMap::new();
        params.insert("weight".to_string(), self.weight.clone());
        params.insert("bias".to_string(), self.bias.clone());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: &[usize], values: &[f32]) -> Tensor {
        Tensor::from_shape_vec(shape, values.to_vec()).unwrap()
    }

    #[test]
    fn batch_norm_normalizes_each_channel_and_tracks_stats() {
        let bn = BatchNorm1d::new(2);
        // (N=2, C=2, L=2); channel 0 = {1,3,5,7}, channel 1 = {10,10,10,10}
        let x = t(&[2, 2, 2], &[1.0, 3.0, 10.0, 10.0, 5.0, 7.0, 10.0, 10.0]);
        let y = bn.forward(&x).unwrap();
        let d = y.data();
        let c0: Vec<f32> = d.index_axis(Axis(1), 0).iter().copied().collect();
        let mean: f32 = c0.iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!(d.index_axis(Axis(1), 1).iter().all(|v| v.abs() < 1e-3));

        let rm = bn.running_mean().to_vec();
        assert!((rm[0] - 0.4).abs() < 1e-5);
        assert!((rm[1] - 1.0).abs() < 1e-5);
        // unbiased var of {1,3,5,7} = 20/3
        let rv = bn.running_var().to_vec();
        assert!((rv[0] - (0.9 + 0.1 * 20.0 / 3.0)).abs() < 1e-4);
    }

    #[test]
    fn batch_norm_eval_uses_running_stats() {
        let bn = BatchNorm1d::new(3);
        bn.eval();
        let x = t(&[1, 3], &[1.0, 2.0, 3.0]);
        let y = bn.forward(&x).unwrap();
        assert_eq!(y.shape(), &[1, 3]);
        assert!(y.all_close(&x, 1e-3));
        assert_eq!(bn.running_mean().to_vec(), vec![0.0; 3]);
    }

    #[test]
    fn batch_norm_training_needs_more_than_one_value() {
        let bn = BatchNorm1d::new(3);
        assert!(bn.forward(&t(&[1, 3], &[1.0, 2.0, 3.0])).is_err());
    }

    #[test]
    fn batch_norm_rejects_channel_mismatch() {
        let bn = BatchNorm1d::new(4);
        let err = bn.forward(&crate::tensor::ones(&[2, 3, 5])).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
        assert_eq!(bn.tensors().len(), 4);
    }

    #[test]
    fn instance_norm_normalizes_rows() {
        let norm = InstanceNorm1d::new(2);
        let x = t(&[1, 2, 3], &[1.0, 2.0, 3.0, 10.0, 20.0, 30.0]);
        let y = norm.forward(&x).unwrap().to_vec();
        assert!((y[0] + y[2]).abs() < 1e-5);
        assert!(y[1].abs() < 1e-5);
        assert!((y[0] - y[3]).abs() < 1e-4);
    }

    #[test]
    fn instance_norm_single_element_rows() {
        let norm = InstanceNorm1d::new(2);
        let x = t(&[1, 2, 1], &[4.0, 5.0]);
        assert!(norm.forward(&x).is_err());
        norm.eval();
        assert_eq!(norm.forward(&x).unwrap().to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn layer_norm_over_last_axis() {
        let ln = LayerNorm::new(4);
        let x = t(&[2, 4], &[1.0, 2.0, 3.0, 4.0, -1.0, -1.0, -1.0, -1.0]);
        let y = ln.forward(&x).unwrap().to_vec();
        let row0: f32 = y[..4].iter().sum();
        assert!(row0.abs() < 1e-5);
        assert!(y[4..].iter().all(|v| v.abs() < 1e-5));
        assert!(ln.forward(&crate::tensor::ones(&[2, 3])).is_err());
    }
}
