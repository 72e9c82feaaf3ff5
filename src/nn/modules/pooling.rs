//! # Pooling Layer Modules

use crate::nn::functional;
use crate::nn::Module;
use crate::tensor::{Tensor, TensorError};
use std::collections::BTreeMap;

/// Applies a 1D average pooling over an input signal composed of several input planes.
///
/// Input shape: `(N, C, L_in)`
/// Output shape: `(N, C, L_out)`
/// `L_out = floor((L_in + 2 * padding - kernel_size) / stride) + 1`
#[derive(Debug, Clone)]
pub struct AvgPool1d {
    kernel_size: usize,
    stride: usize,
    padding: usize,
}

impl AvgPool1d {
    /// Creates a new AvgPool1d module. `stride` defaults to `kernel_size` when `None`.
    pub fn new(kernel_size: usize, stride: Option<usize>, padding: usize) -> Result<Self, TensorError> {
        let stride = stride.unwrap_or(kernel_size);
        if kernel_size == 0 || stride == 0 {
            return Err(TensorError::Generic(
                "AvgPool1d: kernel_size and stride must be positive".to_string(),
            ));
        }
        Ok(AvgPool1d {
            kernel_size,
            stride,
            padding,
        })
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }
}

impl Module for AvgPool1d {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        functional::avg_pool1d(input, self.kernel_size, self.stride, self.padding)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        BTreeMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stride_is_kernel() {
        let pool = AvgPool1d::new(2, None, 0).unwrap();
        let x = Tensor::from_shape_vec(&[1, 1, 4], vec![1.0, 3.0, 5.0, 7.0]).unwrap();
        assert_eq!(pool.forward(&x).unwrap().to_vec(), vec![2.0, 6.0]);
    }

    #[test]
    fn rejects_zero_kernel() {
        assert!(AvgPool1d::new(0, Some(1), 0).is_err());
    }
}
