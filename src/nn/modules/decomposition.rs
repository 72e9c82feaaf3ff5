//! # Series Decomposition
//!
//! Splits a `(batch, time, features)` series into a moving-average trend and
//! the seasonal remainder.

use crate::nn::functional;
use crate::nn::modules::AvgPool1d;
use crate::nn::Module;
use crate::tensor::{ops, Tensor, TensorError};
use std::fmt::Debug;
use tracing::trace;

/// Anything that splits a `(batch, time, features)` sequence into two
/// components of the input's shape.
pub trait Decomposer: Debug + Send + Sync {
    /// Returns `(trend, seasonal)`.
    fn decompose(&self, input: &Tensor) -> Result<(Tensor, Tensor), TensorError>;

    /// How many components the fused feature axis holds per input feature.
    fn component_count(&self) -> usize {
        2
    }
}

/// Moving-average decomposition: `trend = avg_pool(x)` over time with
/// `kernel / 2` zero padding, `seasonal = x - trend`.
#[derive(Debug, Clone)]
pub struct SeriesDecomposition {
    pool: AvgPool1d,
}

impl SeriesDecomposition {
    pub fn new(kernel_size: usize) -> Result<Self, TensorError> {
        if kernel_size == 0 {
            return Err(TensorError::Generic(
                "SeriesDecomposition: kernel_size must be positive".to_string(),
            ));
        }
        Ok(SeriesDecomposition {
            pool: AvgPool1d::new(kernel_size, Some(1), kernel_size / 2)?,
        })
    }

    pub fn kernel_size(&self) -> usize {
        self.pool.kernel_size()
    }
}

impl Decomposer for SeriesDecomposition {
    fn decompose(&self, input: &Tensor) -> Result<(Tensor, Tensor), TensorError> {
        let time = match *input.shape() {
            [_, t, _] => t,
            _ => {
                return Err(TensorError::InvalidRank {
                    op: "SeriesDecomposition".to_string(),
                    expected: 3,
                    shape: input.shape().to_vec(),
                })
            }
        };

        let channels_first = ops::transpose(input, 1, 2)?;
        let mut trend = self.pool.forward(&channels_first)?;
        if trend.shape()[2] != time {
            // even kernels pool to time + 1
            trend = functional::interpolate_linear(&trend, time)?;
        }
        let trend = ops::transpose(&trend, 1, 2)?;
        let seasonal = ops::sub(input, &trend)?;
        trace!(shape = ?input.shape(), "decomposed series");
        Ok((trend, seasonal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_sum_to_input() {
        let values: Vec<f32> = (0..2 * 10 * 3).map(|v| ((v * 7) % 11) as f32).collect();
        let x = Tensor::from_shape_vec(&[2, 10, 3], values).unwrap();
        let decomp = SeriesDecomposition::new(5).unwrap();
        let (trend, seasonal) = decomp.decompose(&x).unwrap();
        assert_eq!(trend.shape(), x.shape());
        assert_eq!(seasonal.shape(), x.shape());
        let rebuilt = ops::add(&trend, &seasonal).unwrap();
        assert!(rebuilt.all_close(&x, 1e-5));
    }

    #[test]
    fn even_kernel_keeps_length() {
        let x = crate::tensor::ones(&[1, 30, 2]);
        let decomp = SeriesDecomposition::new(4).unwrap();
        let (trend, _) = decomp.decompose(&x).unwrap();
        assert_eq!(trend.shape(), &[1, 30, 2]);
    }

    #[test]
    fn constant_series_has_flat_interior_trend() {
        let x = crate::tensor::ones(&[1, 9, 1]);
        let (trend, seasonal) = SeriesDecomposition::new(3).unwrap().decompose(&x).unwrap();
        let t = trend.to_vec();
        assert!((t[4] - 1.0).abs() < 1e-6);
        assert!(seasonal.to_vec()[4].abs() < 1e-6);
        // zero padding pulls the edges down
        assert!((t[0] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_rank_two_input() {
        let decomp = SeriesDecomposition::new(3).unwrap();
        assert!(decomp.decompose(&crate::tensor::ones(&[4, 4])).is_err());
        assert!(SeriesDecomposition::new(0).is_err());
    }
}
