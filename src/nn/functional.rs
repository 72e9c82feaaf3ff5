//! # Neural Network Functional Interface (`nn::functional`)
//!
//! Stateless functions over `(N, C, L)` tensors used by the pooling layer and
//! the series decomposition.

use crate::tensor::{Tensor, TensorData, TensorError};
use ndarray::{Array3, ArrayView1, ArrayViewMut1, Ix3};
use rayon::prelude::*;

fn as_ncl(op: &str, input: &Tensor) -> Result<(usize, usize, usize), TensorError> {
    match *input.shape() {
        [n, c, l] => Ok((n, c, l)),
        _ => Err(TensorError::InvalidRank {
            op: op.to_string(),
            expected: 3,
            shape: input.shape().to_vec(),
        }),
    }
}

/// Applies `f` to every `(n, c)` row of an `(N, C, L)` tensor, producing rows
/// of length `out_len`. Rows are processed in parallel.
fn map_rows<F>(input: &Tensor, out_len: usize, f: F) -> Result<Tensor, TensorError>
where
    F: Fn(ArrayView1<'_, TensorData>, ArrayViewMut1<'_, TensorData>) + Sync,
{
    let (n, c, _) = as_ncl("map_rows", input)?;
    let data = input.data();
    let src = data.view().into_dimensionality::<Ix3>()?;
    let mut out = Array3::<TensorData>::zeros((n, c, out_len));
    out.outer_iter_mut()
        .into_par_iter()
        .zip(src.outer_iter().into_par_iter())
        .for_each(|(mut out_nc, src_nc)| {
            for (out_row, src_row) in out_nc.outer_iter_mut().zip(src_nc.outer_iter()) {
                f(src_row, out_row);
            }
        });
    Ok(Tensor::new(out.into_dyn()))
}

/// 1D average pooling over the last axis of an `(N, C, L)` tensor.
///
/// Zero padding of `padding` on both sides, counted in the divisor
/// (`count_include_pad`). Output length is `L + 2 * padding - kernel_size + 1`
/// for unit stride.
pub fn avg_pool1d(
    input: &Tensor,
    kernel_size: usize,
    stride: usize,
    padding: usize,
) -> Result<Tensor, TensorError> {
    let (_, _, l) = as_ncl("avg_pool1d", input)?;
    if kernel_size == 0 || stride == 0 {
        return Err(TensorError::Generic(
            "avg_pool1d: kernel_size and stride must be positive".to_string(),
        ));
    }
    let padded = l + 2 * padding;
    if padded < kernel_size {
        return Err(TensorError::Generic(format!(
            "avg_pool1d: padded length {} is shorter than kernel {}",
            padded, kernel_size
        )));
    }
    let out_len = (padded - kernel_size) / stride + 1;
    let divisor = kernel_size as TensorData;

    map_rows(input, out_len, |src, mut dst| {
        for (o, value) in dst.iter_mut().enumerate() {
            // window in padded coordinates: [o * stride, o * stride + kernel)
            let start = (o * stride) as isize - padding as isize;
            let end = start + kernel_size as isize;
            let lo = start.max(0) as usize;
            let hi = (end.min(l as isize)).max(0) as usize;
            let sum: TensorData = if lo < hi { src.slice(ndarray::s![lo..hi]).sum() } else { 0.0 };
            *value = sum / divisor;
        }
    })
}

/// Linear resampling of the last axis of an `(N, C, L)` tensor to `size`,
/// using half-pixel centers (`align_corners = false`).
pub fn interpolate_linear(input: &Tensor, size: usize) -> Result<Tensor, TensorError> {
    let (_, _, l) = as_ncl("interpolate_linear", input)?;
    if l == size {
        return Ok(input.deep_clone());
    }
    if l == 0 {
        return Err(TensorError::Generic(
            "interpolate_linear: cannot resample an empty axis".to_string(),
        ));
    }
    let scale = l as f64 / size as f64;

    map_rows(input, size, |src, mut dst| {
        for (o, value) in dst.iter_mut().enumerate() {
            let pos = ((o as f64 + 0.5) * scale - 0.5).max(0.0);
            let left = (pos.floor() as usize).min(l - 1);
            let right = (left + 1).min(l - 1);
            let weight = (pos - left as f64) as TensorData;
            *value = src[left] * (1.0 - weight) + src[right] * weight;
        }
    })
}
