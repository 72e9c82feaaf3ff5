//! # Tensor Operations
//!
//! Shape-checked operations on Tensors. Every operation validates its inputs
//! up front and reports a `TensorError` instead of letting ndarray panic.

use super::{Tensor, TensorData, TensorError};
use ndarray::{Array2, ArrayD, ArrayView, Axis, Ix2, IxDyn, Slice};

// --- Broadcasting ---

/// Checks if tensor shapes can be broadcast together following NumPy broadcasting rules
pub fn can_broadcast(shape1: &[usize], shape2: &[usize]) -> bool {
    // Iterate from the right (least significant dimensions)
    shape1
        .iter()
        .rev()
        .zip(shape2.iter().rev())
        .all(|(&s1, &s2)| s1 == s2 || s1 == 1 || s2 == 1)
}

/// Determines the output shape after broadcasting two tensors
pub fn broadcast_shapes(shape1: &[usize], shape2: &[usize]) -> Result<Vec<usize>, TensorError> {
    if !can_broadcast(shape1, shape2) {
        return Err(TensorError::IncompatibleShapes {
            op: "broadcast".to_string(),
            shape1: shape1.to_vec(),
            shape2: shape2.to_vec(),
        });
    }

    let max_dims = std::cmp::max(shape1.len(), shape2.len());
    let padded_shape1 = pad_shape_left(shape1, max_dims);
    let padded_shape2 = pad_shape_left(shape2, max_dims);

    Ok(padded_shape1
        .iter()
        .zip(padded_shape2.iter())
        .map(|(&s1, &s2)| if s1 == 1 { s2 } else { s1 })
        .collect())
}

/// Pads a shape with 1s on the left to match the target length
fn pad_shape_left(shape: &[usize], target_len: usize) -> Vec<usize> {
    if shape.len() >= target_len {
        return shape.to_vec();
    }
    let mut padded = vec![1; target_len - shape.len()];
    padded.extend_from_slice(shape);
    padded
}

fn broadcast_binary<F>(op: &str, a: &Tensor, b: &Tensor, f: F) -> Result<Tensor, TensorError>
where
    F: Fn(&ArrayD<TensorData>, &ArrayD<TensorData>) -> ArrayD<TensorData>,
{
    if !can_broadcast(a.shape(), b.shape()) {
        return Err(TensorError::IncompatibleShapes {
            op: op.to_string(),
            shape1: a.shape().to_vec(),
            shape2: b.shape().to_vec(),
        });
    }
    let a_data = a.data();
    let b_data = b.data();
    Ok(Tensor::new(f(&a_data, &b_data)))
}

// --- Arithmetic Operations ---

/// Element-wise addition with broadcasting.
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    broadcast_binary("add", a, b, |x, y| x + y)
}

/// Element-wise subtraction (a - b) with broadcasting.
pub fn sub(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    broadcast_binary("sub", a, b, |x, y| x - y)
}

/// Element-wise multiplication with broadcasting.
pub fn mul(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    broadcast_binary("mul", a, b, |x, y| x * y)
}

/// Element-wise division (a / b) with broadcasting.
pub fn div(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    broadcast_binary("div", a, b, |x, y| x / y)
}

pub fn mul_scalar(a: &Tensor, scalar: TensorData) -> Tensor {
    Tensor::new(a.data().mapv(|v| v * scalar))
}

// --- Matrix Operations ---

/// Contracts the last axis of `a` with the first axis of the matrix `b`:
/// `(..., k) @ (k, n) -> (..., n)`.
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    if b.ndim() != 2 {
        return Err(TensorError::InvalidRank {
            op: "matmul (rhs)".to_string(),
            expected: 2,
            shape: b.shape().to_vec(),
        });
    }
    if a.ndim() == 0 {
        return Err(TensorError::InvalidRank {
            op: "matmul (lhs)".to_string(),
            expected: 1,
            shape: a.shape().to_vec(),
        });
    }
    let k = a.shape()[a.ndim() - 1];
    if k != b.shape()[0] {
        return Err(TensorError::IncompatibleShapes {
            op: "matmul".to_string(),
            shape1: a.shape().to_vec(),
            shape2: b.shape().to_vec(),
        });
    }
    let lead = &a.shape()[..a.ndim() - 1];
    let rows: usize = lead.iter().product();

    let lhs = Array2::from_shape_vec((rows, k), a.to_vec())?;
    let b_data = b.data();
    let rhs = b_data.view().into_dimensionality::<Ix2>()?;
    let product = lhs.dot(&rhs);

    let mut out_shape = lead.to_vec();
    out_shape.push(b.shape()[1]);
    let result = product.into_shape(IxDyn(&out_shape))?;
    Ok(Tensor::new(result))
}

// --- Activation Functions ---

pub fn sigmoid(a: &Tensor) -> Tensor {
    Tensor::new(a.data().mapv(|v| 1.0 / (1.0 + (-v).exp())))
}

pub fn tanh(a: &Tensor) -> Tensor {
    Tensor::new(a.data().mapv(|v| v.tanh()))
}

pub fn exp(a: &Tensor) -> Tensor {
    Tensor::new(a.data().mapv(|v| v.exp()))
}

pub fn clamp(a: &Tensor, min: TensorData, max: TensorData) -> Tensor {
    Tensor::new(a.data().mapv(|v| v.clamp(min, max)))
}

// --- Reductions ---

/// Sums over `axis`, optionally keeping it as length 1.
pub fn sum_axis(a: &Tensor, axis: usize, keep_dim: bool) -> Result<Tensor, TensorError> {
    check_axis(a, axis, a.ndim())?;
    let summed = a.data().sum_axis(Axis(axis));
    Ok(Tensor::new(if keep_dim { summed.insert_axis(Axis(axis)) } else { summed }))
}

// --- Shape Manipulation ---

fn check_axis(a: &Tensor, axis: usize, limit: usize) -> Result<(), TensorError> {
    if axis >= limit {
        return Err(TensorError::IndexOutOfBounds {
            index: vec![axis],
            shape: a.shape().to_vec(),
        });
    }
    Ok(())
}

/// Reshapes a tensor to the target shape (copy).
pub fn reshape(a: &Tensor, new_shape: &[usize]) -> Result<Tensor, TensorError> {
    let new_size: usize = new_shape.iter().product();
    if a.size() != new_size {
        return Err(TensorError::ShapeMismatch {
            expected: vec![a.size()],
            got: vec![new_size],
        });
    }
    Tensor::from_shape_vec(new_shape, a.to_vec())
}

/// Swaps two axes. The result is materialized in standard layout.
pub fn transpose(a: &Tensor, dim0: usize, dim1: usize) -> Result<Tensor, TensorError> {
    check_axis(a, dim0.max(dim1), a.ndim())?;
    let data = a.data();
    let mut axes: Vec<usize> = (0..data.ndim()).collect();
    axes.swap(dim0, dim1);
    let permuted = data.view().permuted_axes(IxDyn(&axes));
    Ok(Tensor::new(permuted.as_standard_layout().into_owned()))
}

/// Concatenates tensors along an existing axis.
pub fn cat(tensors: &[Tensor], axis: usize) -> Result<Tensor, TensorError> {
    let first = tensors
        .first()
        .ok_or_else(|| TensorError::Generic("cat needs at least one tensor".to_string()))?;
    check_axis(first, axis, first.ndim())?;
    for t in &tensors[1..] {
        let compatible = t.ndim() == first.ndim()
            && t
                .shape()
                .iter()
                .zip(first.shape())
                .enumerate()
                .all(|(i, (s, f))| i == axis || s == f);
        if !compatible {
            return Err(TensorError::IncompatibleShapes {
                op: "cat".to_string(),
                shape1: first.shape().to_vec(),
                shape2: t.shape().to_vec(),
            });
        }
    }
    let guards: Vec<_> = tensors.iter().map(|t| t.data()).collect();
    let views: Vec<ArrayView<'_, TensorData, IxDyn>> = guards.iter().map(|g| g.view()).collect();
    let result = ndarray::concatenate(Axis(axis), &views)?;
    Ok(Tensor::new(result))
}

/// Stacks equally-shaped tensors along a new axis.
pub fn stack(tensors: &[Tensor], axis: usize) -> Result<Tensor, TensorError> {
    let first = tensors
        .first()
        .ok_or_else(|| TensorError::Generic("stack needs at least one tensor".to_string()))?;
    check_axis(first, axis, first.ndim() + 1)?;
    if let Some(t) = tensors.iter().find(|t| t.shape() != first.shape()) {
        return Err(TensorError::IncompatibleShapes {
            op: "stack".to_string(),
            shape1: first.shape().to_vec(),
            shape2: t.shape().to_vec(),
        });
    }
    let guards: Vec<_> = tensors.iter().map(|t| t.data()).collect();
    let views: Vec<ArrayView<'_, TensorData, IxDyn>> = guards.iter().map(|g| g.view()).collect();
    let result = ndarray::stack(Axis(axis), &views)?;
    Ok(Tensor::new(result))
}

/// Inserts a length-1 axis at `axis`.
pub fn unsqueeze(a: &Tensor, axis: usize) -> Result<Tensor, TensorError> {
    check_axis(a, axis, a.ndim() + 1)?;
    Ok(Tensor::new(a.data_clone().insert_axis(Axis(axis))))
}

/// Picks `index` along `axis`, dropping that axis.
pub fn select(a: &Tensor, axis: usize, index: usize) -> Result<Tensor, TensorError> {
    check_axis(a, axis, a.ndim())?;
    if index >= a.shape()[axis] {
        return Err(TensorError::IndexOutOfBounds {
            index: vec![index],
            shape: a.shape().to_vec(),
        });
    }
    let data = a.data();
    Ok(Tensor::new(data.index_axis(Axis(axis), index).to_owned()))
}

/// Keeps `len` entries along `axis` starting at `start`. Like slice syntax,
/// a range running past the end is clamped.
pub fn narrow(a: &Tensor, axis: usize, start: usize, len: usize) -> Result<Tensor, TensorError> {
    check_axis(a, axis, a.ndim())?;
    let dim = a.shape()[axis];
    let start = start.min(dim);
    let end = start.saturating_add(len).min(dim);
    let data = a.data();
    let sliced = data.slice_axis(Axis(axis), Slice::from(start..end));
    Ok(Tensor::new(sliced.to_owned()))
}

/// Splits `axis` into `chunks` equal pieces.
pub fn chunk(a: &Tensor, chunks: usize, axis: usize) -> Result<Vec<Tensor>, TensorError> {
    check_axis(a, axis, a.ndim())?;
    let dim = a.shape()[axis];
    if chunks == 0 || dim % chunks != 0 {
        return Err(TensorError::Generic(format!(
            "cannot split axis {} of length {} into {} equal chunks",
            axis, dim, chunks
        )));
    }
    let step = dim / chunks;
    (0..chunks).map(|i| narrow(a, axis, i * step, step)).collect()
}
