//! # Tensor Module
//!
//! This module defines the core `Tensor` struct used by every layer of the
//! forecasting model, together with device placement and the tensor operations.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ndarray::{ArrayD, IxDyn};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

// --- Submodules ---
pub mod device;
pub mod ops;

// --- Re-exports ---
pub use device::Device;

// --- Error Handling ---
#[derive(thiserror::Error, Debug)]
pub enum TensorError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Incompatible shapes for operation {op}: {shape1:?} and {shape2:?}")]
    IncompatibleShapes {
        op: String,
        shape1: Vec<usize>,
        shape2: Vec<usize>,
    },
    #[error("Index out of bounds: index {index:?} for shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },
    #[error("{op} expects a tensor of rank {expected}, got shape {shape:?}")]
    InvalidRank {
        op: String,
        expected: usize,
        shape: Vec<usize>,
    },
    #[error("ndarray error: {0}")]
    NdarrayError(#[from] ndarray::ShapeError),
    #[error("Generic error: {0}")]
    Generic(String),
}

/// Element type of every tensor in the crate.
pub type TensorData = f32;

/// # Tensor
///
/// A dense, dynamically-ranked `f32` array. Cloning a `Tensor` is cheap and
/// shares the underlying storage, which lets modules keep buffers (running
/// statistics, parameters) that are updated in place from `&self`.
#[derive(Clone, Debug)]
pub struct Tensor {
    data: Arc<RwLock<ArrayD<TensorData>>>,
    // Cached; storage is never reshaped in place.
    shape: Vec<usize>,
}

impl Tensor {
    /// Creates a new Tensor from an ndarray::ArrayD.
    pub fn new(data: ArrayD<TensorData>) -> Self {
        let shape = data.shape().to_vec();
        Tensor {
            data: Arc::new(RwLock::new(data)),
            shape,
        }
    }

    /// Builds a tensor from a flat vector in row-major order.
    pub fn from_shape_vec(shape: &[usize], values: Vec<TensorData>) -> Result<Self, TensorError> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), values)?;
        Ok(Tensor::new(data))
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Read access to the underlying array.
    pub fn data(&self) -> RwLockReadGuard<'_, ArrayD<TensorData>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access to the underlying array. Callers must keep the shape.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, ArrayD<TensorData>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clones the underlying data into a new ArrayD.
    pub fn data_clone(&self) -> ArrayD<TensorData> {
        self.data().clone()
    }

    /// Copies the values of `other` into this tensor's storage.
    pub fn assign(&self, other: &ArrayD<TensorData>) -> Result<(), TensorError> {
        if other.shape() != self.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape().to_vec(),
            });
        }
        self.data_mut().assign(other);
        Ok(())
    }

    /// Returns a tensor with its own copy of the data.
    pub fn deep_clone(&self) -> Self {
        Tensor::new(self.data_clone())
    }

    /// Flattened values in logical (row-major) order.
    pub fn to_vec(&self) -> Vec<TensorData> {
        self.data().iter().copied().collect()
    }

    /// Element-wise comparison within an absolute tolerance.
    pub fn all_close(&self, other: &Tensor, tolerance: TensorData) -> bool {
        if self.shape() != other.shape() {
            return false;
        }
        let a = self.data();
        let b = other.data();
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tolerance)
    }
}

// --- Helper functions ---

/// Helper to create a tensor filled with zeros.
pub fn zeros(shape: &[usize]) -> Tensor {
    Tensor::new(ArrayD::zeros(IxDyn(shape)))
}

/// Helper to create a tensor filled with ones.
pub fn ones(shape: &[usize]) -> Tensor {
    Tensor::new(ArrayD::ones(IxDyn(shape)))
}

/// Tensor with values drawn uniformly from `[low, high)`.
pub fn uniform<R: Rng + ?Sized>(shape: &[usize], low: TensorData, high: TensorData, rng: &mut R) -> Tensor {
    let range = Uniform::new(low, high);
    let data = ArrayD::from_shape_simple_fn(IxDyn(shape), || range.sample(rng));
    Tensor::new(data)
}

/// Tensor with values drawn uniformly from `[0, 1)`.
pub fn rand<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Tensor {
    uniform(shape, 0.0, 1.0, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn clones_share_storage() {
        let a = zeros(&[2, 2]);
        let b = a.clone();
        b.data_mut().fill(3.0);
        assert_eq!(a.to_vec(), vec![3.0; 4]);

        let c = a.deep_clone();
        c.data_mut().fill(1.0);
        assert_eq!(a.to_vec(), vec![3.0; 4]);
    }

    #[test]
    fn assign_rejects_other_shapes() {
        let a = zeros(&[2, 3]);
        let err = a.assign(&ArrayD::ones(IxDyn(&[3, 2]))).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }

    #[test]
    fn seeded_uniform_is_reproducible() {
        let a = uniform(&[4, 5], -0.5, 0.5, &mut StdRng::seed_from_u64(7));
        let b = uniform(&[4, 5], -0.5, 0.5, &mut StdRng::seed_from_u64(7));
        assert!(a.all_close(&b, 0.0));
        assert!(a.to_vec().iter().all(|v| (-0.5..0.5).contains(v)));
    }

    #[test]
    fn from_shape_vec_checks_length() {
        assert!(Tensor::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0]).is_err());
        let t = Tensor::from_shape_vec(&[1, 3], vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(t.shape(), &[1, 3]);
        assert_eq!(t.ndim(), 2);
        assert_eq!(t.size(), 3);
    }
}
