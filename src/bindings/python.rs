//! # Python Bindings (`xlstm_time`)
//!
//! Exposes the model to Python as `xlstm_time.XLSTMTime`. Arrays cross the
//! boundary as NumPy `float32` arrays and are copied on the way in and out.

use numpy::{IntoPyArray, PyArrayDyn, PyReadonlyArrayDyn};
use pyo3::exceptions::{PyIOError, PyIndexError, PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::models::{BaseModel, ModelError, XLstmTime, XLstmTimeConfig};
use crate::nn::{HiddenState, Loss, Module};
use crate::tensor::{Device, Tensor, TensorData, TensorError};
use crate::utils::{self, SerializationError};

// --- Helper to Convert Rust Errors to Python Exceptions ---

impl std::convert::From<TensorError> for PyErr {
    fn from(err: TensorError) -> PyErr {
        match err {
            TensorError::IndexOutOfBounds { .. } => PyIndexError::new_err(err.to_string()),
            TensorError::Generic(msg) => PyRuntimeError::new_err(msg),
            other => PyValueError::new_err(other.to_string()),
        }
    }
}

impl std::convert::From<ModelError> for PyErr {
    fn from(err: ModelError) -> PyErr {
        match err {
            ModelError::Tensor(inner) => inner.into(),
            ModelError::MissingInput(_) => PyKeyError::new_err(err.to_string()),
            other => PyValueError::new_err(other.to_string()),
        }
    }
}

impl std::convert::From<SerializationError> for PyErr {
    fn from(err: SerializationError) -> PyErr {
        match err {
            SerializationError::Io(inner) => PyIOError::new_err(inner.to_string()),
            SerializationError::Model(inner) => inner.into(),
            other => PyValueError::new_err(other.to_string()),
        }
    }
}

type PyArrays<'py> = Vec<Bound<'py, PyArrayDyn<TensorData>>>;

/// xLSTMTime forecasting model.
#[pyclass(name = "XLSTMTime")]
struct PyXLstmTime {
    model: XLstmTime,
}

#[pymethods]
impl PyXLstmTime {
    #[new]
    #[pyo3(signature = (
        input_size,
        hidden_size,
        output_size,
        xlstm_type = "slstm",
        num_layers = 1,
        decomposition_kernel = 25,
        input_projection_size = None,
        dropout = 0.1,
        loss = "smape",
        device = None,
        seed = None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        input_size: usize,
        hidden_size: usize,
        output_size: usize,
        xlstm_type: &str,
        num_layers: usize,
        decomposition_kernel: usize,
        input_projection_size: Option<usize>,
        dropout: f64,
        loss: &str,
        device: Option<&str>,
        seed: Option<u64>,
    ) -> PyResult<Self> {
        let loss: Loss = loss.parse().map_err(PyValueError::new_err)?;
        let device: Option<Device> = device
            .map(str::parse)
            .transpose()
            .map_err(PyValueError::new_err)?;
        let config = XLstmTimeConfig {
            input_size,
            hidden_size,
            output_size,
            xlstm_type: xlstm_type.to_string(),
            num_layers,
            decomposition_kernel,
            input_projection_size,
            dropout,
            loss,
            device,
            seed,
        };
        Ok(PyXLstmTime {
            model: XLstmTime::new(config)?,
        })
    }

    /// Returns `(prediction, hidden_states)`; pass `hidden_states` back in to
    /// continue from where this call stopped.
    #[pyo3(signature = (encoder_cont, hidden_states = None))]
    fn forward<'py>(
        &self,
        py: Python<'py>,
        encoder_cont: PyReadonlyArrayDyn<'py, TensorData>,
        hidden_states: Option<Vec<PyReadonlyArrayDyn<'py, TensorData>>>,
    ) -> PyResult<(Bound<'py, PyArrayDyn<TensorData>>, PyArrays<'py>)> {
        let input = Tensor::new(encoder_cont.as_array().to_owned());
        let hidden = hidden_states.map(|parts| {
            HiddenState::new(parts.iter().map(|p| Tensor::new(p.as_array().to_owned())).collect())
        });

        let output = py.allow_threads(|| self.model.predict(&input, hidden))?;

        let prediction = output.prediction.data_clone().into_pyarray_bound(py);
        let states = output
            .hidden_state
            .into_parts()
            .into_iter()
            .map(|t| t.data_clone().into_pyarray_bound(py))
            .collect();
        Ok((prediction, states))
    }

    fn train(&self) {
        self.model.train();
    }

    fn eval(&self) {
        self.model.eval();
    }

    /// Hyperparameters as a JSON string.
    fn hparams(&self) -> PyResult<String> {
        Ok(self.model.save_hyperparameters()?)
    }

    #[getter]
    fn xlstm_type(&self) -> &'static str {
        self.model.variant().as_str()
    }

    fn save(&self, path: &str) -> PyResult<()> {
        Ok(utils::save(&self.model, path)?)
    }

    #[staticmethod]
    #[pyo3(signature = (path, strict = true))]
    fn load(path: &str, strict: bool) -> PyResult<Self> {
        Ok(PyXLstmTime {
            model: utils::load(path, strict)?,
        })
    }

    fn __repr__(&self) -> String {
        let hp = self.model.hparams();
        format!(
            "XLSTMTime(xlstm_type='{}', hidden_size={}, output_size={}, num_layers={})",
            self.model.variant(),
            hp.hidden_size,
            hp.output_size,
            hp.num_layers
        )
    }
}

// --- Main Python Module Definition (`xlstm_time`) ---
#[pymodule]
fn xlstm_time(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyXLstmTime>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
