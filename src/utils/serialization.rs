//! # Model Checkpoints
//!
//! A checkpoint holds the model's hyperparameters and its named parameters
//! and buffers. `serde` describes the layout and `bincode` is the binary format.

use crate::models::{BaseModel, ModelError, XLstmTime, XLstmTimeConfig};
use crate::nn::Module;
use crate::tensor::{Tensor, TensorData, TensorError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug)]
pub enum SerializationError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization Error (Bincode): {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Tensor shape mismatch during loading: key '{key}', expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Missing key in state dict during loading: '{0}'")]
    MissingKey(String),
    #[error("Unexpected key in state dict during loading: '{0}'")]
    UnexpectedKey(String),
    #[error("Stored tensor '{key}' is corrupt: {source}")]
    CorruptTensor { key: String, source: TensorError },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Shape plus flat row-major data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct SerializableTensor {
    shape: Vec<usize>,
    data: Vec<TensorData>,
}

impl SerializableTensor {
    fn from_tensor(tensor: &Tensor) -> Self {
        SerializableTensor {
            shape: tensor.shape().to_vec(),
            data: tensor.to_vec(),
        }
    }

    fn to_tensor(&self, key: &str) -> Result<Tensor, SerializationError> {
        Tensor::from_shape_vec(&self.shape, self.data.clone()).map_err(|source| SerializationError::CorruptTensor {
            key: key.to_string(),
            source,
        })
    }
}

type StateDict = BTreeMap<String, SerializableTensor>;

#[derive(Serialize, Deserialize, Debug)]
struct Checkpoint {
    hparams: XLstmTimeConfig,
    state: StateDict,
}

/// Writes `model`'s hyperparameters, parameters and buffers to `path`.
pub fn save<P: AsRef<Path>>(model: &XLstmTime, path: P) -> Result<(), SerializationError> {
    let state: StateDict = model
        .state_dict()
        .iter()
        .map(|(key, tensor)| (key.clone(), SerializableTensor::from_tensor(tensor)))
        .collect();
    let checkpoint = Checkpoint {
        hparams: model.hparams().clone(),
        state,
    };

    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    bincode::serialize_into(&mut writer, &checkpoint)?;
    writer.flush()?;
    debug!(path = %path.as_ref().display(), tensors = checkpoint.state.len(), "saved checkpoint");
    Ok(())
}

/// Rebuilds a model from a checkpoint written by [`save`].
///
/// The projector is materialized at the stored width before tensors are
/// copied. With `strict`, every model tensor must be present in the
/// checkpoint and every checkpoint entry must be used; otherwise mismatching
/// keys are skipped with a warning.
pub fn load<P: AsRef<Path>>(path: P, strict: bool) -> Result<XLstmTime, SerializationError> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let checkpoint: Checkpoint = bincode::deserialize_from(reader)?;

    let model = XLstmTime::new(checkpoint.hparams)?;
    if let Some(weight) = checkpoint.state.get("input_linear.weight") {
        if let [_, in_features] = weight.shape[..] {
            model.materialize_projector(in_features).map_err(ModelError::from)?;
        }
    }
    load_state(&model, &checkpoint.state, strict)?;
    Ok(model)
}

/// Copies `state` into the module's tensors in place.
fn load_state(module: &dyn Module, state: &StateDict, strict: bool) -> Result<(), SerializationError> {
    let mut unused: BTreeSet<&String> = state.keys().collect();

    for (key, target) in module.tensors() {
        let Some(stored) = state.get(&key) else {
            if strict {
                return Err(SerializationError::MissingKey(key));
            }
            warn!(key = %key, "key not found in checkpoint, skipping");
            continue;
        };
        if target.shape() != stored.shape.as_slice() {
            return Err(SerializationError::ShapeMismatch {
                key,
                expected: target.shape().to_vec(),
                got: stored.shape.clone(),
            });
        }
        let loaded = stored.to_tensor(&key)?;
        target
            .assign(&loaded.data())
            .map_err(|source| SerializationError::CorruptTensor { key: key.clone(), source })?;
        unused.remove(&key);
    }

    if let Some(key) = unused.iter().next() {
        if strict {
            return Err(SerializationError::UnexpectedKey((*key).clone()));
        }
        for key in unused {
            warn!(key = %key, "checkpoint entry not used by the model");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn trained_model() -> (XLstmTime, Tensor) {
        let model = XLstmTime::new(XLstmTimeConfig::new(3, 8, 2).with_seed(4).with_decomposition_kernel(5)).unwrap();
        let mut rng = StdRng::seed_from_u64(8);
        let x = crate::tensor::rand(&[4, 12, 3], &mut rng);
        model.predict(&x, None).unwrap();
        model.eval();
        (model, x)
    }

    #[test]
    fn checkpoint_round_trip() {
        let (model, x) = trained_model();
        let expected = model.predict(&x, None).unwrap().prediction;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        save(&model, &path).unwrap();

        let restored = load(&path, true).unwrap();
        restored.eval();
        assert_eq!(restored.projector_in_features(), Some(6));
        assert_eq!(restored.hparams(), model.hparams());
        let got = restored.predict(&x, None).unwrap().prediction;
        assert!(got.all_close(&expected, 1e-6));
    }

    #[test]
    fn strict_load_rejects_unknown_keys() {
        let (model, _) = trained_model();
        let mut state: StateDict = model
            .state_dict()
            .iter()
            .map(|(k, t)| (k.clone(), SerializableTensor::from_tensor(t)))
            .collect();
        state.insert(
            "decoder.weight".to_string(),
            SerializableTensor {
                shape: vec![1],
                data: vec![0.0],
            },
        );
        let err = load_state(&model, &state, true).unwrap_err();
        assert!(matches!(err, SerializationError::UnexpectedKey(k) if k == "decoder.weight"));
        assert!(load_state(&model, &state, false).is_ok());
    }

    #[test]
    fn shape_mismatch_names_the_key() {
        let (model, _) = trained_model();
        let mut state = StateDict::new();
        state.insert(
            "output_linear.bias".to_string(),
            SerializableTensor {
                shape: vec![3],
                data: vec![0.0; 3],
            },
        );
        let err = load_state(&model, &state, false).unwrap_err();
        assert!(matches!(err, SerializationError::ShapeMismatch { ref key, .. } if key == "output_linear.bias"));
        assert!(matches!(load_state(&model, &state, true), Err(SerializationError::MissingKey(_))));
    }
}
