//! # Parallel Forecasting
//!
//! Runs independent batches against one shared model on the rayon thread pool.

use crate::models::{BaseModel, Batch, ModelError, NetworkOutput};
use rayon::prelude::*;

/// Forecasts every batch from a fresh hidden state, in parallel.
///
/// Results come back in input order. A model whose projector is not built yet
/// builds it exactly once, whichever batch reaches it first.
pub fn forecast_batches<M>(model: &M, batches: &[Batch]) -> Vec<Result<NetworkOutput, ModelError>>
where
    M: BaseModel + Sync,
{
    batches.par_iter().map(|batch| model.forward(batch, None)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::xlstm_time::ENCODER_CONT;
    use crate::models::{XLstmTime, XLstmTimeConfig};
    use crate::nn::Module;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn parallel_matches_sequential() {
        let model = XLstmTime::new(XLstmTimeConfig::new(2, 8, 3).with_seed(10).with_decomposition_kernel(3)).unwrap();
        model.eval();
        let mut rng = StdRng::seed_from_u64(0);
        let batches: Vec<Batch> = (0..6)
            .map(|_| Batch::from([(ENCODER_CONT.to_string(), crate::tensor::rand(&[3, 9, 2], &mut rng))]))
            .collect();

        let parallel = forecast_batches(&model, &batches);
        assert_eq!(parallel.len(), 6);
        assert_eq!(model.projector_in_features(), Some(4));
        for (batch, result) in batches.iter().zip(parallel) {
            let got = result.unwrap().prediction;
            let expected = BaseModel::forward(&model, batch, None).unwrap().prediction;
            assert_eq!(got.shape(), &[3, 3]);
            assert!(got.all_close(&expected, 1e-6));
        }
    }
}
