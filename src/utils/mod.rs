//! # Utility Functions (`utils`)
//!
//! Checkpointing and parallel multi-batch forecasting.

pub mod parallel;
pub mod serialization;

pub use parallel::forecast_batches;
pub use serialization::{load, save, SerializationError};
