//! # Foreign Language Bindings

#[cfg(feature = "python")]
pub mod python;
