//! Word-level n-gram language model.
//!
//! This crate provides:
//! - A tokenizer and a vocabulary mapping words to dense ids
//! - A prefix-tree n-gram index counting every order up to the model order
//! - Backoff next-token prediction and temperature sampling
//! - An autoregressive response generator with stopping rules
//! - A compact little-endian file layout and a postcard snapshot cache
//!
//! Most callers only need `LanguageModel`, re-exported at the crate root.

/// Error type shared by every fallible operation.
pub mod error;

/// Word n-gram index, prediction and generation.
pub mod model;

/// Little-endian persistence (`.vocab`, `.uni`, `.bi`, `.tri`, `.ngr`).
pub mod persist;

/// Line tokenizer.
pub mod tokenize;

/// Token text / id mapping.
pub mod vocab;

/// Corpus reading, model paths and model discovery.
pub mod io;

pub use error::{ModelError, Result};
pub use model::generator::{Generation, StopReason};
pub use model::language_model::{DEFAULT_ORDER, EvalReport, LanguageModel};
pub use model::predictor::Prediction;
pub use model::settings::GenerationSettings;
pub use vocab::TokenId;
