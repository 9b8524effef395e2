//! Word n-gram modelling, from counting to generation.
//!
//! - Prefix-tree n-gram storage (`NgramIndex`)
//! - Multi-order backoff scoring (`Predictor`)
//! - Temperature sampling over ranked candidates (`sampler`)
//! - Autoregressive response generation (`Generator`)
//! - The owning facade tying vocabulary and index together (`LanguageModel`)

/// Autoregressive generation loop and its stopping rules.
///
/// Feeds a sliding context window to a `Predictor`, samples one token per
/// step and reports why it stopped.
pub mod generator;

/// Top-level model: vocabulary, index and token totals.
///
/// Supports training from lines or files (optionally on worker threads),
/// prediction, generation, evaluation, and persistence.
pub mod language_model;

/// Arena-backed prefix tree of n-gram counts.
pub mod ngram_index;

/// Backoff scoring across context lengths with a unigram prior.
pub mod predictor;

/// Greedy / temperature sampling of a ranked candidate list.
pub mod sampler;

/// Validated generation parameters (temperature, top-k, seed).
pub mod settings;
