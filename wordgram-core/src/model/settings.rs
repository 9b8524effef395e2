use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::{ModelError, Result};

/// Largest number of predictions a caller may request.
pub const MAX_TOP_K: usize = 64;

/// Input parameters for prediction and generation requests.
///
/// `GenerationSettings` gathers what a front end (CLI flags, HTTP query)
/// hands to the model, and validates it on the way in.
///
/// # Responsibilities
/// - Track generation parameters (`max_tokens`, `temperature`, `seed`)
/// - Track the number of predictions to report (`top_k`)
/// - Build the random source used for sampling
///
/// # Invariants
/// - `temperature` is finite and >= 0
/// - `top_k` is within `1..=MAX_TOP_K`
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationSettings {
	/// Upper bound on emitted tokens (the generator also applies its own caps).
	pub max_tokens: usize,

	/// Optional seed for a reproducible random source.
	pub seed: Option<u64>,

	/// Sampling temperature (<= 0.01 is greedy).
	temperature: f64,

	/// Number of predictions to report.
	top_k: usize,
}

impl Default for GenerationSettings {
	fn default() -> Self {
		Self { max_tokens: 20, seed: None, temperature: 0.7, top_k: 5 }
	}
}

impl GenerationSettings {
	/// Creates settings with the given length bound and seed, and the default
	/// temperature and top-k.
	pub fn new(max_tokens: usize, seed: Option<u64>) -> Self {
		Self { max_tokens, seed, ..Self::default() }
	}

	/// Returns the current temperature.
	pub fn temperature(&self) -> f64 {
		self.temperature
	}

	/// Returns the number of predictions to report.
	pub fn top_k(&self) -> usize {
		self.top_k
	}

	/// Sets the sampling temperature.
	///
	/// # Errors
	/// Returns an error if the value is negative or not finite.
	pub fn set_temperature(&mut self, temperature: f64) -> Result<()> {
		if !temperature.is_finite() || temperature < 0.0 {
			return Err(ModelError::invalid(format!("temperature must be a finite value >= 0, got {temperature}")));
		}
		self.temperature = temperature;
		Ok(())
	}

	/// Sets the number of predictions to report.
	///
	/// # Errors
	/// Returns an error if `top_k` is outside `1..=MAX_TOP_K`.
	pub fn set_top_k(&mut self, top_k: usize) -> Result<()> {
		if !(1..=MAX_TOP_K).contains(&top_k) {
			return Err(ModelError::invalid(format!("top-k must be between 1 and {MAX_TOP_K}, got {top_k}")));
		}
		self.top_k = top_k;
		Ok(())
	}

	/// Builds the random source for one generation.
	///
	/// Seeded settings always produce the same sequence of draws.
	pub fn rng(&self) -> StdRng {
		match self.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_rng(&mut rand::rng()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::Rng;

	#[test]
	fn defaults() {
		let settings = GenerationSettings::default();
		assert_eq!(settings.max_tokens, 20);
		assert_eq!(settings.top_k(), 5);
		assert!((settings.temperature() - 0.7).abs() < f64::EPSILON);
	}

	#[test]
	fn new_keeps_default_sampling() {
		let settings = GenerationSettings::new(7, Some(3));
		assert_eq!(settings.max_tokens, 7);
		assert_eq!(settings.seed, Some(3));
		assert_eq!(settings.top_k(), GenerationSettings::default().top_k());
		assert_eq!(settings.temperature(), GenerationSettings::default().temperature());
	}

	#[test]
	fn invalid_temperature_is_rejected() {
		let mut settings = GenerationSettings::default();
		assert!(settings.set_temperature(-0.5).is_err());
		assert!(settings.set_temperature(f64::NAN).is_err());
		assert!(settings.set_temperature(f64::INFINITY).is_err());
		settings.set_temperature(0.0).unwrap();
		assert_eq!(settings.temperature(), 0.0);
	}

	#[test]
	fn top_k_range() {
		let mut settings = GenerationSettings::default();
		assert!(settings.set_top_k(0).is_err());
		assert!(settings.set_top_k(MAX_TOP_K + 1).is_err());
		settings.set_top_k(MAX_TOP_K).unwrap();
		assert_eq!(settings.top_k(), MAX_TOP_K);
	}

	#[test]
	fn seeded_rng_is_reproducible() {
		let settings = GenerationSettings::new(20, Some(5));
		let a: u64 = settings.rng().random();
		let b: u64 = settings.rng().random();
		assert_eq!(a, b);
	}
}
