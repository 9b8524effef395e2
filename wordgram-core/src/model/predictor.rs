use std::collections::HashMap;

use crate::error::{ModelError, Result};
use crate::model::ngram_index::NgramIndex;
use crate::vocab::{TokenId, UNKNOWN_ID};

/// Lower bound applied to unigram probabilities before taking their log.
const PROBABILITY_FLOOR: f64 = 1e-9;

/// Tuning of the multi-order backoff.
///
/// - `decay`: geometric decay applied to context lengths shorter than the
///   longest usable one
/// - `unigram_beta`: weight of the unigram log-probability prior
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffWeights {
	pub decay: f64,
	pub unigram_beta: f64,
}

impl Default for BackoffWeights {
	fn default() -> Self {
		Self { decay: 0.85, unigram_beta: 0.10 }
	}
}

/// A ranked next-token candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
	pub token: TokenId,
	pub score: f64,
}

impl Prediction {
	/// Placeholder for a slot no candidate could fill.
	pub const NONE: Self = Self { token: UNKNOWN_ID, score: 0.0 };

	pub fn is_none(&self) -> bool {
		self.token == UNKNOWN_ID && self.score == 0.0
	}
}

/// Ranks next tokens by combining every context order the index has
/// evidence for.
///
/// The predictor borrows the index and never mutates it: a prediction is
/// pure computation and always returns the same ranking for the same
/// index and context.
pub struct Predictor<'a> {
	index: &'a NgramIndex,
	total_tokens: u64,
	weights: BackoffWeights,
}

impl<'a> Predictor<'a> {
	/// `total_tokens` is the number of training tokens (repeats included),
	/// used to turn unigram counts into probabilities.
	pub fn new(index: &'a NgramIndex, total_tokens: u64) -> Self {
		Self { index, total_tokens, weights: BackoffWeights::default() }
	}

	pub fn with_weights(mut self, weights: BackoffWeights) -> Self {
		self.weights = weights;
		self
	}

	/// Returns exactly `k` predictions, best first, for the token following
	/// `context`.
	///
	/// `UNKNOWN_ID` in the context marks a token that could not be resolved;
	/// any context suffix containing it is skipped. Slots that neither the
	/// backoff nor the unigram fallback can fill are `Prediction::NONE`.
	/// Scores sum to 1 whenever at least one of them is nonzero.
	///
	/// # Errors
	/// Returns an error if `k` is 0.
	pub fn predict(&self, context: &[TokenId], k: usize) -> Result<Vec<Prediction>> {
		if k == 0 {
			return Err(ModelError::invalid("k must be >= 1"));
		}

		let mut ranked = self.backoff(context)?;
		if !ranked.is_empty() {
			for candidate in &mut ranked {
				candidate.score += self.unigram_prior(candidate.token)?;
			}
			ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.token.cmp(&b.token)));
			ranked.truncate(k);

			// The prior never goes below `beta * ln(floor)`, so shifting by that
			// bound makes every score positive without reordering.
			let offset = self.prior_bound();
			for candidate in &mut ranked {
				candidate.score += offset;
			}
		}

		if ranked.len() < k {
			// Fill slots rank below every backoff candidate
			let scale = ranked.last().map_or(1.0, |last| last.score);
			self.fill_from_unigrams(&mut ranked, k, scale)?;
		}
		ranked.resize(k, Prediction::NONE);

		let sum: f64 = ranked.iter().map(|p| p.score).sum();
		if sum > 0.0 {
			for prediction in &mut ranked {
				prediction.score /= sum;
			}
		}
		Ok(ranked)
	}

	/// Accumulates weighted continuation frequencies over every context
	/// suffix, longest first.
	fn backoff(&self, context: &[TokenId]) -> Result<Vec<Prediction>> {
		let max_context = context.len().min(self.index.max_order() - 1);
		let mut scores: HashMap<TokenId, f64> = HashMap::new();

		for len in (1..=max_context).rev() {
			let suffix = &context[context.len() - len..];
			if suffix.contains(&UNKNOWN_ID) {
				continue;
			}
			let node = match self.index.lookup(suffix)? {
				Some(node) if node.has_children() => node,
				_ => continue,
			};
			let denominator = node.children_total();
			if denominator == 0 {
				continue;
			}

			let weight = len as f64 * self.weights.decay.powi((max_context - len) as i32);
			for (token, count) in node.children().filter(|&(_, count)| count > 0) {
				*scores.entry(token).or_insert(0.0) += weight * (f64::from(count) / denominator as f64);
			}
		}

		Ok(scores.into_iter().map(|(token, score)| Prediction { token, score }).collect())
	}

	/// `beta * ln(p)` where `p` is the unigram probability of `token`.
	fn unigram_prior(&self, token: TokenId) -> Result<f64> {
		if self.total_tokens == 0 {
			return Ok(0.0);
		}
		let count = self.index.count(&[token])?;
		let probability = if count > 0 {
			f64::from(count) / self.total_tokens as f64
		} else {
			1.0 / (self.total_tokens + 1) as f64
		};
		Ok(self.weights.unigram_beta * probability.max(PROBABILITY_FLOOR).ln())
	}

	/// Magnitude of the lowest value `unigram_prior` can return.
	fn prior_bound(&self) -> f64 {
		(-self.weights.unigram_beta * PROBABILITY_FLOOR.ln()).max(0.0)
	}

	/// Appends the most frequent unigrams not already ranked until `k`
	/// slots are filled or the unigrams run out.
	///
	/// Each fill score is the unigram probability times `scale`.
	fn fill_from_unigrams(&self, ranked: &mut Vec<Prediction>, k: usize, scale: f64) -> Result<()> {
		if self.total_tokens == 0 {
			return Ok(());
		}
		let mut unigrams: Vec<(TokenId, u32)> =
			self.index.enumerate(1)?.map(|(sequence, count)| (sequence[0], count)).collect();
		unigrams.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

		for (token, count) in unigrams {
			if ranked.len() >= k {
				break;
			}
			if ranked.iter().any(|p| p.token == token) {
				continue;
			}
			ranked.push(Prediction { token, score: scale * f64::from(count) / self.total_tokens as f64 });
		}
		Ok(())
	}
}
