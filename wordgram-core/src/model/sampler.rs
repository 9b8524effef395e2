use rand::Rng;

use crate::model::predictor::Prediction;
use crate::vocab::TokenId;

/// Temperatures at or below this value always pick the top candidate.
pub const GREEDY_TEMPERATURE: f64 = 0.01;

const EPSILON: f64 = 1e-9;

/// Picks one token from a ranked candidate list.
///
/// - `temperature <= GREEDY_TEMPERATURE`: the top-ranked token
/// - otherwise each nonzero probability `p` becomes `p^(1/T)`, the weights are
///   renormalized and one token is drawn by inverse cumulative sampling
///
/// Falls back to the top-ranked token when the draw cannot be resolved
/// (rounding, or no positive weight). Returns `None` only for an empty list.
pub fn sample<R: Rng + ?Sized>(predictions: &[Prediction], temperature: f64, rng: &mut R) -> Option<TokenId> {
	let top = predictions.first()?.token;
	if temperature <= GREEDY_TEMPERATURE {
		return Some(top);
	}

	let weights: Vec<(TokenId, f64)> = predictions
		.iter()
		.filter(|p| p.score > 0.0)
		.map(|p| (p.token, ((p.score + EPSILON).ln() / temperature).exp()))
		.collect();
	let total: f64 = weights.iter().map(|(_, weight)| weight).sum();
	if !(total > 0.0 && total.is_finite()) {
		return Some(top);
	}

	let draw: f64 = rng.random();
	let mut cumulative = 0.0;
	for (token, weight) in weights {
		cumulative += weight / total;
		if draw < cumulative {
			return Some(token);
		}
	}

	Some(top)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn ranked(scores: &[(TokenId, f64)]) -> Vec<Prediction> {
		scores.iter().map(|&(token, score)| Prediction { token, score }).collect()
	}

	#[test]
	fn empty_list_yields_nothing() {
		let mut rng = StdRng::seed_from_u64(7);
		assert_eq!(sample(&[], 1.0, &mut rng), None);
	}

	#[test]
	fn low_temperature_is_greedy() {
		let mut rng = StdRng::seed_from_u64(7);
		let predictions = ranked(&[(4, 0.4), (5, 0.35), (6, 0.25)]);
		for _ in 0..50 {
			assert_eq!(sample(&predictions, 0.0, &mut rng), Some(4));
			assert_eq!(sample(&predictions, GREEDY_TEMPERATURE, &mut rng), Some(4));
		}
	}

	#[test]
	fn zero_score_candidates_are_never_drawn() {
		let mut rng = StdRng::seed_from_u64(11);
		let predictions = ranked(&[(4, 0.5), (5, 0.5), (0, 0.0), (0, 0.0)]);
		for _ in 0..200 {
			let token = sample(&predictions, 1.0, &mut rng).unwrap();
			assert!(token == 4 || token == 5);
		}
	}

	#[test]
	fn temperature_one_follows_the_distribution() {
		let mut rng = StdRng::seed_from_u64(42);
		let predictions = ranked(&[(4, 0.8), (5, 0.2)]);
		let draws = 5000;
		let hits = (0..draws).filter(|_| sample(&predictions, 1.0, &mut rng) == Some(4)).count();
		let ratio = hits as f64 / draws as f64;
		assert!((0.75..0.85).contains(&ratio), "ratio {ratio}");
	}

	#[test]
	fn high_temperature_flattens() {
		let mut rng = StdRng::seed_from_u64(3);
		let predictions = ranked(&[(4, 0.9), (5, 0.1)]);
		let draws = 5000;
		let hits = (0..draws).filter(|_| sample(&predictions, 10.0, &mut rng) == Some(5)).count();
		// 0.1^0.1 / (0.9^0.1 + 0.1^0.1) is about 0.445
		let ratio = hits as f64 / draws as f64;
		assert!((0.40..0.49).contains(&ratio), "ratio {ratio}");
	}

	#[test]
	fn same_seed_same_choice() {
		let predictions = ranked(&[(4, 0.3), (5, 0.3), (6, 0.4)]);
		let mut a = StdRng::seed_from_u64(99);
		let mut b = StdRng::seed_from_u64(99);
		for _ in 0..20 {
			assert_eq!(sample(&predictions, 0.7, &mut a), sample(&predictions, 0.7, &mut b));
		}
	}
}
