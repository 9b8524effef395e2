use std::collections::VecDeque;

use rand::Rng;

use crate::error::{ModelError, Result};
use crate::model::predictor::Predictor;
use crate::model::sampler::sample;
use crate::tokenize::{tokenize, truncate_on_char_boundary};
use crate::vocab::{TokenId, Vocabulary};

/// Number of trailing tokens used as prediction context.
pub const CONTEXT_WINDOW: usize = 7;

/// Upper bound on loop iterations, whatever `max_tokens` asks for.
pub const MAX_ITERATIONS: usize = 100;

/// A response is cut once it reaches this many tokens.
pub const HARD_TOKEN_CAP: usize = 25;

/// Output capacity in bytes.
pub const OUTPUT_CAPACITY: usize = 2048;

/// Number of candidates sampled from at each step.
const CANDIDATES: usize = 10;

/// Below this top score (after at least 3 tokens) the model is guessing.
const MIN_CONFIDENCE: f64 = 0.03;

/// Colloquial sentence-final particles that close a reply.
const CLOSING_PARTICLES: [&str; 8] = ["ya", "deh", "dong", "kok", "sih", "nih", "lho", "kan"];

/// Why a generation loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
	/// The prompt contained no tokens.
	EmptyInput,
	/// The best candidate had no score.
	NoPrediction,
	/// The sampled id had no text.
	UnresolvedToken,
	/// The last token ends with `.`, `?` or `!`.
	SentenceEnd,
	/// The last token is a closing particle.
	ClosingParticle,
	/// The top score collapsed.
	LowConfidence,
	/// `HARD_TOKEN_CAP` tokens were emitted.
	LengthCap,
	/// The same token three times, or a two-token cycle.
	Repetition,
	/// `max_tokens` (bounded by `MAX_ITERATIONS`) steps ran.
	Exhausted,
}

/// Result of one generation.
#[derive(Clone, Debug, PartialEq)]
pub struct Generation {
	/// Emitted tokens joined by single spaces.
	pub text: String,
	/// Emitted token ids.
	pub tokens: Vec<TokenId>,
	pub stop: StopReason,
}

/// Autoregressive response builder.
///
/// Drives a `Predictor` over a sliding context window, samples one token per
/// step and stops on the first triggered stopping rule.
pub struct Generator<'a> {
	predictor: Predictor<'a>,
	vocab: &'a Vocabulary,
}

impl<'a> Generator<'a> {
	pub fn new(predictor: Predictor<'a>, vocab: &'a Vocabulary) -> Self {
		Self { predictor, vocab }
	}

	/// Generates a continuation of `input`.
	///
	/// Runs at most `min(max_tokens, MAX_ITERATIONS)` steps and never emits
	/// more than `HARD_TOKEN_CAP` tokens. The random source is only used when
	/// `temperature` is above the greedy threshold.
	///
	/// # Errors
	/// Returns an error if `temperature` is NaN.
	pub fn generate<R: Rng + ?Sized>(
		&self,
		input: &str,
		max_tokens: usize,
		temperature: f64,
		rng: &mut R,
	) -> Result<Generation> {
		if temperature.is_nan() {
			return Err(ModelError::invalid("temperature is NaN"));
		}

		let prompt = tokenize(input);
		if prompt.is_empty() {
			return Ok(Generation { text: String::new(), tokens: Vec::new(), stop: StopReason::EmptyInput });
		}

		let mut context: VecDeque<TokenId> = prompt[prompt.len().saturating_sub(CONTEXT_WINDOW)..]
			.iter()
			.map(|token| self.vocab.id_or_unknown(token))
			.collect();
		let mut text = String::new();
		let mut history: Vec<TokenId> = Vec::new();
		let mut stop = StopReason::Exhausted;

		for _ in 0..max_tokens.min(MAX_ITERATIONS) {
			let predictions = self.predictor.predict(context.make_contiguous(), CANDIDATES)?;
			let top_score = predictions[0].score;
			if top_score <= 0.0 {
				stop = StopReason::NoPrediction;
				break;
			}

			let Some(token) = sample(&predictions, temperature, rng) else {
				stop = StopReason::NoPrediction;
				break;
			};
			let word = match self.vocab.token(token) {
				Some(word) if !word.is_empty() => word,
				_ => {
					stop = StopReason::UnresolvedToken;
					break;
				}
			};

			if !text.is_empty() {
				text.push(' ');
			}
			text.push_str(word);
			history.push(token);

			context.push_back(token);
			if context.len() > CONTEXT_WINDOW {
				context.pop_front();
			}

			if let Some(reason) = stop_condition(&history, word, top_score) {
				stop = reason;
				break;
			}
		}

		log::debug!("generation stopped after {} tokens: {:?}", history.len(), stop);
		let text = truncate_on_char_boundary(&text, OUTPUT_CAPACITY).to_owned();
		Ok(Generation { text, tokens: history, stop })
	}
}

/// Stopping rules, checked in priority order after each emitted token.
fn stop_condition(history: &[TokenId], last_word: &str, top_score: f64) -> Option<StopReason> {
	let emitted = history.len();

	if last_word.ends_with(['.', '?', '!']) {
		return Some(StopReason::SentenceEnd);
	}
	if emitted >= 5 && CLOSING_PARTICLES.contains(&last_word) {
		return Some(StopReason::ClosingParticle);
	}
	if top_score < MIN_CONFIDENCE && emitted >= 3 {
		return Some(StopReason::LowConfidence);
	}
	if emitted >= HARD_TOKEN_CAP {
		return Some(StopReason::LengthCap);
	}
	if is_repeating(history) {
		return Some(StopReason::Repetition);
	}
	None
}

/// Last three tokens identical, or the last four forming an `A B A B` cycle.
fn is_repeating(history: &[TokenId]) -> bool {
	match history {
		[.., a, b, c] if a == b && b == c => true,
		[.., a, b, c, d] => a == c && b == d,
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::ngram_index::NgramIndex;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	struct Fixture {
		vocab: Vocabulary,
		index: NgramIndex,
		total_tokens: u64,
	}

	impl Fixture {
		fn train(order: usize, lines: &[&str]) -> Self {
			let mut vocab = Vocabulary::new();
			let mut index = NgramIndex::new(order).unwrap();
			let mut total_tokens = 0;
			for line in lines {
				let ids: Vec<TokenId> = tokenize(line).iter().map(|t| vocab.get_or_add(t)).collect();
				total_tokens += ids.len() as u64;
				index.extract_all_orders(&ids);
			}
			Self { vocab, index, total_tokens }
		}

		fn generator(&self) -> Generator<'_> {
			Generator::new(Predictor::new(&self.index, self.total_tokens), &self.vocab)
		}
	}

	fn counting_corpus(len: usize) -> String {
		(0..len).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
	}

	#[test]
	fn repetition_patterns() {
		assert!(is_repeating(&[4, 4, 4]));
		assert!(is_repeating(&[9, 4, 5, 4, 5]));
		assert!(!is_repeating(&[4, 4]));
		assert!(!is_repeating(&[4, 5, 4]));
		assert!(!is_repeating(&[4, 5, 6, 4]));
	}

	#[test]
	fn stop_rules_in_priority_order() {
		assert_eq!(stop_condition(&[3], "done.", 0.9), Some(StopReason::SentenceEnd));
		assert_eq!(stop_condition(&[3], "why?", 0.0), Some(StopReason::SentenceEnd));
		assert_eq!(stop_condition(&[3, 4, 5, 6], "ya", 0.9), None);
		assert_eq!(stop_condition(&[3, 4, 5, 6, 7], "ya", 0.9), Some(StopReason::ClosingParticle));
		assert_eq!(stop_condition(&[3, 4], "x", 0.01), None);
		assert_eq!(stop_condition(&[3, 4, 5], "x", 0.01), Some(StopReason::LowConfidence));
		let long: Vec<TokenId> = (3..3 + HARD_TOKEN_CAP as TokenId).collect();
		assert_eq!(stop_condition(&long, "x", 0.9), Some(StopReason::LengthCap));
		assert_eq!(stop_condition(&[3, 4, 3, 4], "x", 0.9), Some(StopReason::Repetition));
	}

	#[test]
	fn empty_prompt_generates_nothing() {
		let fixture = Fixture::train(3, &["the cat sat"]);
		let mut rng = StdRng::seed_from_u64(1);
		let generation = fixture.generator().generate(" ... ", 10, 0.0, &mut rng).unwrap();
		assert_eq!(generation.text, "");
		assert_eq!(generation.stop, StopReason::EmptyInput);
	}

	#[test]
	fn nan_temperature_is_rejected() {
		let fixture = Fixture::train(3, &["the cat sat"]);
		let mut rng = StdRng::seed_from_u64(1);
		assert!(fixture.generator().generate("the", 10, f64::NAN, &mut rng).is_err());
	}

	#[test]
	fn alternating_tokens_stop_after_the_fourth() {
		let fixture = Fixture::train(2, &["a b a b a b a b"]);
		let mut rng = StdRng::seed_from_u64(1);
		let generation = fixture.generator().generate("a", 50, 0.0, &mut rng).unwrap();
		assert_eq!(generation.text, "b a b a");
		assert_eq!(generation.stop, StopReason::Repetition);
	}

	#[test]
	fn greedy_generation_is_deterministic() {
		let fixture = Fixture::train(3, &["the cat sat on the mat", "the dog sat on the rug", "a cat ran"]);
		let mut first_rng = StdRng::seed_from_u64(1);
		let mut second_rng = StdRng::seed_from_u64(2);
		let first = fixture.generator().generate("the cat", 20, 0.0, &mut first_rng).unwrap();
		let second = fixture.generator().generate("the cat", 20, 0.0, &mut second_rng).unwrap();
		assert_eq!(first, second);
		assert!(first.text.starts_with("sat on the"));
	}

	#[test]
	fn hard_cap_bounds_long_chains() {
		let fixture = Fixture::train(3, &[&counting_corpus(60)]);
		let mut rng = StdRng::seed_from_u64(1);
		let generation = fixture.generator().generate("w0", 1000, 0.0, &mut rng).unwrap();
		assert_eq!(generation.tokens.len(), HARD_TOKEN_CAP);
		assert_eq!(generation.stop, StopReason::LengthCap);
		assert!(generation.text.starts_with("w1 w2 w3"));
		assert!(generation.text.ends_with("w25"));
	}

	#[test]
	fn max_tokens_bounds_the_loop() {
		let fixture = Fixture::train(3, &[&counting_corpus(60)]);
		let mut rng = StdRng::seed_from_u64(1);
		let generation = fixture.generator().generate("w10", 3, 0.0, &mut rng).unwrap();
		assert_eq!(generation.text, "w11 w12 w13");
		assert_eq!(generation.stop, StopReason::Exhausted);

		let generation = fixture.generator().generate("w10", 0, 0.0, &mut rng).unwrap();
		assert!(generation.tokens.is_empty());
	}

	#[test]
	fn sampled_generation_stays_bounded() {
		let fixture = Fixture::train(3, &["the cat sat on the mat", "the dog sat on the rug", "a cat ran home"]);
		for seed in 0..20 {
			let mut rng = StdRng::seed_from_u64(seed);
			let generation = fixture.generator().generate("the", 100, 1.5, &mut rng).unwrap();
			assert!(generation.tokens.len() <= HARD_TOKEN_CAP);
			assert_eq!(generation.text.split(' ').filter(|w| !w.is_empty()).count(), generation.tokens.len());
		}
	}

	#[test]
	fn empty_model_stops_immediately() {
		let fixture = Fixture::train(3, &[]);
		let mut rng = StdRng::seed_from_u64(1);
		let generation = fixture.generator().generate("hello", 10, 0.7, &mut rng).unwrap();
		assert!(generation.tokens.is_empty());
		assert_eq!(generation.stop, StopReason::NoPrediction);
	}
}
