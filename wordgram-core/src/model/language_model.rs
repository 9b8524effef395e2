use std::path::Path;
use std::sync::mpsc;
use std::thread;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::generator::{Generation, Generator};
use super::ngram_index::NgramIndex;
use super::predictor::{Prediction, Predictor};
use super::settings::GenerationSettings;
use crate::error::{ModelError, Result};
use crate::io::{read_file, snapshot_path};
use crate::persist;
use crate::tokenize::tokenize;
use crate::vocab::{TokenId, Vocabulary};

/// N-gram order used when none is specified.
pub const DEFAULT_ORDER: usize = 4;

/// Hit statistics of a top-k evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvalReport {
	/// Number of (context, next token) pairs evaluated.
	pub pairs: u64,
	/// Pairs whose gold token was among the top-k predictions.
	pub hits: u64,
}

impl EvalReport {
	/// Fraction of pairs that were hits, 0 when nothing was evaluated.
	pub fn hit_rate(&self) -> f64 {
		if self.pairs == 0 { 0.0 } else { self.hits as f64 / self.pairs as f64 }
	}
}

/// The top-level word n-gram language model.
///
/// This struct owns:
/// - `vocab`: the token text / id mapping
/// - `index`: the n-gram prefix tree up to the model order
/// - `total_tokens`: number of training tokens, repeats included
///
/// Training only ever grows the model. Prediction and generation borrow it
/// immutably, so a trained model can be shared by any number of readers.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LanguageModel {
	vocab: Vocabulary,
	index: NgramIndex,
	total_tokens: u64,
}

impl LanguageModel {
	/// Creates an empty model of the given order.
	///
	/// # Errors
	/// Returns an error if `max_order` is 0.
	pub fn new(max_order: usize) -> Result<Self> {
		Ok(Self::from_parts(Vocabulary::new(), NgramIndex::new(max_order)?, 0))
	}

	pub(crate) fn from_parts(vocab: Vocabulary, index: NgramIndex, total_tokens: u64) -> Self {
		Self { vocab, index, total_tokens }
	}

	/// Loads a model from the snapshot next to `corpus` if one exists,
	/// otherwise trains it from the corpus and writes the snapshot.
	///
	/// - The snapshot is `<corpus stem>.bin` in the corpus directory
	/// - Uses `postcard` for compact serialization
	/// - A snapshot is validated like the record files: an inconsistent
	///   one is reported as `Corrupt` and never replaces the corpus
	pub fn open<P: AsRef<Path>>(corpus: P, max_order: usize) -> Result<Self> {
		let corpus = corpus.as_ref();
		let snapshot_path = snapshot_path(corpus)?;

		if snapshot_path.exists() {
			let bytes = std::fs::read(&snapshot_path).map_err(|source| ModelError::from_io(&snapshot_path, source))?;
			let model: Self = postcard::from_bytes(&bytes)
				.map_err(|e| ModelError::Corrupt { path: snapshot_path.clone(), reason: e.to_string() })?;
			log::info!("loaded snapshot {} (order {})", snapshot_path.display(), model.max_order());
			return Ok(model);
		}

		let mut model = Self::new(max_order)?;
		model.train_file_parallel(corpus)?;
		let bytes = postcard::to_stdvec(&model)?;
		std::fs::write(&snapshot_path, bytes).map_err(|source| ModelError::from_io(&snapshot_path, source))?;
		log::info!("wrote snapshot {}", snapshot_path.display());
		Ok(model)
	}

	pub fn vocab(&self) -> &Vocabulary {
		&self.vocab
	}

	pub fn index(&self) -> &NgramIndex {
		&self.index
	}

	pub fn max_order(&self) -> usize {
		self.index.max_order()
	}

	pub fn vocab_size(&self) -> usize {
		self.vocab.len()
	}

	pub fn total_tokens(&self) -> u64 {
		self.total_tokens
	}

	/// Tokenizes a line, assigns ids and records its n-grams.
	pub fn train_line(&mut self, line: &str) {
		let ids = self.assign_ids(line);
		self.index.extract_all_orders(&ids);
	}

	fn assign_ids(&mut self, line: &str) -> Vec<TokenId> {
		let ids: Vec<TokenId> = tokenize(line).iter().map(|token| self.vocab.get_or_add(token)).collect();
		self.total_tokens += ids.len() as u64;
		ids
	}

	/// Trains on every line of an iterator, one sentence per line.
	pub fn train_lines<I, S>(&mut self, lines: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		for line in lines {
			self.train_line(line.as_ref());
		}
	}

	/// Trains on a text file, one sentence per line.
	pub fn train_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
		let path = path.as_ref();
		let lines = read_file(path).map_err(|source| ModelError::from_io(path, source))?;
		self.train_lines(&lines);
		log::info!(
			"trained on {} lines from {}: {} tokens, vocabulary {}",
			lines.len(),
			path.display(),
			self.total_tokens,
			self.vocab.len()
		);
		Ok(())
	}

	/// Trains on a text file, counting n-grams on worker threads.
	///
	/// # Behavior
	/// - Tokenizes and assigns ids sequentially (the vocabulary has one writer)
	/// - Splits the id sequences into chunks (based on CPU cores * factor)
	/// - Spawns threads to count each chunk into a partial index
	/// - Merges all partial indexes into this model
	///
	/// The resulting counts are identical to `train_file`.
	pub fn train_file_parallel<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
		let path = path.as_ref();
		let lines = read_file(path).map_err(|source| ModelError::from_io(path, source))?;
		let sentences: Vec<Vec<TokenId>> = lines.iter().map(|line| self.assign_ids(line)).collect();
		if sentences.is_empty() {
			return Ok(());
		}

		let cpus = num_cpus::get();
		let factor = 8;
		let chunks = cpus * factor;
		let chunk_size = sentences.len().div_ceil(chunks);
		let max_order = self.max_order();

		let (tx, rx) = mpsc::channel();
		for chunk in sentences.chunks(chunk_size) {
			let tx = tx.clone();
			let chunk: Vec<Vec<TokenId>> = chunk.to_vec();

			thread::spawn(move || {
				let partial = NgramIndex::new(max_order).map(|mut index| {
					for sentence in &chunk {
						index.extract_all_orders(sentence);
					}
					index
				});
				// The receiver outlives every sender
				let _ = tx.send(partial);
			});
		}
		drop(tx);

		for partial in rx.iter() {
			self.index.merge(&partial?)?;
		}

		log::info!(
			"trained on {} lines from {} with {} workers: {} tokens, vocabulary {}",
			lines.len(),
			path.display(),
			cpus,
			self.total_tokens,
			self.vocab.len()
		);
		Ok(())
	}

	/// Resolves the tokens of `text` to ids, `UNKNOWN_ID` for unseen ones.
	pub fn encode(&self, text: &str) -> Vec<TokenId> {
		tokenize(text).iter().map(|token| self.vocab.id_or_unknown(token)).collect()
	}

	pub fn predictor(&self) -> Predictor<'_> {
		Predictor::new(&self.index, self.total_tokens)
	}

	/// Ranks `k` next-token slots for an id context (see `Predictor::predict`).
	pub fn predict_ids(&self, context: &[TokenId], k: usize) -> Result<Vec<Prediction>> {
		self.predictor().predict(context, k)
	}

	/// Ranks the tokens most likely to follow `context`.
	///
	/// Returns at most `k` `(token, score)` pairs; empty slots are dropped.
	pub fn predict(&self, context: &str, k: usize) -> Result<Vec<(String, f64)>> {
		let predictions = self.predict_ids(&self.encode(context), k)?;
		Ok(predictions
			.into_iter()
			.filter(|prediction| !prediction.is_none())
			.filter_map(|prediction| {
				self.vocab.token(prediction.token).map(|token| (token.to_owned(), prediction.score))
			})
			.collect())
	}

	/// Generates a continuation of `prompt` with an explicit random source.
	pub fn generate<R: Rng + ?Sized>(
		&self,
		prompt: &str,
		max_tokens: usize,
		temperature: f64,
		rng: &mut R,
	) -> Result<Generation> {
		Generator::new(self.predictor(), &self.vocab).generate(prompt, max_tokens, temperature, rng)
	}

	/// Generates a continuation of `prompt` using validated settings.
	pub fn generate_with(&self, prompt: &str, settings: &GenerationSettings) -> Result<Generation> {
		let mut rng = settings.rng();
		self.generate(prompt, settings.max_tokens, settings.temperature(), &mut rng)
	}

	/// Measures the top-k hit rate on held-out lines.
	///
	/// Every token after the first of each line is predicted from the token
	/// just before it. A pair is a hit when the gold token appears among the
	/// nonzero-score top-k slots; unseen gold tokens are always misses.
	pub fn evaluate_lines<I, S>(&self, lines: I, k: usize) -> Result<EvalReport>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let predictor = self.predictor();
		let mut report = EvalReport::default();
		for line in lines {
			let tokens = tokenize(line.as_ref());
			for pair in tokens.windows(2) {
				let context = [self.vocab.id_or_unknown(&pair[0])];
				let predictions = predictor.predict(&context, k)?;
				let gold = self.vocab.id(&pair[1]);
				let hit = gold.is_some_and(|gold| {
					predictions.iter().take_while(|p| p.score > 0.0).any(|p| p.token == gold)
				});
				report.pairs += 1;
				report.hits += u64::from(hit);
			}
		}
		Ok(report)
	}

	/// Measures the top-k hit rate on a held-out corpus file.
	pub fn evaluate<P: AsRef<Path>>(&self, path: P, k: usize) -> Result<EvalReport> {
		let path = path.as_ref();
		let lines = read_file(path).map_err(|source| ModelError::from_io(path, source))?;
		let report = self.evaluate_lines(&lines, k)?;
		log::info!("evaluated {} pairs from {}: {} hits", report.pairs, path.display(), report.hits);
		Ok(report)
	}

	/// Writes the model as record files under `prefix` (see `persist`).
	pub fn save<P: AsRef<Path>>(&self, prefix: P) -> Result<()> {
		persist::save(self, prefix)
	}

	/// Reads a model saved under `prefix` into a fresh model of `max_order`.
	pub fn load<P: AsRef<Path>>(prefix: P, max_order: usize) -> Result<Self> {
		persist::load(prefix, max_order)
	}
}
