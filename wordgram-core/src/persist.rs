//! Binary layout of a model.
//!
//! A model saved under a prefix `P` is made of:
//! - `P.vocab`: `u32 count`, then per token in id order `u16 len` + raw bytes
//! - `P.uni`: `u64 total_tokens`, `u32 count`, then `count × (u32 id, u32 count)`
//! - `P.bi`: `u32 count`, then `count × (u32 id, u32 id, u32 count)`
//! - `P.tri`: `u32 count`, then `count × (u32 id, u32 id, u32 id, u32 count)`
//! - `P.ngr`: `u32 blocks`, then per order above 3: `u32 order`, `u32 count`,
//!   then `count × (order × u32 id, u32 count)`
//!
//! All integers are little-endian. `P.ngr` is optional on load, so models
//! written with only the first four files still open.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{ModelError, Result};
use crate::io::prefixed_path;
use crate::model::language_model::LanguageModel;
use crate::model::ngram_index::NgramIndex;
use crate::vocab::{TokenId, Vocabulary};

pub const VOCAB_EXTENSION: &str = "vocab";
pub const UNIGRAM_EXTENSION: &str = "uni";
pub const BIGRAM_EXTENSION: &str = "bi";
pub const TRIGRAM_EXTENSION: &str = "tri";
pub const HIGHER_ORDER_EXTENSION: &str = "ngr";

/// Highest order stored in a fixed-width file of its own.
pub const FIXED_LAYOUT_ORDER: usize = 3;

/// Largest order accepted in a `.ngr` block.
pub const MAX_RECORD_ORDER: usize = 64;

/// One stored n-gram: its token ids and its count.
pub type Record = (Vec<TokenId>, u32);

fn invalid_data(message: impl Into<String>) -> io::Error {
	io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn write_u16<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
	writer.write_all(&value.to_le_bytes())
}

fn write_u32<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
	writer.write_all(&value.to_le_bytes())
}

fn write_u64<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
	writer.write_all(&value.to_le_bytes())
}

fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
	let mut bytes = [0u8; 2];
	reader.read_exact(&mut bytes)?;
	Ok(u16::from_le_bytes(bytes))
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
	let mut bytes = [0u8; 4];
	reader.read_exact(&mut bytes)?;
	Ok(u32::from_le_bytes(bytes))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
	let mut bytes = [0u8; 8];
	reader.read_exact(&mut bytes)?;
	Ok(u64::from_le_bytes(bytes))
}

fn length_prefix(len: usize, what: &str) -> io::Result<u32> {
	u32::try_from(len).map_err(|_| invalid_data(format!("too many {what}: {len}")))
}

/// Writes the vocabulary token list.
pub fn write_vocab<W: Write>(writer: &mut W, vocab: &Vocabulary) -> io::Result<()> {
	write_u32(writer, length_prefix(vocab.len(), "tokens")?)?;
	for token in vocab.tokens() {
		let len = u16::try_from(token.len())
			.map_err(|_| invalid_data(format!("token of {} bytes does not fit the layout", token.len())))?;
		write_u16(writer, len)?;
		writer.write_all(token.as_bytes())?;
	}
	Ok(())
}

/// Reads a vocabulary token list, in id order.
pub fn read_vocab<R: Read>(reader: &mut R) -> io::Result<Vec<String>> {
	let count = read_u32(reader)?;
	// A corrupt count must not trigger a huge allocation up front
	let mut tokens = Vec::with_capacity(count.min(1 << 16) as usize);
	for _ in 0..count {
		let len = read_u16(reader)?;
		let mut bytes = vec![0u8; usize::from(len)];
		reader.read_exact(&mut bytes)?;
		tokens.push(String::from_utf8(bytes).map_err(|err| invalid_data(err.to_string()))?);
	}
	Ok(tokens)
}

/// Writes `records` (all of one order) preceded by their count.
pub fn write_records<W: Write>(writer: &mut W, records: &[Record]) -> io::Result<()> {
	write_u32(writer, length_prefix(records.len(), "records")?)?;
	for (tokens, count) in records {
		for &token in tokens {
			write_u32(writer, token)?;
		}
		write_u32(writer, *count)?;
	}
	Ok(())
}

/// Reads a counted stream of records of `order` token ids each.
pub fn read_records<R: Read>(reader: &mut R, order: usize) -> io::Result<Vec<Record>> {
	let count = read_u32(reader)?;
	let mut records = Vec::with_capacity(count.min(1 << 16) as usize);
	for _ in 0..count {
		let tokens = (0..order).map(|_| read_u32(reader)).collect::<io::Result<Vec<_>>>()?;
		records.push((tokens, read_u32(reader)?));
	}
	Ok(records)
}

/// Writes one block per order: `u32 order`, then its counted records.
pub fn write_order_blocks<W: Write>(writer: &mut W, blocks: &[(usize, Vec<Record>)]) -> io::Result<()> {
	write_u32(writer, length_prefix(blocks.len(), "record blocks")?)?;
	for (order, records) in blocks {
		write_u32(writer, length_prefix(*order, "tokens per record")?)?;
		write_records(writer, records)?;
	}
	Ok(())
}

/// Reads the blocks written by `write_order_blocks`.
pub fn read_order_blocks<R: Read>(reader: &mut R) -> io::Result<Vec<(usize, Vec<Record>)>> {
	let count = read_u32(reader)?;
	let mut blocks = Vec::with_capacity(count.min(MAX_RECORD_ORDER as u32) as usize);
	for _ in 0..count {
		let order = read_u32(reader)? as usize;
		if !(FIXED_LAYOUT_ORDER + 1..=MAX_RECORD_ORDER).contains(&order) {
			return Err(invalid_data(format!(
				"record order {} outside {}..={}",
				order,
				FIXED_LAYOUT_ORDER + 1,
				MAX_RECORD_ORDER
			)));
		}
		blocks.push((order, read_records(reader, order)?));
	}
	Ok(blocks)
}

/// Collects the counted n-grams of one order, empty if the index is shallower.
fn collect_order(index: &NgramIndex, order: usize) -> Result<Vec<Record>> {
	if order > index.max_order() {
		return Ok(Vec::new());
	}
	Ok(index.enumerate(order)?.collect())
}

fn write_file<F>(path: &Path, body: F) -> Result<()>
where
	F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
	let file = File::create(path).map_err(|source| ModelError::from_io(path, source))?;
	let mut writer = BufWriter::new(file);
	body(&mut writer)
		.and_then(|()| writer.flush())
		.map_err(|source| ModelError::from_io(path, source))
}

fn read_whole_file<T, F>(path: &Path, body: F) -> Result<T>
where
	F: FnOnce(&mut BufReader<File>) -> io::Result<T>,
{
	let file = File::open(path).map_err(|source| ModelError::from_io(path, source))?;
	let mut reader = BufReader::new(file);
	body(&mut reader).map_err(|source| match source.kind() {
		io::ErrorKind::InvalidData => ModelError::Corrupt { path: path.to_owned(), reason: source.to_string() },
		_ => ModelError::from_io(path, source),
	})
}

/// Saves `model` as `<prefix>.vocab`, `.uni`, `.bi`, `.tri` and `.ngr`.
///
/// `.ngr` is always written, with no blocks for models of order 3 or less,
/// so a stale file from an earlier save never outlives the model.
///
/// # Errors
/// Fails on the first file that cannot be written, if a token or a
/// record count does not fit the layout, or if the model order is above
/// `MAX_RECORD_ORDER`.
pub fn save<P: AsRef<Path>>(model: &LanguageModel, prefix: P) -> Result<()> {
	let prefix = prefix.as_ref();
	let index = model.index();
	if index.max_order() > MAX_RECORD_ORDER {
		return Err(ModelError::invalid(format!(
			"order {} cannot be saved, the layout stops at {}",
			index.max_order(),
			MAX_RECORD_ORDER
		)));
	}

	write_file(&prefixed_path(prefix, VOCAB_EXTENSION), |writer| write_vocab(writer, model.vocab()))?;

	let unigrams = collect_order(index, 1)?;
	write_file(&prefixed_path(prefix, UNIGRAM_EXTENSION), |writer| {
		write_u64(writer, model.total_tokens())?;
		write_records(writer, &unigrams)
	})?;

	let bigrams = collect_order(index, 2)?;
	write_file(&prefixed_path(prefix, BIGRAM_EXTENSION), |writer| write_records(writer, &bigrams))?;

	let trigrams = collect_order(index, 3)?;
	write_file(&prefixed_path(prefix, TRIGRAM_EXTENSION), |writer| write_records(writer, &trigrams))?;

	let blocks = (FIXED_LAYOUT_ORDER + 1..=index.max_order())
		.map(|order| Ok((order, collect_order(index, order)?)))
		.collect::<Result<Vec<_>>>()?;
	write_file(&prefixed_path(prefix, HIGHER_ORDER_EXTENSION), |writer| write_order_blocks(writer, &blocks))?;

	log::info!(
		"saved model to {}: {} tokens, {} unigrams, {} bigrams, {} trigrams, {} higher-order n-grams",
		prefix.display(),
		model.vocab().len(),
		unigrams.len(),
		bigrams.len(),
		trigrams.len(),
		blocks.iter().map(|(_, records)| records.len()).sum::<usize>()
	);
	Ok(())
}

/// Loads a model saved under `prefix` into a fresh model of `max_order`.
///
/// Nothing is returned unless every file parsed completely, so a failed load
/// never leaves a partially filled model behind. Records with a zero count are
/// skipped; orders above `max_order` are ignored. A missing `.ngr` file means
/// the model has no n-grams above order 3.
///
/// # Errors
/// Returns an error if a file is missing, truncated, or refers to a token id
/// outside the vocabulary.
pub fn load<P: AsRef<Path>>(prefix: P, max_order: usize) -> Result<LanguageModel> {
	let prefix = prefix.as_ref();
	let mut index = NgramIndex::new(max_order)?;

	let vocab_path = prefixed_path(prefix, VOCAB_EXTENSION);
	let tokens = read_whole_file(&vocab_path, |reader| read_vocab(reader))?;
	let vocab = Vocabulary::from_tokens(tokens)
		.map_err(|err| ModelError::Corrupt { path: vocab_path.clone(), reason: err.to_string() })?;

	let unigram_path = prefixed_path(prefix, UNIGRAM_EXTENSION);
	let (total_tokens, unigrams) = read_whole_file(&unigram_path, |reader| {
		let total_tokens = read_u64(reader)?;
		Ok((total_tokens, read_records(reader, 1)?))
	})?;
	insert_records(&mut index, &vocab, &unigram_path, unigrams)?;

	for (order, extension) in [(2, BIGRAM_EXTENSION), (3, TRIGRAM_EXTENSION)] {
		let path = prefixed_path(prefix, extension);
		let records = read_whole_file(&path, |reader| read_records(reader, order))?;
		if order > max_order {
			if !records.is_empty() {
				log::warn!("ignoring {} order-{} records from {}", records.len(), order, path.display());
			}
			continue;
		}
		insert_records(&mut index, &vocab, &path, records)?;
	}

	let ngr_path = prefixed_path(prefix, HIGHER_ORDER_EXTENSION);
	if ngr_path.exists() {
		for (order, records) in read_whole_file(&ngr_path, |reader| read_order_blocks(reader))? {
			if order > max_order {
				if !records.is_empty() {
					log::warn!("ignoring {} order-{} records from {}", records.len(), order, ngr_path.display());
				}
				continue;
			}
			insert_records(&mut index, &vocab, &ngr_path, records)?;
		}
	} else {
		log::debug!("{} not found, loading orders 1 to {}", ngr_path.display(), FIXED_LAYOUT_ORDER);
	}

	log::info!(
		"loaded model from {}: {} tokens, {} n-gram observations",
		prefix.display(),
		vocab.len(),
		index.total_ngrams()
	);
	Ok(LanguageModel::from_parts(vocab, index, total_tokens))
}

fn insert_records(index: &mut NgramIndex, vocab: &Vocabulary, path: &Path, records: Vec<Record>) -> Result<()> {
	for (tokens, count) in records {
		if let Some(&token) = tokens.iter().find(|&&token| token as usize >= vocab.len()) {
			return Err(ModelError::Corrupt {
				path: path.to_owned(),
				reason: format!("token id {} outside vocabulary of {}", token, vocab.len()),
			});
		}
		if count > 0 {
			index.insert_with_count(&tokens, count)?;
		}
	}
	Ok(())
}
