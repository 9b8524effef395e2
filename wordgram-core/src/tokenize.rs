/// Maximum number of tokens kept from a single line.
pub const MAX_TOKENS_PER_LINE: usize = 128;

/// Maximum byte length of a single token.
pub const MAX_TOKEN_BYTES: usize = 31;

/// Splits a line into normalized word tokens.
///
/// - Whitespace and ASCII punctuation separate words and are dropped
/// - Words are lowercased (Unicode aware)
/// - Each word is cut to `MAX_TOKEN_BYTES` on a char boundary
/// - At most `MAX_TOKENS_PER_LINE` tokens are returned
///
/// The same rule is used for training and for queries, so ids resolved
/// from a query always match the ones assigned while training.
pub fn tokenize(line: &str) -> Vec<String> {
	line.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
		.filter(|word| !word.is_empty())
		.map(normalize_word)
		.filter(|word| !word.is_empty())
		.take(MAX_TOKENS_PER_LINE)
		.collect()
}

fn normalize_word(word: &str) -> String {
	let lower: String = word.chars().flat_map(char::to_lowercase).collect();
	truncate_on_char_boundary(&lower, MAX_TOKEN_BYTES).to_owned()
}

/// Returns the longest prefix of `s` that fits in `max_bytes`
/// without splitting a multibyte character.
pub(crate) fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
	if s.len() <= max_bytes {
		return s;
	}
	let mut end = max_bytes;
	while !s.is_char_boundary(end) {
		end -= 1;
	}
	&s[..end]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn splits_on_whitespace_and_punctuation() {
		assert_eq!(tokenize("The cat, sat...on  the MAT!"), vec!["the", "cat", "sat", "on", "the", "mat"]);
	}

	#[test]
	fn empty_and_punctuation_only_lines_yield_nothing() {
		assert!(tokenize("").is_empty());
		assert!(tokenize("  ,.;!? ").is_empty());
	}

	#[test]
	fn long_words_are_cut_on_char_boundary() {
		let word = "é".repeat(20); // 40 bytes
		let tokens = tokenize(&word);
		assert_eq!(tokens.len(), 1);
		assert!(tokens[0].len() <= MAX_TOKEN_BYTES);
		assert_eq!(tokens[0], "é".repeat(15));
	}

	#[test]
	fn line_is_capped() {
		let line = "a ".repeat(MAX_TOKENS_PER_LINE + 10);
		assert_eq!(tokenize(&line).len(), MAX_TOKENS_PER_LINE);
	}
}
