use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Dense integer id assigned to a token by a `Vocabulary`.
pub type TokenId = u32;

/// Id of the unknown / out-of-vocabulary marker.
pub const UNKNOWN_ID: TokenId = 0;
/// Id of the start-of-sentence marker.
pub const START_ID: TokenId = 1;
/// Id of the end-of-sentence marker.
pub const END_ID: TokenId = 2;

const RESERVED: [&str; 3] = ["<unk>", "<s>", "</s>"];

/// Bidirectional mapping between token text and a dense id.
///
/// # Invariants
/// - Ids `0..3` are the reserved markers, in that order
/// - `id_to_token[id]` and `token_to_id[text]` always agree
/// - Ids are never reused: the vocabulary only grows
///
/// Serializes as the plain token list in id order.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct Vocabulary {
	token_to_id: HashMap<String, TokenId>,
	id_to_token: Vec<String>,
}

impl Default for Vocabulary {
	fn default() -> Self {
		Self::new()
	}
}

impl Vocabulary {
	/// Creates a vocabulary holding only the reserved markers.
	pub fn new() -> Self {
		let mut vocab = Self { token_to_id: HashMap::new(), id_to_token: Vec::new() };
		for marker in RESERVED {
			vocab.get_or_add(marker);
		}
		vocab
	}

	/// Rebuilds a vocabulary from its tokens listed in id order.
	///
	/// # Errors
	/// Returns an error if the list does not start with the reserved markers
	/// or contains the same token twice.
	pub fn from_tokens(tokens: Vec<String>) -> Result<Self> {
		if tokens.len() < RESERVED.len() || tokens.iter().zip(RESERVED).any(|(t, r)| t != r) {
			return Err(ModelError::invalid("vocabulary must start with <unk>, <s>, </s>"));
		}
		let mut token_to_id = HashMap::with_capacity(tokens.len());
		for (id, token) in tokens.iter().enumerate() {
			if token_to_id.insert(token.clone(), id as TokenId).is_some() {
				return Err(ModelError::invalid(format!("duplicate vocabulary entry {token:?}")));
			}
		}
		Ok(Self { token_to_id, id_to_token: tokens })
	}

	/// Returns the id of `token`, assigning the next free id if it is new.
	pub fn get_or_add(&mut self, token: &str) -> TokenId {
		if let Some(id) = self.token_to_id.get(token) {
			return *id;
		}
		let id = self.id_to_token.len() as TokenId;
		self.id_to_token.push(token.to_owned());
		self.token_to_id.insert(token.to_owned(), id);
		id
	}

	/// Returns the id of a known token.
	pub fn id(&self, token: &str) -> Option<TokenId> {
		self.token_to_id.get(token).copied()
	}

	/// Returns the id of `token`, or `UNKNOWN_ID` if it was never seen.
	pub fn id_or_unknown(&self, token: &str) -> TokenId {
		self.id(token).unwrap_or(UNKNOWN_ID)
	}

	/// Returns the text of `id`, if assigned.
	pub fn token(&self, id: TokenId) -> Option<&str> {
		self.id_to_token.get(id as usize).map(String::as_str)
	}

	/// Number of assigned ids, reserved markers included.
	pub fn len(&self) -> usize {
		self.id_to_token.len()
	}

	pub fn is_empty(&self) -> bool {
		self.id_to_token.is_empty()
	}

	/// Iterates tokens in id order.
	pub fn tokens(&self) -> impl Iterator<Item = &str> {
		self.id_to_token.iter().map(String::as_str)
	}
}

impl From<Vocabulary> for Vec<String> {
	fn from(vocab: Vocabulary) -> Self {
		vocab.id_to_token
	}
}

impl TryFrom<Vec<String>> for Vocabulary {
	type Error = ModelError;

	fn try_from(tokens: Vec<String>) -> Result<Self> {
		Self::from_tokens(tokens)
	}
}
