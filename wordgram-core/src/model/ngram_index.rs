use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::vocab::TokenId;

/// Index of the root node in the arena.
const ROOT: usize = 0;

/// A node of the prefix tree.
///
/// The node at depth `d` stands for the sequence of `d` token ids read on the
/// path from the root. Children are keyed by the next token id; the ordered
/// map keeps every traversal in ascending token order.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct Node {
	token: TokenId,
	count: u32,
	children: BTreeMap<TokenId, usize>,
}

impl Node {
	fn new(token: TokenId) -> Self {
		Self { token, count: 0, children: BTreeMap::new() }
	}
}

/// Prefix tree of token-id sequences up to `max_order`, with their counts.
///
/// # Responsibilities
/// - Ingest every sub-sequence of a training sentence (`extract_all_orders`)
/// - Answer prefix lookups and exact counts
/// - Enumerate the n-grams of a given order for persistence and ranking
///
/// # Invariants
/// - Nodes live in a single arena; `nodes[0]` is the root
/// - Every prefix of a stored sequence is itself a reachable node
/// - `total_ngrams` is the sum of all node counts at depth >= 1
///
/// A deserialized index is checked against these invariants before use.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(try_from = "UncheckedIndex")]
pub struct NgramIndex {
	max_order: usize,
	nodes: Vec<Node>,
	total_ngrams: u64,
}

/// Field-for-field twin of `NgramIndex` as it comes off the wire.
#[derive(Deserialize)]
struct UncheckedIndex {
	max_order: usize,
	nodes: Vec<Node>,
	total_ngrams: u64,
}

impl TryFrom<UncheckedIndex> for NgramIndex {
	type Error = ModelError;

	/// Walks the arena from the root: every child index must be in range,
	/// reached exactly once, keyed by its own token and no deeper than
	/// `max_order`. Orphan nodes and a mismatched total are rejected too.
	fn try_from(raw: UncheckedIndex) -> Result<Self> {
		let UncheckedIndex { max_order, nodes, total_ngrams } = raw;
		if max_order == 0 {
			return Err(ModelError::invalid("n-gram index with max order 0"));
		}
		if nodes.is_empty() {
			return Err(ModelError::invalid("n-gram index without a root node"));
		}

		let mut depth: Vec<Option<usize>> = vec![None; nodes.len()];
		depth[ROOT] = Some(0);
		let mut pending = vec![(ROOT, 0)];
		let mut counted = 0u64;
		while let Some((parent, parent_depth)) = pending.pop() {
			for (&token, &child) in &nodes[parent].children {
				if child >= nodes.len() || depth[child].is_some() {
					return Err(ModelError::invalid(format!("node {parent} links to invalid child {child}")));
				}
				if nodes[child].token != token {
					return Err(ModelError::invalid(format!("node {child} is keyed by token {token}")));
				}
				if parent_depth + 1 > max_order {
					return Err(ModelError::invalid(format!("node {child} is deeper than max order {max_order}")));
				}
				depth[child] = Some(parent_depth + 1);
				counted += u64::from(nodes[child].count);
				pending.push((child, parent_depth + 1));
			}
		}

		if let Some(orphan) = depth.iter().position(Option::is_none) {
			return Err(ModelError::invalid(format!("node {orphan} is unreachable")));
		}
		if counted != total_ngrams {
			return Err(ModelError::invalid(format!("total {total_ngrams} does not match node counts {counted}")));
		}
		Ok(Self { max_order, nodes, total_ngrams })
	}
}

impl NgramIndex {
	/// Creates an empty index storing sequences of length `1..=max_order`.
	///
	/// # Errors
	/// Returns an error if `max_order` is 0.
	pub fn new(max_order: usize) -> Result<Self> {
		if max_order == 0 {
			return Err(ModelError::invalid("max order must be >= 1"));
		}
		Ok(Self { max_order, nodes: vec![Node::new(TokenId::MAX)], total_ngrams: 0 })
	}

	pub fn max_order(&self) -> usize {
		self.max_order
	}

	/// Sum of all n-gram counts, every order included.
	pub fn total_ngrams(&self) -> u64 {
		self.total_ngrams
	}

	/// Number of distinct stored sequences (root excluded).
	pub fn node_count(&self) -> usize {
		self.nodes.len() - 1
	}

	fn check_order(&self, sequence: &[TokenId]) -> Result<()> {
		if sequence.is_empty() {
			return Err(ModelError::invalid("empty token sequence"));
		}
		if sequence.len() > self.max_order {
			return Err(ModelError::invalid(format!(
				"sequence of length {} exceeds max order {}",
				sequence.len(),
				self.max_order
			)));
		}
		Ok(())
	}

	/// Records one observation of `sequence`.
	pub fn insert(&mut self, sequence: &[TokenId]) -> Result<()> {
		self.insert_with_count(sequence, 1)
	}

	/// Records `count` observations of `sequence`, creating missing prefix
	/// nodes on the way down.
	///
	/// # Errors
	/// Returns an error if the sequence is empty, longer than `max_order`,
	/// or if `count` is 0.
	pub fn insert_with_count(&mut self, sequence: &[TokenId], count: u32) -> Result<()> {
		self.check_order(sequence)?;
		if count == 0 {
			return Err(ModelError::invalid("count must be >= 1"));
		}

		let current = sequence.iter().fold(ROOT, |node, &token| self.child_or_insert(node, token));

		self.bump(current, count);
		Ok(())
	}

	/// Inserts every contiguous sub-sequence of `tokens` of length
	/// `1..=max_order`, at every starting position.
	pub fn extract_all_orders(&mut self, tokens: &[TokenId]) {
		for start in 0..tokens.len() {
			let longest = self.max_order.min(tokens.len() - start);
			// Walk once per start position: each order extends the previous node.
			let mut current = ROOT;
			for &token in &tokens[start..start + longest] {
				current = self.child_or_insert(current, token);
				self.bump(current, 1);
			}
		}
	}

	/// Adds `count` to a node; the total only grows by what the node kept.
	fn bump(&mut self, node: usize, count: u32) {
		let node = &mut self.nodes[node];
		let before = node.count;
		node.count = before.saturating_add(count);
		self.total_ngrams += u64::from(node.count - before);
	}

	fn child_or_insert(&mut self, parent: usize, token: TokenId) -> usize {
		if let Some(&child) = self.nodes[parent].children.get(&token) {
			return child;
		}
		let child = self.nodes.len();
		self.nodes.push(Node::new(token));
		self.nodes[parent].children.insert(token, child);
		child
	}

	fn find(&self, prefix: &[TokenId]) -> Option<usize> {
		prefix.iter().try_fold(ROOT, |node, token| self.nodes[node].children.get(token).copied())
	}

	/// Returns the node reached by walking `prefix` from the root.
	///
	/// `Ok(None)` means the prefix was never observed.
	pub fn lookup(&self, prefix: &[TokenId]) -> Result<Option<NodeRef<'_>>> {
		self.check_order(prefix)?;
		Ok(self.find(prefix).map(|node| NodeRef { index: self, node }))
	}

	/// Number of observations of `sequence`, 0 if it was never seen.
	pub fn count(&self, sequence: &[TokenId]) -> Result<u32> {
		Ok(self.lookup(sequence)?.map_or(0, |node| node.count()))
	}

	/// Returns a cursor over every counted n-gram of the given order,
	/// in ascending lexicographic token order.
	///
	/// Each call returns a fresh cursor. A cloned cursor continues from the
	/// same position independently of the cursor it was cloned from.
	pub fn enumerate(&self, order: usize) -> Result<Ngrams<'_>> {
		if order == 0 || order > self.max_order {
			return Err(ModelError::invalid(format!("order {} outside 1..={}", order, self.max_order)));
		}
		Ok(Ngrams {
			index: self,
			order,
			stack: vec![self.nodes[ROOT].children.iter()],
			path: Vec::with_capacity(order),
		})
	}

	/// Adds every counted n-gram of `other` into this index.
	///
	/// # Errors
	/// Returns an error if the two indexes have different orders.
	pub fn merge(&mut self, other: &Self) -> Result<()> {
		if self.max_order != other.max_order {
			return Err(ModelError::invalid(format!(
				"max order mismatch: {} vs {}",
				self.max_order, other.max_order
			)));
		}
		for order in 1..=other.max_order {
			for (sequence, count) in other.enumerate(order)? {
				self.insert_with_count(&sequence, count)?;
			}
		}
		Ok(())
	}
}

/// Read-only view of a node of an `NgramIndex`.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
	index: &'a NgramIndex,
	node: usize,
}

impl<'a> NodeRef<'a> {
	fn node(&self) -> &'a Node {
		&self.index.nodes[self.node]
	}

	pub fn token(&self) -> TokenId {
		self.node().token
	}

	pub fn count(&self) -> u32 {
		self.node().count
	}

	pub fn has_children(&self) -> bool {
		!self.node().children.is_empty()
	}

	/// Iterates `(next_token, count)` for every observed continuation.
	pub fn children(&self) -> impl Iterator<Item = (TokenId, u32)> + 'a {
		let nodes = &self.index.nodes;
		self.node().children.iter().map(move |(&token, &child)| (token, nodes[child].count))
	}

	/// Total observations of anything following this prefix.
	pub fn children_total(&self) -> u64 {
		self.children().map(|(_, count)| u64::from(count)).sum()
	}
}

/// Depth-first cursor over the n-grams of one order.
///
/// The traversal state lives in the cursor itself, so any number of
/// cursors can walk the same index independently.
#[derive(Clone)]
pub struct Ngrams<'a> {
	index: &'a NgramIndex,
	order: usize,
	stack: Vec<btree_map::Iter<'a, TokenId, usize>>,
	path: Vec<TokenId>,
}

impl Iterator for Ngrams<'_> {
	type Item = (Vec<TokenId>, u32);

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			let depth = self.stack.len();
			let (&token, &child) = match self.stack.last_mut()?.next() {
				Some(entry) => entry,
				None => {
					self.stack.pop();
					continue;
				}
			};

			self.path.truncate(depth - 1);
			self.path.push(token);

			let index = self.index;
			let node = &index.nodes[child];
			if depth == self.order {
				// Bulk-loaded higher orders can leave uncounted intermediate nodes
				if node.count > 0 {
					return Some((self.path.clone(), node.count));
				}
			} else if !node.children.is_empty() {
				self.stack.push(node.children.iter());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sum_of_counts(index: &NgramIndex) -> u64 {
		(1..=index.max_order())
			.flat_map(|order| index.enumerate(order).unwrap())
			.map(|(_, count)| u64::from(count))
			.sum()
	}

	#[test]
	fn zero_order_is_rejected() {
		assert!(matches!(NgramIndex::new(0), Err(ModelError::InvalidArgument(_))));
	}

	#[test]
	fn insert_creates_every_prefix() {
		let mut index = NgramIndex::new(4).unwrap();
		index.insert(&[5, 6, 7, 8]).unwrap();
		for len in 1..=4 {
			assert!(index.lookup(&[5, 6, 7, 8][..len]).unwrap().is_some(), "prefix of length {len}");
		}
		// Only the full sequence was counted
		assert_eq!(index.count(&[5, 6]).unwrap(), 0);
		assert_eq!(index.count(&[5, 6, 7, 8]).unwrap(), 1);
		assert_eq!(index.total_ngrams(), 1);
	}

	#[test]
	fn invalid_arguments_are_distinguished_from_not_found() {
		let mut index = NgramIndex::new(2).unwrap();
		assert!(index.insert(&[]).is_err());
		assert!(index.insert(&[1, 2, 3]).is_err());
		assert!(index.insert_with_count(&[1], 0).is_err());
		assert!(index.lookup(&[]).is_err());
		assert!(index.lookup(&[9]).unwrap().is_none());
		assert_eq!(index.count(&[9, 9]).unwrap(), 0);
		assert!(index.enumerate(0).is_err());
		assert!(index.enumerate(3).is_err());
	}

	#[test]
	fn extract_all_orders_slides_every_window() {
		let mut index = NgramIndex::new(3).unwrap();
		index.extract_all_orders(&[1, 2, 3, 4]);
		// 4 unigrams + 3 bigrams + 2 trigrams
		assert_eq!(index.total_ngrams(), 9);
		assert_eq!(index.count(&[2, 3, 4]).unwrap(), 1);
		assert_eq!(index.count(&[4]).unwrap(), 1);
		assert!(index.lookup(&[3, 4]).unwrap().is_some());
		assert_eq!(index.count(&[1, 2, 3]).unwrap(), 1);
	}

	#[test]
	fn total_equals_sum_of_node_counts() {
		let mut index = NgramIndex::new(3).unwrap();
		let batches: [&[TokenId]; 4] = [&[3, 4, 5], &[3, 4], &[5, 5, 5, 5, 5], &[6, 3, 4, 7, 3]];
		for batch in batches {
			index.extract_all_orders(batch);
			assert_eq!(index.total_ngrams(), sum_of_counts(&index));
		}
		index.insert_with_count(&[9, 9, 9], 7).unwrap();
		assert_eq!(index.total_ngrams(), sum_of_counts(&index));
	}

	#[test]
	fn children_report_continuations() {
		let mut index = NgramIndex::new(2).unwrap();
		index.extract_all_orders(&[3, 4]);
		index.extract_all_orders(&[3, 4]);
		index.extract_all_orders(&[3, 5]);
		let node = index.lookup(&[3]).unwrap().unwrap();
		assert_eq!(node.token(), 3);
		assert_eq!(node.count(), 3);
		assert_eq!(node.children().collect::<Vec<_>>(), vec![(4, 2), (5, 1)]);
		assert_eq!(node.children_total(), 3);
		assert!(!index.lookup(&[3, 4]).unwrap().unwrap().has_children());
	}

	#[test]
	fn enumeration_is_ordered_and_independent() {
		let mut index = NgramIndex::new(3).unwrap();
		index.extract_all_orders(&[7, 3, 5]);
		index.extract_all_orders(&[3, 4]);

		let bigrams: Vec<_> = index.enumerate(2).unwrap().collect();
		assert_eq!(bigrams, vec![(vec![3, 4], 1), (vec![3, 5], 1), (vec![7, 3], 1)]);

		// Two live cursors do not disturb each other
		let mut first = index.enumerate(1).unwrap();
		let mut second = index.enumerate(1).unwrap();
		assert_eq!(first.next(), Some((vec![3], 2)));
		assert_eq!(second.next(), Some((vec![3], 2)));
		assert_eq!(first.next(), Some((vec![4], 1)));
		assert_eq!(first.clone().count(), second.clone().count() - 1);
	}

	#[test]
	fn enumeration_skips_uncounted_intermediate_nodes() {
		let mut index = NgramIndex::new(3).unwrap();
		index.insert_with_count(&[1, 2, 3], 4).unwrap();
		assert_eq!(index.enumerate(1).unwrap().count(), 0);
		assert_eq!(index.enumerate(3).unwrap().collect::<Vec<_>>(), vec![(vec![1, 2, 3], 4)]);
	}

	#[test]
	fn merge_adds_counts() {
		let mut left = NgramIndex::new(2).unwrap();
		left.extract_all_orders(&[3, 4]);
		let mut right = NgramIndex::new(2).unwrap();
		right.extract_all_orders(&[3, 4, 5]);

		left.merge(&right).unwrap();
		assert_eq!(left.count(&[3, 4]).unwrap(), 2);
		assert_eq!(left.count(&[4, 5]).unwrap(), 1);
		assert_eq!(left.total_ngrams(), 3 + 5);
		assert!(left.merge(&NgramIndex::new(3).unwrap()).is_err());
	}

	fn decode(index: &NgramIndex) -> std::result::Result<NgramIndex, postcard::Error> {
		postcard::from_bytes(&postcard::to_stdvec(index).unwrap())
	}

	#[test]
	fn snapshot_round_trip_keeps_counts() {
		let mut index = NgramIndex::new(3).unwrap();
		index.extract_all_orders(&[3, 4, 5, 3, 4]);
		let decoded = decode(&index).unwrap();
		assert_eq!(decoded.total_ngrams(), index.total_ngrams());
		assert_eq!(decoded.node_count(), index.node_count());
		assert_eq!(decoded.count(&[3, 4]).unwrap(), 2);
	}

	#[test]
	fn inconsistent_snapshots_are_rejected() {
		let mut index = NgramIndex::new(2).unwrap();
		index.extract_all_orders(&[3, 4]);

		let mut dangling = index.clone();
		dangling.nodes[ROOT].children.insert(9, 99);
		assert!(decode(&dangling).is_err());

		let mut cycle = index.clone();
		cycle.nodes[1].children.insert(TokenId::MAX, ROOT);
		assert!(decode(&cycle).is_err());

		let mut mislabeled = index.clone();
		mislabeled.nodes[1].token = 7;
		assert!(decode(&mislabeled).is_err());

		let mut miscounted = index.clone();
		miscounted.total_ngrams += 1;
		assert!(decode(&miscounted).is_err());

		let mut rootless = index.clone();
		rootless.nodes.clear();
		assert!(decode(&rootless).is_err());

		let mut orphaned = index.clone();
		orphaned.nodes.push(Node::new(8));
		assert!(decode(&orphaned).is_err());

		let mut too_deep = index.clone();
		too_deep.max_order = 1;
		assert!(decode(&too_deep).is_err());
	}

	#[test]
	fn saturated_counts_keep_the_total_consistent() {
		let mut index = NgramIndex::new(1).unwrap();
		index.insert_with_count(&[3], u32::MAX).unwrap();
		index.insert_with_count(&[3], 5).unwrap();
		assert_eq!(index.count(&[3]).unwrap(), u32::MAX);
		assert_eq!(index.total_ngrams(), sum_of_counts(&index));
		assert!(decode(&index).is_ok());
	}
}
