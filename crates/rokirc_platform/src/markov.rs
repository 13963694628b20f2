#![forbid(unsafe_code)]

//! Word-level first-order Markov chain.
//!
//! The empty string marks both ends of a line: as a prefix it means "line start",
//! as a successor it means "line end". Words are never empty, so the marker cannot
//! collide with chat text.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;

/// Line start/end marker.
pub const BOUNDARY: &str = "";

/// Default cap on generated words.
pub const DEFAULT_MAX_WORDS: usize = 40;

/// One observed `prefix -> next` step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transition {
	pub prefix: String,
	pub next: String,
}

#[derive(Debug, Clone, Default)]
pub struct MarkovChain {
	transitions: HashMap<String, BTreeMap<String, u64>>,
}

impl MarkovChain {
	pub fn new() -> Self {
		Self::default()
	}

	/// Rebuild a chain from persisted `(prefix, next, count)` rows.
	pub fn from_counts<I>(rows: I) -> Self
	where
		I: IntoIterator<Item = (String, String, u64)>,
	{
		let mut chain = Self::new();
		for (prefix, next, count) in rows {
			chain.add(prefix, next, count);
		}
		chain
	}

	/// `true` until at least one line has been trained.
	pub fn is_empty(&self) -> bool {
		!self.transitions.contains_key(BOUNDARY)
	}

	/// Number of distinct transitions.
	pub fn len(&self) -> usize {
		self.transitions.values().map(BTreeMap::len).sum()
	}

	pub fn add(&mut self, prefix: String, next: String, count: u64) {
		if count == 0 {
			return;
		}
		let slot = self.transitions.entry(prefix).or_default().entry(next).or_insert(0);
		*slot = slot.saturating_add(count);
	}

	/// Train on one chat line and return the transitions it added.
	pub fn train(&mut self, line: &str) -> Vec<Transition> {
		let words: Vec<&str> = line.split_whitespace().collect();
		if words.is_empty() {
			return Vec::new();
		}

		let mut added = Vec::with_capacity(words.len() + 1);
		let mut prefix = BOUNDARY;
		for word in words.iter().copied().chain(std::iter::once(BOUNDARY)) {
			added.push(Transition {
				prefix: prefix.to_string(),
				next: word.to_string(),
			});
			prefix = word;
		}

		for t in &added {
			self.add(t.prefix.clone(), t.next.clone(), 1);
		}
		added
	}

	/// Walk the chain from the line-start marker. Empty when the chain is empty.
	pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R, max_words: usize) -> String {
		let mut words: Vec<&str> = Vec::new();
		let mut current: &str = BOUNDARY;

		while words.len() < max_words {
			let Some(successors) = self.transitions.get(current) else {
				break;
			};
			let Some(next) = pick_weighted(successors, rng) else {
				break;
			};
			if next == BOUNDARY {
				break;
			}
			words.push(next);
			current = next;
		}

		words.join(" ")
	}
}

fn pick_weighted<'a, R: Rng + ?Sized>(successors: &'a BTreeMap<String, u64>, rng: &mut R) -> Option<&'a str> {
	let total: u64 = successors.values().fold(0u64, |acc, c| acc.saturating_add(*c));
	if total == 0 {
		return None;
	}

	let mut roll = rng.random_range(0..total);
	for (word, count) in successors {
		if roll < *count {
			return Some(word.as_str());
		}
		roll -= *count;
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	#[test]
	fn empty_chain_generates_nothing() {
		let chain = MarkovChain::new();
		assert!(chain.is_empty());
		assert_eq!(chain.generate(&mut StdRng::seed_from_u64(1), DEFAULT_MAX_WORDS), "");
	}

	#[test]
	fn single_line_is_reproduced() {
		let mut chain = MarkovChain::new();
		let added = chain.train("hello  there world");
		assert_eq!(added.len(), 4);
		assert_eq!(added[0].prefix, BOUNDARY);
		assert_eq!(added[3].next, BOUNDARY);
		assert!(!chain.is_empty());

		let out = chain.generate(&mut StdRng::seed_from_u64(7), DEFAULT_MAX_WORDS);
		assert_eq!(out, "hello there world");
	}

	#[test]
	fn whitespace_only_line_trains_nothing() {
		let mut chain = MarkovChain::new();
		assert!(chain.train("   \t ").is_empty());
		assert!(chain.is_empty());
	}

	#[test]
	fn generation_respects_word_cap() {
		let mut chain = MarkovChain::new();
		chain.add(BOUNDARY.into(), "la".into(), 1);
		chain.add("la".into(), "la".into(), 1);

		let out = chain.generate(&mut StdRng::seed_from_u64(3), 5);
		assert_eq!(out.split(' ').count(), 5);
	}

	#[test]
	fn from_counts_matches_training() {
		let mut trained = MarkovChain::new();
		let added = trained.train("a b");

		let rebuilt = MarkovChain::from_counts(added.into_iter().map(|t| (t.prefix, t.next, 1)));
		assert_eq!(rebuilt.len(), trained.len());
		assert_eq!(rebuilt.generate(&mut StdRng::seed_from_u64(0), 10), "a b");
	}

	#[test]
	fn generated_words_come_from_training() {
		let mut chain = MarkovChain::new();
		chain.train("the cat sat");
		chain.train("the dog ran");

		let mut rng = StdRng::seed_from_u64(42);
		for _ in 0..32 {
			let out = chain.generate(&mut rng, DEFAULT_MAX_WORDS);
			assert!(out.starts_with("the "));
			for word in out.split(' ') {
				assert!(["the", "cat", "sat", "dog", "ran"].contains(&word), "unexpected word {word}");
			}
		}
	}
}
