// ---------------------------------------------------------------------------
// Tag vocabulary and catalog incidence
// ---------------------------------------------------------------------------
//
// Raw tags from the catalog and from queries go through the same
// normalization: lowercase, trim, runs of whitespace/slash/hyphen collapse to
// a single '-', then the alias map rewrites known variants. The vocabulary is
// the sorted set of normalized tags; its order defines the tag columns of
// every matrix artifact.
// ---------------------------------------------------------------------------

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::sparse::CsrMatrix;
use crate::types::{CatalogItem, ItemAttributes, ItemId};

/// Query fragments shorter than this never partial-match a tag.
const MIN_PARTIAL_MATCH_LEN: usize = 3;

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn separator_pattern() -> Option<&'static Regex> {
	static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
	PATTERN
		.get_or_init(|| Regex::new(r"[\s/\-]+").ok())
		.as_ref()
}

/// Canonical form of a raw tag string (before alias rewriting).
pub fn normalize_tag(raw: &str) -> String {
	let lower = raw.trim().to_lowercase();
	match separator_pattern() {
		Some(re) => re.replace_all(&lower, "-").trim_matches('-').to_string(),
		None => lower
			.split(|c: char| c.is_whitespace() || c == '/' || c == '-')
			.filter(|s| !s.is_empty())
			.collect::<Vec<_>>()
			.join("-"),
	}
}

/// Aliases shipped with the engine. Keys and values are already normalized.
pub fn default_aliases() -> BTreeMap<String, String> {
	[
		("rogue-like", "roguelike"),
		("rogue-lite", "roguelite"),
		("multi-player", "multiplayer"),
		("singleplayer", "single-player"),
		("co-op", "coop"),
	]
	.into_iter()
	.map(|(k, v)| (k.to_string(), v.to_string()))
	.collect()
}

// ---------------------------------------------------------------------------
// TagVocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagVocabulary {
	names: Vec<String>,
	aliases: BTreeMap<String, String>,
	#[serde(skip)]
	index: HashMap<String, usize>,
}

impl TagVocabulary {
	/// Build the vocabulary from every tag mentioned by the catalog.
	/// User-supplied aliases are normalized on both sides.
	pub fn from_catalog(items: &[CatalogItem], aliases: &BTreeMap<String, String>) -> Self {
		let aliases: BTreeMap<String, String> = aliases
			.iter()
			.map(|(k, v)| (normalize_tag(k), normalize_tag(v)))
			.filter(|(k, v)| !k.is_empty() && !v.is_empty() && k != v)
			.collect();

		let mut names = BTreeSet::new();
		for item in items {
			for raw in &item.tags {
				let tag = canonical(&aliases, raw);
				if !tag.is_empty() {
					names.insert(tag);
				}
			}
		}

		Self::from_parts(names.into_iter().collect(), aliases)
	}

	/// Rebuild from persisted parts (column order preserved).
	pub fn from_parts(names: Vec<String>, aliases: BTreeMap<String, String>) -> Self {
		let index = names
			.iter()
			.enumerate()
			.map(|(i, n)| (n.clone(), i))
			.collect();
		Self {
			names,
			aliases,
			index,
		}
	}

	pub fn len(&self) -> usize {
		self.names.len()
	}

	pub fn is_empty(&self) -> bool {
		self.names.is_empty()
	}

	pub fn names(&self) -> &[String] {
		&self.names
	}

	pub fn name(&self, idx: usize) -> &str {
		&self.names[idx]
	}

	pub fn aliases(&self) -> &BTreeMap<String, String> {
		&self.aliases
	}

	/// Normalize and alias a raw tag, then look it up exactly.
	pub fn lookup(&self, raw: &str) -> Option<usize> {
		self.index.get(&canonical(&self.aliases, raw)).copied()
	}

	/// Exact lookup, falling back to the first tag (in column order) that
	/// contains the fragment or is contained in it.
	pub fn resolve(&self, raw: &str) -> Option<usize> {
		if let Some(idx) = self.lookup(raw) {
			return Some(idx);
		}
		let fragment = canonical(&self.aliases, raw);
		if fragment.len() < MIN_PARTIAL_MATCH_LEN {
			return None;
		}
		let found = self
			.names
			.iter()
			.position(|name| name.contains(&fragment) || fragment.contains(name.as_str()));
		if let Some(idx) = found {
			tracing::debug!(query = %raw, tag = %self.names[idx], "partial tag match");
		}
		found
	}
}

fn canonical(aliases: &BTreeMap<String, String>, raw: &str) -> String {
	let tag = normalize_tag(raw);
	match aliases.get(&tag) {
		Some(target) => target.clone(),
		None => tag,
	}
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Items in row order with their tag incidence and constraint attributes.
#[derive(Debug, Clone)]
pub struct Catalog {
	item_ids: Vec<ItemId>,
	rows: HashMap<ItemId, usize>,
	incidence: CsrMatrix,
	titles: Vec<Option<String>>,
	attributes: Vec<ItemAttributes>,
}

impl Catalog {
	/// Assemble rows in order of first appearance. Repeated ids merge their
	/// tag sets; title and attributes come from the first occurrence.
	pub fn build(items: &[CatalogItem], vocab: &TagVocabulary) -> Self {
		let mut item_ids = Vec::new();
		let mut rows: HashMap<ItemId, usize> = HashMap::new();
		let mut tag_sets: Vec<BTreeSet<usize>> = Vec::new();
		let mut titles = Vec::new();
		let mut attributes = Vec::new();

		for item in items {
			let row = *rows.entry(item.id).or_insert_with(|| {
				item_ids.push(item.id);
				tag_sets.push(BTreeSet::new());
				titles.push(item.title.clone());
				attributes.push(item.attributes.clone());
				item_ids.len() - 1
			});
			for raw in &item.tags {
				if let Some(col) = vocab.lookup(raw) {
					tag_sets[row].insert(col);
				}
			}
		}

		let tagless = tag_sets.iter().filter(|s| s.is_empty()).count();
		if tagless > 0 {
			tracing::warn!(tagless, "catalog items without tags get zero vectors");
		}

		let incidence = CsrMatrix::from_rows(
			vocab.len(),
			tag_sets
				.into_iter()
				.map(|set| set.into_iter().map(|c| (c, 1.0)).collect())
				.collect(),
		);

		Self {
			item_ids,
			rows,
			incidence,
			titles,
			attributes,
		}
	}

	/// Rebuild from persisted parts, checking that every per-row list agrees.
	pub fn from_parts(
		item_ids: Vec<ItemId>,
		incidence: CsrMatrix,
		titles: Vec<Option<String>>,
		attributes: Vec<ItemAttributes>,
	) -> Result<Self, EngineError> {
		let n = item_ids.len();
		if incidence.n_rows() != n {
			return Err(EngineError::dimension("catalog incidence rows", n, incidence.n_rows()));
		}
		if titles.len() != n {
			return Err(EngineError::dimension("catalog titles", n, titles.len()));
		}
		if attributes.len() != n {
			return Err(EngineError::dimension("catalog attributes", n, attributes.len()));
		}
		let rows: HashMap<ItemId, usize> = item_ids
			.iter()
			.enumerate()
			.map(|(i, &id)| (id, i))
			.collect();
		if rows.len() != n {
			return Err(EngineError::Corruption("duplicate item ids in catalog".into()));
		}
		Ok(Self {
			item_ids,
			rows,
			incidence,
			titles,
			attributes,
		})
	}

	pub fn len(&self) -> usize {
		self.item_ids.len()
	}

	pub fn is_empty(&self) -> bool {
		self.item_ids.is_empty()
	}

	pub fn item_ids(&self) -> &[ItemId] {
		&self.item_ids
	}

	pub fn item_id(&self, row: usize) -> ItemId {
		self.item_ids[row]
	}

	pub fn row_of(&self, id: ItemId) -> Option<usize> {
		self.rows.get(&id).copied()
	}

	pub fn incidence(&self) -> &CsrMatrix {
		&self.incidence
	}

	pub fn tags_of(&self, row: usize) -> &[usize] {
		self.incidence.row_indices(row)
	}

	pub fn tag_count(&self, row: usize) -> usize {
		self.incidence.row_nnz(row)
	}

	pub fn title(&self, row: usize) -> Option<&str> {
		self.titles[row].as_deref()
	}

	pub fn titles(&self) -> &[Option<String>] {
		&self.titles
	}

	pub fn attributes(&self, row: usize) -> &ItemAttributes {
		&self.attributes[row]
	}

	pub fn all_attributes(&self) -> &[ItemAttributes] {
		&self.attributes
	}

	/// Share of catalog items carrying each tag.
	pub fn tag_frequencies(&self) -> Vec<f64> {
		let n = self.len().max(1) as f64;
		self.incidence
			.column_counts()
			.into_iter()
			.map(|c| c as f64 / n)
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn item(id: ItemId, tags: &[&str]) -> CatalogItem {
		CatalogItem {
			id,
			title: Some(format!("game {id}")),
			tags: tags.iter().map(|t| t.to_string()).collect(),
			attributes: ItemAttributes::default(),
		}
	}

	// -- normalize tests ----------------------------------------------------

	#[test]
	fn normalize_collapses_separators() {
		assert_eq!(normalize_tag("  Open   World "), "open-world");
		assert_eq!(normalize_tag("Action/Adventure"), "action-adventure");
		assert_eq!(normalize_tag("Rogue - Like"), "rogue-like");
		assert_eq!(normalize_tag("Indie"), "indie");
	}

	#[test]
	fn aliases_rewrite_variants() {
		let vocab = TagVocabulary::from_catalog(
			&[item(1, &["Rogue Like", "Roguelike", "Multi Player"])],
			&default_aliases(),
		);
		assert_eq!(vocab.names(), &["multiplayer".to_string(), "roguelike".to_string()]);
		assert_eq!(vocab.lookup("rogue-like"), Some(1));
	}

	// -- vocabulary tests ---------------------------------------------------

	#[test]
	fn vocabulary_is_sorted_and_unique() {
		let vocab = TagVocabulary::from_catalog(
			&[item(1, &["Strategy", "Indie"]), item(2, &["indie", "RPG"])],
			&BTreeMap::new(),
		);
		assert_eq!(vocab.names(), &["indie", "rpg", "strategy"]);
	}

	#[test]
	fn resolve_falls_back_to_partial_match() {
		let vocab = TagVocabulary::from_catalog(
			&[item(1, &["Open World", "Puzzle"])],
			&BTreeMap::new(),
		);
		assert_eq!(vocab.resolve("puzzle"), Some(1));
		assert_eq!(vocab.resolve("open"), Some(0));
		assert_eq!(vocab.resolve("op"), None);
		assert_eq!(vocab.resolve("racing"), None);
	}

	// -- catalog tests ------------------------------------------------------

	#[test]
	fn catalog_merges_duplicate_ids_in_first_seen_order() {
		let items = vec![item(20, &["b"]), item(10, &["a"]), item(20, &["a"])];
		let vocab = TagVocabulary::from_catalog(&items, &BTreeMap::new());
		let catalog = Catalog::build(&items, &vocab);
		assert_eq!(catalog.item_ids(), &[20, 10]);
		assert_eq!(catalog.row_of(20), Some(0));
		assert_eq!(catalog.tags_of(0), &[0, 1]);
		assert_eq!(catalog.tag_count(1), 1);
	}

	#[test]
	fn tagless_items_keep_a_row() {
		let items = vec![item(1, &["a"]), item(2, &[])];
		let vocab = TagVocabulary::from_catalog(&items, &BTreeMap::new());
		let catalog = Catalog::build(&items, &vocab);
		assert_eq!(catalog.len(), 2);
		assert_eq!(catalog.tag_count(1), 0);
		assert_eq!(catalog.tag_frequencies(), vec![0.5]);
	}

	#[test]
	fn from_parts_rejects_mismatched_lengths() {
		let incidence = CsrMatrix::from_rows(1, vec![vec![(0, 1.0)]]);
		let err = Catalog::from_parts(vec![1, 2], incidence, vec![None, None], vec![
			ItemAttributes::default(),
			ItemAttributes::default(),
		])
		.unwrap_err();
		assert!(matches!(err, EngineError::DimensionMismatch { .. }));
	}
}
