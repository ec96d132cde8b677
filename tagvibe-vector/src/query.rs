// ---------------------------------------------------------------------------
// Queries: boundary validation and query vector construction
// ---------------------------------------------------------------------------
//
// A `QueryRequest` is the loosely typed wire shape. `Query::try_from`
// validates it into a `QueryMode` variant that carries exactly the inputs its
// mode needs, so the builder below never has to re-check the shape.
//
// Query vectors live in the same space as item vectors:
//   similar  mean of the seed item vectors
//   vibe     Σ w·tagVector + Σ W·phrase − Σ avoidedTagVector
//   hybrid   simWeight·similar + vibeWeight·vibe
// each normalized to unit length.
// ---------------------------------------------------------------------------

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::alignment::TextAlignment;
use crate::encoder::TextEncoder;
use crate::error::EngineError;
use crate::scoring::ScoringWeights;
use crate::types::ItemId;
use crate::vectors::{add_scaled, cosine_similarity, l2_normalize, to_f32, EmbeddingMatrix};
use crate::vocab::{Catalog, TagVocabulary};

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetTag {
	pub name: String,
	#[serde(default = "default_tag_weight")]
	pub weight: f64,
}

fn default_tag_weight() -> f64 {
	1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
	#[serde(default)]
	pub price_max: Option<f64>,
	#[serde(default)]
	pub price_min: Option<f64>,
	#[serde(default)]
	pub platform: Option<String>,
	#[serde(default)]
	pub language: Option<String>,
	/// Highest acceptable age rating.
	#[serde(default)]
	pub age_rating: Option<u32>,
	/// Constraints the engine does not know; reported back as warnings.
	#[serde(flatten, skip_serializing)]
	pub unknown: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryWeights {
	#[serde(default)]
	pub similar: Option<f64>,
	#[serde(default)]
	pub vibe: Option<f64>,
	#[serde(default)]
	pub tag_match: Option<f64>,
	#[serde(default)]
	pub novelty: Option<f64>,
	#[serde(default)]
	pub recency: Option<f64>,
	#[serde(default)]
	pub popularity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptionsRequest {
	#[serde(default)]
	pub k: Option<usize>,
	#[serde(default)]
	pub lambda: Option<f64>,
	#[serde(default)]
	pub top_n: Option<usize>,
	#[serde(default)]
	pub expand_tags: Option<usize>,
}

impl Constraints {
	/// Reject contradictory bounds; unknown keys come back as warnings.
	pub fn validate(&self) -> Result<Vec<String>, EngineError> {
		if let (Some(min), Some(max)) = (self.price_min, self.price_max) {
			if min > max {
				return Err(EngineError::InvalidQuery(format!(
					"price_min {min} exceeds price_max {max}"
				)));
			}
		}
		Ok(self
			.unknown
			.keys()
			.map(|key| format!("unknown constraint '{key}' ignored"))
			.collect())
	}
}

impl QueryWeights {
	pub fn scoring(&self) -> Result<ScoringWeights, EngineError> {
		ScoringWeights::from_partial(self.tag_match, self.novelty, self.recency, self.popularity)
	}
}

impl QueryOptionsRequest {
	/// Apply defaults and range checks. `top_n` never drops below `k`.
	pub fn resolve(&self) -> Result<QueryOptions, EngineError> {
		let defaults = QueryOptions::default();
		let k = self.k.unwrap_or(defaults.k);
		let lambda = self.lambda.unwrap_or(defaults.lambda);
		if k == 0 {
			return Err(EngineError::InvalidQuery("k must be at least 1".into()));
		}
		if !(0.0..=1.0).contains(&lambda) {
			return Err(EngineError::InvalidQuery(format!(
				"lambda must be in [0, 1], got {lambda}"
			)));
		}
		Ok(QueryOptions {
			k,
			lambda,
			top_n: self.top_n.unwrap_or(defaults.top_n).max(k),
			expand_tags: self.expand_tags.unwrap_or(defaults.expand_tags),
		})
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
	pub mode: String,
	#[serde(default)]
	pub games: Vec<ItemId>,
	#[serde(default)]
	pub phrases: Vec<String>,
	#[serde(default)]
	pub target_tags: Vec<TargetTag>,
	#[serde(default)]
	pub avoid_tags: Vec<String>,
	#[serde(default)]
	pub constraints: Constraints,
	#[serde(default)]
	pub weights: QueryWeights,
	#[serde(default)]
	pub options: QueryOptionsRequest,
}

// ---------------------------------------------------------------------------
// Validated query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct VibeSignal {
	pub phrases: Vec<String>,
	pub target_tags: Vec<TargetTag>,
	pub avoid_tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridMix {
	pub similar: f64,
	pub vibe: f64,
}

impl Default for HybridMix {
	fn default() -> Self {
		Self {
			similar: 0.5,
			vibe: 0.5,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryMode {
	Similar {
		seeds: Vec<ItemId>,
	},
	Vibe {
		signal: VibeSignal,
	},
	Hybrid {
		seeds: Vec<ItemId>,
		signal: VibeSignal,
		mix: HybridMix,
	},
}

impl QueryMode {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Similar { .. } => "similar",
			Self::Vibe { .. } => "vibe",
			Self::Hybrid { .. } => "hybrid",
		}
	}

	pub fn seeds(&self) -> &[ItemId] {
		match self {
			Self::Similar { seeds } | Self::Hybrid { seeds, .. } => seeds,
			Self::Vibe { .. } => &[],
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
	/// Recommendations returned.
	pub k: usize,
	/// MMR relevance/diversity trade-off in [0, 1].
	pub lambda: f64,
	/// Candidates pulled from the index before filtering.
	pub top_n: usize,
	/// Nearest tags appended to a vibe signal.
	pub expand_tags: usize,
}

impl Default for QueryOptions {
	fn default() -> Self {
		Self {
			k: 10,
			lambda: 0.5,
			top_n: 500,
			expand_tags: 0,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
	pub mode: QueryMode,
	pub constraints: Constraints,
	pub weights: ScoringWeights,
	pub options: QueryOptions,
	/// Non-fatal problems found during validation.
	pub warnings: Vec<String>,
}

impl TryFrom<QueryRequest> for Query {
	type Error = EngineError;

	fn try_from(req: QueryRequest) -> Result<Self, Self::Error> {
		let mut warnings = Vec::new();

		for t in &req.target_tags {
			if !t.weight.is_finite() {
				return Err(EngineError::InvalidQuery(format!(
					"target tag '{}' has a non-finite weight",
					t.name
				)));
			}
		}

		let signal = VibeSignal {
			phrases: req
				.phrases
				.iter()
				.map(|p| p.trim().to_string())
				.filter(|p| !p.is_empty())
				.collect(),
			target_tags: req.target_tags.clone(),
			avoid_tags: req.avoid_tags.clone(),
		};
		let has_vibe = !signal.phrases.is_empty()
			|| !signal.target_tags.is_empty()
			|| !signal.avoid_tags.is_empty();
		let mut seeds = req.games.clone();
		dedup_in_order(&mut seeds);

		let mode = match req.mode.trim().to_ascii_lowercase().as_str() {
			"similar" => {
				if seeds.is_empty() {
					return Err(EngineError::InvalidQuery("similar mode requires games".into()));
				}
				if has_vibe {
					warnings.push("phrases and tags are ignored in similar mode".to_string());
				}
				QueryMode::Similar { seeds }
			}
			"vibe" => {
				if !has_vibe {
					return Err(EngineError::InvalidQuery(
						"vibe mode requires phrases, target_tags or avoid_tags".into(),
					));
				}
				if !seeds.is_empty() {
					warnings.push("games are ignored in vibe mode".to_string());
				}
				QueryMode::Vibe { signal }
			}
			"hybrid" => {
				if seeds.is_empty() || !has_vibe {
					return Err(EngineError::InvalidQuery(
						"hybrid mode requires games and phrases, target_tags or avoid_tags".into(),
					));
				}
				let mix = HybridMix {
					similar: req.weights.similar.unwrap_or(0.5),
					vibe: req.weights.vibe.unwrap_or(0.5),
				};
				if !(mix.similar >= 0.0 && mix.vibe >= 0.0) || mix.similar + mix.vibe <= 0.0 {
					return Err(EngineError::InvalidQuery(
						"hybrid weights must be non-negative and not both zero".into(),
					));
				}
				QueryMode::Hybrid { seeds, signal, mix }
			}
			other => return Err(EngineError::UnknownMode(other.to_string())),
		};

		warnings.extend(req.constraints.validate()?);

		Ok(Query {
			mode,
			weights: req.weights.scoring()?,
			options: req.options.resolve()?,
			constraints: req.constraints,
			warnings,
		})
	}
}

fn dedup_in_order(ids: &mut Vec<ItemId>) {
	let mut seen = HashSet::new();
	ids.retain(|id| seen.insert(*id));
}

// ---------------------------------------------------------------------------
// Query vector construction
// ---------------------------------------------------------------------------

/// Read-only view of the artifacts a query vector is built from.
pub struct QuerySpace<'a> {
	pub vocab: &'a TagVocabulary,
	pub catalog: &'a Catalog,
	pub tag_vectors: &'a EmbeddingMatrix,
	pub item_vectors: &'a EmbeddingMatrix,
	pub alignment: Option<&'a TextAlignment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryVector {
	pub vector: Vec<f32>,
	/// Catalog rows of the resolved seed items.
	pub seed_rows: Vec<usize>,
	/// Tags appended by expansion, with their weights.
	pub expanded: Vec<(String, f64)>,
	pub warnings: Vec<String>,
}

pub fn build_query_vector(
	space: &QuerySpace<'_>,
	query: &Query,
	encoder: Option<&dyn TextEncoder>,
) -> Result<QueryVector, EngineError> {
	let mut warnings = Vec::new();
	let mut expanded = Vec::new();

	let (mut vector, seed_rows) = match &query.mode {
		QueryMode::Similar { seeds } => {
			let (v, rows) = similar_vector(space, seeds, &mut warnings)?;
			(v, rows)
		}
		QueryMode::Vibe { signal } => {
			let v = vibe_vector(space, signal, query.options.expand_tags, encoder, &mut expanded, &mut warnings)?;
			(v, Vec::new())
		}
		QueryMode::Hybrid { seeds, signal, mix } => {
			let (sim, rows) = similar_vector(space, seeds, &mut warnings)?;
			let vibe = vibe_vector(space, signal, query.options.expand_tags, encoder, &mut expanded, &mut warnings)?;
			let combined: Vec<f64> = sim
				.iter()
				.zip(&vibe)
				.map(|(s, v)| mix.similar * s + mix.vibe * v)
				.collect();
			(combined, rows)
		}
	};

	if l2_normalize(&mut vector) == 0.0 {
		return Err(EngineError::NoSignal);
	}

	for w in &warnings {
		tracing::warn!(mode = query.mode.name(), "{}", w);
	}

	Ok(QueryVector {
		vector: to_f32(&vector),
		seed_rows,
		expanded,
		warnings,
	})
}

/// Unit mean of the resolved seed vectors.
fn similar_vector(
	space: &QuerySpace<'_>,
	seeds: &[ItemId],
	warnings: &mut Vec<String>,
) -> Result<(Vec<f64>, Vec<usize>), EngineError> {
	let mut acc = vec![0.0; space.item_vectors.cols()];
	let mut rows = Vec::new();
	for &id in seeds {
		match space.catalog.row_of(id) {
			Some(row) if !space.item_vectors.is_zero_row(row) => {
				add_scaled(&mut acc, space.item_vectors.row(row), 1.0);
				rows.push(row);
			}
			Some(row) => {
				warnings.push(format!("game {id} has no tags and cannot seed a query"));
				rows.push(row);
			}
			None => warnings.push(format!("unknown game {id} skipped")),
		}
	}

	let used = rows
		.iter()
		.filter(|&&r| !space.item_vectors.is_zero_row(r))
		.count();
	if used == 0 {
		return Err(EngineError::NoSeedItems);
	}
	for x in acc.iter_mut() {
		*x /= used as f64;
	}
	if l2_normalize(&mut acc) == 0.0 {
		return Err(EngineError::NoSignal);
	}
	Ok((acc, rows))
}

fn vibe_vector(
	space: &QuerySpace<'_>,
	signal: &VibeSignal,
	expand: usize,
	encoder: Option<&dyn TextEncoder>,
	expanded: &mut Vec<(String, f64)>,
	warnings: &mut Vec<String>,
) -> Result<Vec<f64>, EngineError> {
	let dim = space.tag_vectors.cols();
	let mut acc = vec![0.0; dim];

	let mut present: HashSet<usize> = HashSet::new();
	for t in &signal.target_tags {
		match space.vocab.resolve(&t.name) {
			Some(idx) => {
				add_scaled(&mut acc, space.tag_vectors.row(idx), t.weight);
				present.insert(idx);
			}
			None => warnings.push(format!("unknown tag '{}' skipped", t.name)),
		}
	}

	if !signal.phrases.is_empty() {
		match (space.alignment, encoder) {
			(Some(alignment), Some(encoder)) => {
				let embeddings = encoder.encode(&signal.phrases)?;
				for e in &embeddings {
					let projected = alignment.project(e)?;
					for (a, p) in acc.iter_mut().zip(&projected) {
						*a += p;
					}
				}
			}
			_ => warnings.push(format!(
				"{} phrase(s) ignored: no text alignment available",
				signal.phrases.len()
			)),
		}
	}

	let mut avoided: Vec<usize> = Vec::new();
	for name in &signal.avoid_tags {
		match space.vocab.resolve(name) {
			Some(idx) => avoided.push(idx),
			None => warnings.push(format!("unknown avoided tag '{name}' skipped")),
		}
	}

	if expand > 0 {
		let mut exclude = present.clone();
		exclude.extend(avoided.iter().copied());
		for (idx, sim) in nearest_tags(space.tag_vectors, &to_f32(&acc), expand, &exclude) {
			if sim <= 0.0 {
				break;
			}
			add_scaled(&mut acc, space.tag_vectors.row(idx), sim);
			expanded.push((space.vocab.name(idx).to_string(), sim));
		}
	}

	for idx in avoided {
		add_scaled(&mut acc, space.tag_vectors.row(idx), -1.0);
	}

	if l2_normalize(&mut acc) == 0.0 {
		return Err(EngineError::NoSignal);
	}
	Ok(acc)
}

/// The `k` tags most similar to `vector`, skipping `exclude`.
pub fn nearest_tags(
	tag_vectors: &EmbeddingMatrix,
	vector: &[f32],
	k: usize,
	exclude: &HashSet<usize>,
) -> Vec<(usize, f64)> {
	let mut scored: Vec<(usize, f64)> = (0..tag_vectors.rows())
		.filter(|t| !exclude.contains(t))
		.map(|t| (t, cosine_similarity(tag_vectors.row(t), vector)))
		.collect();
	scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
	scored.truncate(k);
	scored
}
