// ---------------------------------------------------------------------------
// Candidate scoring
// ---------------------------------------------------------------------------
//
// Pure functions: hard-constraint filtering followed by a weighted composite
// of four per-candidate factors, each in [0, 1]. The composite is divided by
// the batch maximum so the best candidate scores exactly 1.0.
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::query::Constraints;
use crate::types::{ItemAttributes, ScoreBreakdown};
use crate::vectors::{cosine_similarity, EmbeddingMatrix};
use crate::vocab::Catalog;

// ---------------------------------------------------------------------------
// Weight normalization
// ---------------------------------------------------------------------------

const DEFAULT_TAG_MATCH: f64 = 0.4;
const DEFAULT_NOVELTY: f64 = 0.2;
const DEFAULT_RECENCY: f64 = 0.2;
const DEFAULT_POPULARITY: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringWeights {
	pub tag_match: f64,
	pub novelty: f64,
	pub recency: f64,
	pub popularity: f64,
}

impl Default for ScoringWeights {
	fn default() -> Self {
		Self {
			tag_match: DEFAULT_TAG_MATCH,
			novelty: DEFAULT_NOVELTY,
			recency: DEFAULT_RECENCY,
			popularity: DEFAULT_POPULARITY,
		}
	}
}

impl ScoringWeights {
	/// Fill missing weights with defaults, then scale so the four sum to 1.
	/// All-zero weights fall back to the defaults.
	pub fn from_partial(
		tag_match: Option<f64>,
		novelty: Option<f64>,
		recency: Option<f64>,
		popularity: Option<f64>,
	) -> Result<Self, EngineError> {
		let raw = [
			("tag_match", tag_match.unwrap_or(DEFAULT_TAG_MATCH)),
			("novelty", novelty.unwrap_or(DEFAULT_NOVELTY)),
			("recency", recency.unwrap_or(DEFAULT_RECENCY)),
			("popularity", popularity.unwrap_or(DEFAULT_POPULARITY)),
		];
		if let Some((name, value)) = raw.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
			return Err(EngineError::InvalidQuery(format!(
				"weight {name} must be a non-negative number, got {value}"
			)));
		}
		let total: f64 = raw.iter().map(|(_, v)| v).sum();
		if total == 0.0 {
			return Ok(Self::default());
		}
		Ok(Self {
			tag_match: raw[0].1 / total,
			novelty: raw[1].1 / total,
			recency: raw[2].1 / total,
			popularity: raw[3].1 / total,
		})
	}

	fn combine(&self, s: &ScoreBreakdown) -> f64 {
		self.tag_match * s.tag_match
			+ self.novelty * s.novelty
			+ self.recency * s.recency
			+ self.popularity * s.popularity
	}
}

// ---------------------------------------------------------------------------
// Hard constraints
// ---------------------------------------------------------------------------

fn contains_ignore_case(values: &[String], wanted: &str) -> bool {
	let wanted = wanted.trim();
	values.iter().any(|v| v.trim().eq_ignore_ascii_case(wanted))
}

/// `true` when the item violates none of the constraints. A missing price
/// only fails a lower bound; a missing age rating never fails.
pub fn satisfies(attrs: &ItemAttributes, c: &Constraints) -> bool {
	if let Some(max) = c.price_max {
		if attrs.price.is_some_and(|p| p > max) {
			return false;
		}
	}
	if let Some(min) = c.price_min {
		if attrs.price.unwrap_or(0.0) < min {
			return false;
		}
	}
	if let Some(platform) = &c.platform {
		if !contains_ignore_case(&attrs.platforms, platform) {
			return false;
		}
	}
	if let Some(language) = &c.language {
		if !contains_ignore_case(&attrs.languages, language) {
			return false;
		}
	}
	if let Some(max_age) = c.age_rating {
		if attrs.age_rating.is_some_and(|a| a > max_age) {
			return false;
		}
	}
	true
}

// ---------------------------------------------------------------------------
// Individual factors
// ---------------------------------------------------------------------------

/// `1 − mean(frequency of the item's tags)`.
pub fn novelty_score(tags: &[usize], tag_frequencies: &[f64]) -> f64 {
	if tags.is_empty() {
		return 0.0;
	}
	let mean = tags
		.iter()
		.map(|&t| tag_frequencies.get(t).copied().unwrap_or(0.0))
		.sum::<f64>()
		/ tags.len() as f64;
	(1.0 - mean).clamp(0.0, 1.0)
}

fn ratio_to_max(value: f64, max: f64) -> f64 {
	if max > 0.0 {
		(value / max).clamp(0.0, 1.0)
	} else {
		0.0
	}
}

// ---------------------------------------------------------------------------
// Batch scoring
// ---------------------------------------------------------------------------

/// Per-item inputs the scorer reads, all in catalog row order.
pub struct ScoringContext<'a> {
	pub catalog: &'a Catalog,
	pub item_vectors: &'a EmbeddingMatrix,
	pub tag_frequencies: &'a [f64],
	pub item_weights: &'a [f64],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
	pub row: usize,
	pub scores: ScoreBreakdown,
}

/// Filter `rows` by `constraints` and score the survivors, keeping their
/// input order. An empty result is not an error.
pub fn score_candidates(
	ctx: &ScoringContext<'_>,
	query_vector: &[f32],
	rows: &[usize],
	constraints: &Constraints,
	weights: &ScoringWeights,
) -> Vec<ScoredCandidate> {
	let survivors: Vec<usize> = rows
		.iter()
		.copied()
		.filter(|&r| satisfies(ctx.catalog.attributes(r), constraints))
		.collect();
	if survivors.is_empty() {
		return Vec::new();
	}

	let weight_of = |r: usize| ctx.item_weights.get(r).copied().unwrap_or(0.0);
	let max_weight = survivors.iter().map(|&r| weight_of(r)).fold(0.0, f64::max);
	let max_tags = survivors
		.iter()
		.map(|&r| ctx.catalog.tag_count(r))
		.max()
		.unwrap_or(0) as f64;

	let mut scored: Vec<ScoredCandidate> = survivors
		.iter()
		.map(|&row| {
			let mut scores = ScoreBreakdown {
				tag_match: cosine_similarity(query_vector, ctx.item_vectors.row(row)).clamp(0.0, 1.0),
				novelty: novelty_score(ctx.catalog.tags_of(row), ctx.tag_frequencies),
				recency: ratio_to_max(weight_of(row), max_weight),
				popularity: ratio_to_max(ctx.catalog.tag_count(row) as f64, max_tags),
				final_score: 0.0,
			};
			scores.final_score = weights.combine(&scores);
			ScoredCandidate { row, scores }
		})
		.collect();

	let max_final = scored.iter().map(|c| c.scores.final_score).fold(0.0, f64::max);
	for c in scored.iter_mut() {
		c.scores.final_score = ratio_to_max(c.scores.final_score, max_final);
	}

	tracing::debug!(
		candidates = rows.len(),
		survivors = scored.len(),
		"candidates scored"
	);
	scored
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
