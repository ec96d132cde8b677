// ---------------------------------------------------------------------------
// VectorStore — loaded artifacts + retrieval index
// ---------------------------------------------------------------------------
//
// Built once from an artifact set and never mutated afterwards; the server
// shares it behind an `Arc` so concurrent queries read it in parallel. Every
// query runs: query vector -> index top-N -> hard constraints + scoring ->
// MMR re-ranking.
// ---------------------------------------------------------------------------

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::diversity::{diversity_metrics, mmr_select};
use crate::encoder::TextEncoder;
use crate::error::EngineError;
use crate::index::{build_index, IndexConfig, IndexKind, VectorIndex};
use crate::persistence::load_artifacts;
use crate::pipeline::Artifacts;
use crate::query::{build_query_vector, nearest_tags, Constraints, Query, QueryOptions, QuerySpace, QueryVector};
use crate::scoring::{score_candidates, ScoringContext, ScoringWeights};
use crate::types::{ItemId, ItemNeighbor, RecommendResponse, Recommendation, TagNeighbor};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
	pub generation_id: String,
	pub created_at: String,
	pub items: usize,
	pub tags: usize,
	pub dim: usize,
	pub text_dim: Option<usize>,
	pub aligned: bool,
	pub index: IndexKind,
	pub indexed_items: usize,
}

pub struct VectorStore {
	artifacts: Artifacts,
	index: Box<dyn VectorIndex>,
	tag_frequencies: Vec<f64>,
}

impl VectorStore {
	pub fn new(artifacts: Artifacts, index_config: &IndexConfig) -> Result<Self, EngineError> {
		let index = build_index(&artifacts.item_vectors, index_config)?;
		let tag_frequencies = artifacts.catalog.tag_frequencies();
		Ok(Self {
			artifacts,
			index,
			tag_frequencies,
		})
	}

	/// Load an artifact directory and index its item vectors.
	pub fn open(dir: &Path, index_config: &IndexConfig) -> Result<Self, EngineError> {
		Self::new(load_artifacts(dir)?, index_config)
	}

	pub fn artifacts(&self) -> &Artifacts {
		&self.artifacts
	}

	pub fn info(&self) -> StoreInfo {
		let m = &self.artifacts.manifest;
		StoreInfo {
			generation_id: m.generation_id.clone(),
			created_at: m.created_at.clone(),
			items: self.artifacts.catalog.len(),
			tags: self.artifacts.vocab.len(),
			dim: m.dim,
			text_dim: self.artifacts.alignment.as_ref().map(|a| a.text_dim()),
			aligned: self.artifacts.alignment.is_some(),
			index: self.index.kind(),
			indexed_items: self.index.len(),
		}
	}

	fn space(&self) -> QuerySpace<'_> {
		QuerySpace {
			vocab: &self.artifacts.vocab,
			catalog: &self.artifacts.catalog,
			tag_vectors: &self.artifacts.tag_vectors,
			item_vectors: &self.artifacts.item_vectors,
			alignment: self.artifacts.alignment.as_ref(),
		}
	}

	pub fn query_vector(
		&self,
		query: &Query,
		encoder: Option<&dyn TextEncoder>,
	) -> Result<QueryVector, EngineError> {
		build_query_vector(&self.space(), query, encoder)
	}

	// ── Recommendation ────────────────────────────────────────────────────

	pub fn recommend(
		&self,
		query: &Query,
		encoder: Option<&dyn TextEncoder>,
	) -> Result<RecommendResponse, EngineError> {
		let qv = self.query_vector(query, encoder)?;
		let mut warnings = query.warnings.clone();
		warnings.extend(qv.warnings.iter().cloned());
		tracing::debug!(
			mode = query.mode.name(),
			seeds = qv.seed_rows.len(),
			expanded = qv.expanded.len(),
			"query vector built"
		);
		self.rank(
			&qv.vector,
			&qv.seed_rows,
			&query.constraints,
			&query.weights,
			&query.options,
			warnings,
		)
	}

	/// Rank against a caller-supplied query vector.
	pub fn recommend_vector(
		&self,
		vector: &[f32],
		constraints: &Constraints,
		weights: &ScoringWeights,
		options: &QueryOptions,
	) -> Result<RecommendResponse, EngineError> {
		let dim = self.artifacts.item_vectors.cols();
		if vector.len() != dim {
			return Err(EngineError::dimension("query vector", dim, vector.len()));
		}
		if vector.iter().all(|&x| x == 0.0) {
			return Err(EngineError::NoSignal);
		}
		self.rank(vector, &[], constraints, weights, options, constraints.validate()?)
	}

	fn rank(
		&self,
		vector: &[f32],
		exclude_rows: &[usize],
		constraints: &Constraints,
		weights: &ScoringWeights,
		options: &QueryOptions,
		mut warnings: Vec<String>,
	) -> Result<RecommendResponse, EngineError> {
		let excluded: HashSet<usize> = exclude_rows.iter().copied().collect();
		let rows: Vec<usize> = self
			.index
			.search(vector, options.top_n + excluded.len())
			.into_iter()
			.map(|n| n.row)
			.filter(|r| !excluded.contains(r))
			.take(options.top_n)
			.collect();

		let ctx = ScoringContext {
			catalog: &self.artifacts.catalog,
			item_vectors: &self.artifacts.item_vectors,
			tag_frequencies: &self.tag_frequencies,
			item_weights: &self.artifacts.item_weights,
		};
		let scored = score_candidates(&ctx, vector, &rows, constraints, weights);
		if scored.is_empty() {
			tracing::warn!(retrieved = rows.len(), "no candidates left after constraints");
			warnings.push("no results: no candidate satisfies the constraints".to_string());
			return Ok(RecommendResponse {
				recommendations: Vec::new(),
				metrics: Default::default(),
				candidate_count: 0,
				warnings,
			});
		}

		let relevance: Vec<f64> = scored.iter().map(|c| c.scores.final_score).collect();
		let vectors: Vec<&[f32]> = scored
			.iter()
			.map(|c| self.artifacts.item_vectors.row(c.row))
			.collect();
		let picked = mmr_select(&relevance, &vectors, options.k, options.lambda);

		let picked_vectors: Vec<&[f32]> = picked.iter().map(|&i| vectors[i]).collect();
		let novelty: Vec<f64> = picked.iter().map(|&i| scored[i].scores.novelty).collect();
		let metrics = diversity_metrics(&picked_vectors, &novelty);

		let catalog = &self.artifacts.catalog;
		let recommendations = picked
			.iter()
			.map(|&i| {
				let c = &scored[i];
				Recommendation {
					item_id: catalog.item_id(c.row),
					title: catalog.title(c.row).map(str::to_string),
					scores: c.scores,
				}
			})
			.collect();

		tracing::debug!(
			retrieved = rows.len(),
			candidates = scored.len(),
			returned = picked.len(),
			"recommendations ranked"
		);

		Ok(RecommendResponse {
			recommendations,
			metrics,
			candidate_count: scored.len(),
			warnings,
		})
	}

	// ── Neighbor spot checks ──────────────────────────────────────────────

	pub fn tag_neighbors(&self, tag: &str, k: usize) -> Result<Vec<TagNeighbor>, EngineError> {
		let vocab = &self.artifacts.vocab;
		let idx = vocab
			.resolve(tag)
			.ok_or_else(|| EngineError::InvalidQuery(format!("unknown tag '{tag}'")))?;
		let exclude: HashSet<usize> = [idx].into_iter().collect();
		Ok(nearest_tags(&self.artifacts.tag_vectors, self.artifacts.tag_vectors.row(idx), k, &exclude)
			.into_iter()
			.map(|(t, similarity)| TagNeighbor {
				tag: vocab.name(t).to_string(),
				similarity,
			})
			.collect())
	}

	pub fn item_neighbors(&self, item_id: ItemId, k: usize) -> Result<Vec<ItemNeighbor>, EngineError> {
		let catalog = &self.artifacts.catalog;
		let row = catalog
			.row_of(item_id)
			.ok_or_else(|| EngineError::InvalidQuery(format!("unknown game {item_id}")))?;
		let vectors = &self.artifacts.item_vectors;
		if vectors.is_zero_row(row) {
			return Ok(Vec::new());
		}
		let v = vectors.row(row);
		Ok(self
			.index
			.search(v, k + 1)
			.into_iter()
			.filter(|n| n.row != row)
			.take(k)
			.map(|n| ItemNeighbor {
				item_id: catalog.item_id(n.row),
				title: catalog.title(n.row).map(str::to_string),
				similarity: n.similarity,
			})
			.collect())
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::pipeline::{build_artifacts, PipelineConfig, PipelineInputs};
	use crate::query::QueryRequest;
	use crate::types::{CatalogItem, EngagementRecord, ItemAttributes};
	use serde_json::json;
	use std::collections::BTreeMap;

	pub(crate) fn sample_catalog() -> Vec<CatalogItem> {
		let rows: [(u64, &[&str], f64, &[&str]); 10] = [
			(1, &["horror", "atmospheric", "survival"], 19.99, &["Windows", "Linux"]),
			(2, &["horror", "survival", "zombies"], 9.99, &["Windows"]),
			(3, &["horror", "atmospheric", "psychological"], 14.99, &["Windows", "Linux"]),
			(4, &["horror", "zombies", "shooter"], 29.99, &["Windows"]),
			(5, &["puzzle", "casual", "relaxing"], 4.99, &["Windows", "Linux"]),
			(6, &["puzzle", "relaxing", "atmospheric"], 7.99, &["Linux"]),
			(7, &["puzzle", "casual", "family"], 2.99, &["Windows"]),
			(8, &["casual", "family", "relaxing"], 0.0, &["Windows", "Linux"]),
			(9, &["shooter", "multiplayer", "zombies"], 24.99, &["Windows"]),
			(10, &["shooter", "multiplayer", "competitive"], 0.0, &["Windows", "Linux"]),
		];
		rows.iter()
			.map(|(id, tags, price, platforms)| CatalogItem {
				id: *id,
				title: Some(format!("Game {id}")),
				tags: tags.iter().map(|t| t.to_string()).collect(),
				attributes: ItemAttributes {
					price: Some(*price),
					platforms: platforms.iter().map(|p| p.to_string()).collect(),
					languages: vec!["English".into()],
					age_rating: Some(if *id <= 4 { 18 } else { 7 }),
				},
			})
			.collect()
	}

	pub(crate) fn sample_engagement() -> Vec<EngagementRecord> {
		(1..=10u64)
			.flat_map(|id| {
				(0..5u64).map(move |u| EngagementRecord {
					item_id: id,
					user_id: format!("user{u}"),
					recommended: (id + u) % 4 != 0,
					duration: ((u + 1) * (id % 3 + 1)) as f64 * 10.0,
				})
			})
			.collect()
	}

	pub(crate) fn sample_artifacts() -> Artifacts {
		let items = sample_catalog();
		let engagement = sample_engagement();
		let (artifacts, _) = build_artifacts(
			&PipelineInputs {
				items: &items,
				engagement: &engagement,
				aliases: &BTreeMap::new(),
			},
			&PipelineConfig {
				dim: 6,
				..Default::default()
			},
			None,
		)
		.unwrap();
		artifacts
	}

	fn store() -> VectorStore {
		let config = IndexConfig {
			kind: IndexKind::Exact,
			..Default::default()
		};
		VectorStore::new(sample_artifacts(), &config).unwrap()
	}

	fn query(v: serde_json::Value) -> Query {
		Query::try_from(serde_json::from_value::<QueryRequest>(v).unwrap()).unwrap()
	}

	#[test]
	fn info_reports_shapes() {
		let info = store().info();
		assert_eq!(info.items, 10);
		assert_eq!(info.dim, 6);
		assert_eq!(info.indexed_items, 10);
		assert!(!info.aligned);
		assert_eq!(info.index, IndexKind::Exact);
	}

	#[test]
	fn similar_excludes_seeds_and_respects_k() {
		let s = store();
		let resp = s
			.recommend(&query(json!({"mode": "similar", "games": [1], "options": {"k": 3}})), None)
			.unwrap();
		assert_eq!(resp.recommendations.len(), 3);
		assert!(resp.recommendations.iter().all(|r| r.item_id != 1));
		let ids: HashSet<ItemId> = resp.recommendations.iter().map(|r| r.item_id).collect();
		assert_eq!(ids.len(), 3);
		assert_eq!(resp.candidate_count, 9);
	}

	#[test]
	fn scores_stay_in_unit_range() {
		let s = store();
		let resp = s
			.recommend(
				&query(json!({"mode": "vibe", "target_tags": [{"name": "horror"}], "options": {"k": 10}})),
				None,
			)
			.unwrap();
		assert_eq!(resp.recommendations.len(), 10);
		for r in &resp.recommendations {
			let sc = r.scores;
			for v in [sc.tag_match, sc.novelty, sc.recency, sc.popularity, sc.final_score] {
				assert!((0.0..=1.0).contains(&v), "{v} out of range");
			}
		}
		assert!(resp.recommendations.iter().any(|r| r.scores.final_score == 1.0));
	}

	#[test]
	fn pure_relevance_leads_with_a_horror_game() {
		let s = store();
		let resp = s
			.recommend(
				&query(json!({
					"mode": "vibe",
					"target_tags": [{"name": "horror"}],
					"weights": {"tag_match": 1.0, "novelty": 0.0, "recency": 0.0, "popularity": 0.0},
					"options": {"k": 3, "lambda": 1.0}
				})),
				None,
			)
			.unwrap();
		assert!(resp.recommendations[0].item_id <= 4);
	}

	#[test]
	fn constraints_filter_and_empty_is_reported() {
		let s = store();
		let resp = s
			.recommend(
				&query(json!({
					"mode": "vibe",
					"target_tags": [{"name": "puzzle"}],
					"constraints": {"platform": "linux", "price_max": 10.0}
				})),
				None,
			)
			.unwrap();
		assert!(!resp.recommendations.is_empty());
		assert!(resp.recommendations.iter().all(|r| [5, 6, 8, 10].contains(&r.item_id)));

		let resp = s
			.recommend(
				&query(json!({
					"mode": "vibe",
					"target_tags": [{"name": "puzzle"}],
					"constraints": {"price_max": -1.0}
				})),
				None,
			)
			.unwrap();
		assert!(resp.recommendations.is_empty());
		assert_eq!(resp.candidate_count, 0);
		assert!(resp.warnings.iter().any(|w| w.contains("no results")));
	}

	#[test]
	fn unknown_seeds_only_is_fatal() {
		let s = store();
		let err = s
			.recommend(&query(json!({"mode": "similar", "games": [404]})), None)
			.unwrap_err();
		assert_eq!(err.code(), "TAGVIBE_NO_SEED_ITEMS");
	}

	#[test]
	fn raw_vector_queries_check_dimension() {
		let s = store();
		let err = s
			.recommend_vector(&[1.0, 0.0], &Constraints::default(), &ScoringWeights::default(), &QueryOptions::default())
			.unwrap_err();
		assert!(matches!(err, EngineError::DimensionMismatch { .. }));

		let v = s.artifacts().item_vectors.row(0).to_vec();
		let resp = s
			.recommend_vector(&v, &Constraints::default(), &ScoringWeights::default(), &QueryOptions::default())
			.unwrap();
		assert_eq!(resp.recommendations.len(), 10);
	}

	#[test]
	fn neighbor_spot_checks() {
		let s = store();
		let tags = s.tag_neighbors("Horror", 3).unwrap();
		assert_eq!(tags.len(), 3);
		assert!(tags.iter().all(|t| t.tag != "horror"));

		let items = s.item_neighbors(1, 4).unwrap();
		assert_eq!(items.len(), 4);
		assert!(items.iter().all(|n| n.item_id != 1));
		assert!(items.windows(2).all(|w| w[0].similarity >= w[1].similarity));

		assert!(s.tag_neighbors("no-such-tag-anywhere", 3).is_err());
		assert!(s.item_neighbors(404, 3).is_err());
	}
}
