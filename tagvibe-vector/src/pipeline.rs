// ---------------------------------------------------------------------------
// Offline build pipeline
// ---------------------------------------------------------------------------
//
// A straight line of pure stages, each consuming the previous stage's
// output and producing new values:
//
//   catalog + aliases  -> vocabulary, incidence X
//   engagement         -> per-item quality weights w
//   X, w               -> PPMI -> truncated SVD tag vectors
//   X, w               -> ridge tag effects β
//   X, tag vectors, β  -> item vectors
//   tag vectors        -> text alignment W (when an encoder is available)
//
// Nothing published by an earlier stage is mutated later.
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::alignment::{align_with_encoder, AlignmentReport, TextAlignment, DEFAULT_ALIGNMENT_LAMBDA};
use crate::diagnostics::{hubness, HubnessReport, SummaryStats};
use crate::effects::{estimate_effects, EffectReport};
use crate::embedding::{embed_tags, EmbeddingReport};
use crate::encoder::TextEncoder;
use crate::error::EngineError;
use crate::persistence::FORMAT_VERSION;
use crate::ppmi::{build_ppmi, PpmiReport};
use crate::quality::{align_weights, gamma_normalize, item_weights, score_records, QualityConfig};
use crate::synthesis::{synthesize, SynthesisParams, SynthesisReport};
use crate::types::{CatalogItem, EngagementRecord};
use crate::vectors::EmbeddingMatrix;
use crate::vocab::{default_aliases, Catalog, TagVocabulary};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
	/// Tag/item embedding dimension D.
	pub dim: usize,
	pub quality: QualityConfig,
	/// Ridge α for the tag effect regression.
	pub effect_alpha: f64,
	/// Ridge λ for the text alignment.
	pub alignment_lambda: f64,
	/// Weight for catalog items without engagement.
	pub default_weight: f64,
	/// Min-max + gamma normalization of item weights. `None` keeps raw means.
	#[serde(default)]
	pub weight_gamma: Option<f64>,
	pub synthesis: SynthesisParams,
	/// Neighbors per vector in the hubness diagnostic.
	pub hubness_k: usize,
	/// Row cap above which the all-pairs hubness diagnostic is skipped.
	pub hubness_max_rows: usize,
}

impl Default for PipelineConfig {
	fn default() -> Self {
		Self {
			dim: 128,
			quality: QualityConfig::default(),
			effect_alpha: 1.0,
			alignment_lambda: DEFAULT_ALIGNMENT_LAMBDA,
			default_weight: 0.5,
			weight_gamma: None,
			synthesis: SynthesisParams::default(),
			hubness_k: 10,
			hubness_max_rows: 5_000,
		}
	}
}

impl PipelineConfig {
	pub fn validate(&self) -> Result<(), EngineError> {
		if self.dim == 0 {
			return Err(EngineError::InvalidParameter("dim must be > 0".into()));
		}
		if !(self.effect_alpha >= 0.0) {
			return Err(EngineError::InvalidParameter(format!(
				"effect alpha must be >= 0, got {}",
				self.effect_alpha
			)));
		}
		if !(self.alignment_lambda >= 0.0) {
			return Err(EngineError::InvalidParameter(format!(
				"alignment lambda must be >= 0, got {}",
				self.alignment_lambda
			)));
		}
		if !self.default_weight.is_finite() {
			return Err(EngineError::InvalidParameter("default weight must be finite".into()));
		}
		if let Some(gamma) = self.weight_gamma {
			if !(gamma.is_finite() && gamma > 0.0) {
				return Err(EngineError::InvalidParameter(format!(
					"weight gamma must be positive, got {gamma}"
				)));
			}
		}
		self.synthesis.validate()
	}
}

// ---------------------------------------------------------------------------
// Inputs / outputs
// ---------------------------------------------------------------------------

pub struct PipelineInputs<'a> {
	pub items: &'a [CatalogItem],
	pub engagement: &'a [EngagementRecord],
	/// Extra aliases layered over the built-in ones.
	pub aliases: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
	pub format_version: u32,
	pub generation_id: String,
	pub created_at: String,
	pub dim: usize,
	pub items: usize,
	pub tags: usize,
	#[serde(default)]
	pub text_dim: Option<usize>,
	pub config: PipelineConfig,
}

/// Everything the serving side loads.
#[derive(Debug, Clone)]
pub struct Artifacts {
	pub manifest: Manifest,
	pub vocab: TagVocabulary,
	pub catalog: Catalog,
	/// Quality weight per catalog row.
	pub item_weights: Vec<f64>,
	pub tag_vectors: EmbeddingMatrix,
	pub item_vectors: EmbeddingMatrix,
	pub tag_effects: Vec<f64>,
	pub alignment: Option<TextAlignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
	pub records: usize,
	pub scored_items: usize,
	pub defaulted_items: usize,
	pub record_scores: SummaryStats,
	pub item_weights: SummaryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
	pub generation_id: String,
	pub items: usize,
	pub tags: usize,
	pub tagless_items: usize,
	pub quality: QualityReport,
	pub ppmi: PpmiReport,
	pub embedding: EmbeddingReport,
	pub effects: EffectReport,
	pub synthesis: SynthesisReport,
	pub alignment: Option<AlignmentReport>,
	pub tag_hubness: Option<HubnessReport>,
	pub item_hubness: Option<HubnessReport>,
	pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

pub fn build_artifacts(
	inputs: &PipelineInputs<'_>,
	config: &PipelineConfig,
	encoder: Option<&dyn TextEncoder>,
) -> Result<(Artifacts, BuildReport), EngineError> {
	config.validate()?;
	if inputs.items.is_empty() {
		return Err(EngineError::EmptyInput("catalog has no items".into()));
	}
	let mut warnings = Vec::new();

	// Vocabulary + incidence
	let mut aliases = default_aliases();
	aliases.extend(inputs.aliases.iter().map(|(k, v)| (k.clone(), v.clone())));
	let vocab = TagVocabulary::from_catalog(inputs.items, &aliases);
	if vocab.is_empty() {
		return Err(EngineError::EmptyInput("catalog items carry no tags".into()));
	}
	let catalog = Catalog::build(inputs.items, &vocab);
	let incidence = catalog.incidence();
	let tagless_items = (0..catalog.len()).filter(|&r| catalog.tag_count(r) == 0).count();
	if tagless_items > 0 {
		warnings.push(format!("{tagless_items} item(s) have no tags and get zero vectors"));
	}
	tracing::info!(items = catalog.len(), tags = vocab.len(), "catalog assembled");

	// Quality weights
	let scores = score_records(inputs.engagement, &config.quality);
	let by_item = item_weights(&scores);
	let mut aligned = align_weights(catalog.item_ids(), &by_item, config.default_weight);
	if let Some(gamma) = config.weight_gamma {
		aligned.values = gamma_normalize(&aligned.values, gamma);
	}
	let defaulted_items = aligned.observed.iter().filter(|o| !**o).count();
	if defaulted_items > 0 {
		warnings.push(format!(
			"{defaulted_items} item(s) without engagement use default weight {}",
			config.default_weight
		));
	}
	let record_values: Vec<f64> = scores.iter().map(|s| s.score).collect();
	let quality = QualityReport {
		records: scores.len(),
		scored_items: by_item.len(),
		defaulted_items,
		record_scores: SummaryStats::of(&record_values),
		item_weights: SummaryStats::of(&aligned.values),
	};
	tracing::info!(records = quality.records, scored_items = quality.scored_items, "quality weights computed");

	// Tag embedding
	let (ppmi_matrix, ppmi_report) = build_ppmi(incidence, &aligned.values)?;
	let (tag_vectors, embedding_report) = embed_tags(&ppmi_matrix, config.dim)?;
	if embedding_report.low_variance {
		warnings.push(format!(
			"tag embedding explains only {:.1}% of PPMI variance",
			embedding_report.total_explained_variance * 100.0
		));
	}

	// Tag effects
	let (effects, effect_report) =
		estimate_effects(incidence, &aligned, &vocab, config.effect_alpha)?;

	// Item vectors
	let (item_vectors, synthesis_report) =
		synthesize(incidence, &tag_vectors, &effects.beta, &config.synthesis)?;

	// Text alignment
	let (alignment, alignment_report) = match encoder {
		Some(encoder) => {
			let (a, r) = align_with_encoder(vocab.names(), &tag_vectors, encoder, config.alignment_lambda)?;
			(Some(a), Some(r))
		}
		None => {
			tracing::warn!("no text encoder configured; skipping text alignment");
			warnings.push("text alignment skipped: no encoder configured".to_string());
			(None, None)
		}
	};

	// Diagnostics
	let tag_hubness = if tag_vectors.rows() <= config.hubness_max_rows {
		hubness(&tag_vectors, config.hubness_k)
	} else {
		None
	};
	let item_hubness = if item_vectors.rows() <= config.hubness_max_rows {
		hubness(&item_vectors, config.hubness_k)
	} else {
		None
	};

	let manifest = Manifest {
		format_version: FORMAT_VERSION,
		generation_id: uuid::Uuid::new_v4().to_string(),
		created_at: chrono::Utc::now().to_rfc3339(),
		dim: config.dim,
		items: catalog.len(),
		tags: vocab.len(),
		text_dim: alignment.as_ref().map(|a| a.text_dim()),
		config: config.clone(),
	};

	let report = BuildReport {
		generation_id: manifest.generation_id.clone(),
		items: catalog.len(),
		tags: vocab.len(),
		tagless_items,
		quality,
		ppmi: ppmi_report,
		embedding: embedding_report,
		effects: effect_report,
		synthesis: synthesis_report,
		alignment: alignment_report,
		tag_hubness,
		item_hubness,
		warnings,
	};

	tracing::info!(generation = %manifest.generation_id, dim = config.dim, "artifacts built");

	Ok((
		Artifacts {
			manifest,
			item_weights: aligned.values,
			tag_effects: effects.beta,
			vocab,
			catalog,
			tag_vectors,
			item_vectors,
			alignment,
		},
		report,
	))
}
