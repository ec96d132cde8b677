// ---------------------------------------------------------------------------
// Text-to-tag-space alignment
// ---------------------------------------------------------------------------
//
// Every tag gets a short synthetic sentence which is text-encoded. A ridge
// model without intercept maps those text embeddings onto the tag vectors,
// giving W (text-dim x D). Free-text phrases are projected through W into
// the shared tag/item space at query time.
// ---------------------------------------------------------------------------

use nalgebra::DMatrix;
use serde::Serialize;

use crate::encoder::TextEncoder;
use crate::error::EngineError;
use crate::ridge::fit_ridge;
use crate::vectors::EmbeddingMatrix;

pub const DEFAULT_ALIGNMENT_LAMBDA: f64 = 1e-2;

/// Sentence used to embed a tag. Purely alphabetic tags (word separators
/// allowed) read "This is a {tag} game"; anything else is its de-separated
/// name.
pub fn tag_sentence(tag: &str) -> String {
	let spaced = tag.replace(['-', '_'], " ");
	let alphabetic = !spaced.trim().is_empty()
		&& spaced.chars().all(|c| c.is_alphabetic() || c == ' ');
	if alphabetic {
		format!("This is a {} game", spaced)
	} else {
		spaced
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentReport {
	pub tags: usize,
	pub text_dim: usize,
	pub dim: usize,
	pub lambda: f64,
	pub r2: f64,
}

/// Projection from text-embedding space into tag space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextAlignment {
	/// text-dim rows x D columns
	weights: EmbeddingMatrix,
}

impl TextAlignment {
	pub fn from_matrix(weights: EmbeddingMatrix) -> Self {
		Self { weights }
	}

	pub fn matrix(&self) -> &EmbeddingMatrix {
		&self.weights
	}

	pub fn text_dim(&self) -> usize {
		self.weights.rows()
	}

	pub fn dim(&self) -> usize {
		self.weights.cols()
	}

	/// `eᵀW` for one phrase embedding.
	pub fn project(&self, embedding: &[f32]) -> Result<Vec<f64>, EngineError> {
		if embedding.len() != self.text_dim() {
			return Err(EngineError::dimension(
				"phrase embedding",
				self.text_dim(),
				embedding.len(),
			));
		}
		let mut out = vec![0.0; self.dim()];
		for (i, &e) in embedding.iter().enumerate() {
			crate::vectors::add_scaled(&mut out, self.weights.row(i), e as f64);
		}
		Ok(out)
	}
}

/// Fit W from precomputed sentence embeddings (one per tag, in column order).
pub fn fit_alignment(
	text_embeddings: &[Vec<f32>],
	tag_vectors: &EmbeddingMatrix,
	lambda: f64,
) -> Result<(TextAlignment, AlignmentReport), EngineError> {
	if text_embeddings.len() != tag_vectors.rows() {
		return Err(EngineError::dimension(
			"tag sentence embeddings",
			tag_vectors.rows(),
			text_embeddings.len(),
		));
	}
	let text_dim = text_embeddings.first().map_or(0, |e| e.len());
	if text_dim == 0 {
		return Err(EngineError::EmptyInput("no tag sentence embeddings".into()));
	}
	if let Some(bad) = text_embeddings.iter().find(|e| e.len() != text_dim) {
		return Err(EngineError::dimension("tag sentence embedding", text_dim, bad.len()));
	}

	let n = text_embeddings.len();
	let dim = tag_vectors.cols();
	let t = DMatrix::from_fn(n, text_dim, |i, j| text_embeddings[i][j] as f64);
	let y = DMatrix::from_fn(n, dim, |i, j| tag_vectors.row(i)[j] as f64);

	let fit = fit_ridge(&t, &y, lambda, false)?;

	let mut weights = EmbeddingMatrix::zeros(text_dim, dim);
	for i in 0..text_dim {
		let row: Vec<f64> = fit.coefficients.row(i).iter().copied().collect();
		weights.set_row(i, &row);
	}

	tracing::info!(tags = n, text_dim, dim, r2 = fit.r2, "text alignment fitted");

	Ok((
		TextAlignment { weights },
		AlignmentReport {
			tags: n,
			text_dim,
			dim,
			lambda,
			r2: fit.r2,
		},
	))
}

/// Encode the tag sentences and fit W.
pub fn align_with_encoder(
	tag_names: &[String],
	tag_vectors: &EmbeddingMatrix,
	encoder: &dyn TextEncoder,
	lambda: f64,
) -> Result<(TextAlignment, AlignmentReport), EngineError> {
	let sentences: Vec<String> = tag_names.iter().map(|t| tag_sentence(t)).collect();
	let embeddings = encoder.encode(&sentences)?;
	fit_alignment(&embeddings, tag_vectors, lambda)
}
