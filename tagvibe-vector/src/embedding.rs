// ---------------------------------------------------------------------------
// Tag embeddings via truncated SVD
// ---------------------------------------------------------------------------
//
// The PPMI matrix is factored as U·Σ·Vᵀ and each tag is represented by its
// row of U_k·Σ_k (the projection of its PPMI row onto the top-k right
// singular vectors). When the vocabulary is smaller than D the remaining
// columns are zero so every artifact shares the same dimension.
// ---------------------------------------------------------------------------

use nalgebra::DMatrix;
use serde::Serialize;

use crate::error::EngineError;
use crate::sparse::CsrMatrix;
use crate::vectors::EmbeddingMatrix;

/// Below this cumulative explained variance the embedding is flagged.
pub const LOW_EXPLAINED_VARIANCE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingReport {
	pub dim: usize,
	pub components: usize,
	pub singular_values: Vec<f64>,
	pub explained_variance_ratio: Vec<f64>,
	pub total_explained_variance: f64,
	pub low_variance: bool,
}

/// Top-`dim` truncated SVD embedding, one row per tag.
pub fn embed_tags(ppmi: &CsrMatrix, dim: usize) -> Result<(EmbeddingMatrix, EmbeddingReport), EngineError> {
	if dim == 0 {
		return Err(EngineError::InvalidParameter("embedding dimension must be > 0".into()));
	}
	let n = ppmi.n_rows();
	if n == 0 {
		return Err(EngineError::EmptyInput("tag vocabulary is empty".into()));
	}

	let dense = ppmi.to_dense();
	let svd = dense.clone().svd(true, false);
	let u = svd
		.u
		.ok_or_else(|| EngineError::Numerical("SVD failed to compute U".into()))?;
	let sigma = &svd.singular_values;

	let mut order: Vec<usize> = (0..sigma.len()).collect();
	order.sort_by(|&a, &b| sigma[b].total_cmp(&sigma[a]));

	let k = dim.min(order.len());
	if k < dim {
		tracing::warn!(
			requested = dim,
			available = k,
			"fewer components than requested; padding with zeros"
		);
	}

	let mut out = EmbeddingMatrix::zeros(n, dim);
	let mut singular_values = Vec::with_capacity(k);
	for (j, &c) in order.iter().take(k).enumerate() {
		let s = sigma[c];
		singular_values.push(s);
		let sign = column_sign(&u, c);
		for i in 0..n {
			out.row_mut(i)[j] = (sign * u[(i, c)] * s) as f32;
		}
	}

	let explained_variance_ratio = explained_variance(&dense, &out, k);
	let total_explained_variance: f64 = explained_variance_ratio.iter().sum();
	let low_variance = total_explained_variance < LOW_EXPLAINED_VARIANCE;
	if low_variance {
		tracing::warn!(
			total_explained_variance,
			"tag embedding explains little of the PPMI variance"
		);
	}
	tracing::info!(
		tags = n,
		dim,
		total_explained_variance,
		"tag embeddings learned"
	);

	Ok((
		out,
		EmbeddingReport {
			dim,
			components: k,
			singular_values,
			explained_variance_ratio,
			total_explained_variance,
			low_variance,
		},
	))
}

/// Sign that makes the largest-magnitude entry of column `c` positive, so
/// repeated runs produce identical embeddings.
fn column_sign(u: &DMatrix<f64>, c: usize) -> f64 {
	let col = u.column(c);
	let mut best = 0.0f64;
	for &v in col.iter() {
		if v.abs() > best.abs() {
			best = v;
		}
	}
	if best < 0.0 {
		-1.0
	} else {
		1.0
	}
}

/// Variance of each embedding column over the total column variance of the
/// input matrix.
fn explained_variance(input: &DMatrix<f64>, embedded: &EmbeddingMatrix, k: usize) -> Vec<f64> {
	let total: f64 = (0..input.ncols())
		.map(|c| variance(&input.column(c).iter().copied().collect::<Vec<_>>()))
		.sum();
	if total <= 0.0 {
		return vec![0.0; k];
	}
	(0..k)
		.map(|j| {
			let column: Vec<f64> = embedded.iter_rows().map(|row| row[j] as f64).collect();
			variance(&column) / total
		})
		.collect()
}

fn variance(values: &[f64]) -> f64 {
	if values.is_empty() {
		return 0.0;
	}
	let n = values.len() as f64;
	let mean = values.iter().sum::<f64>() / n;
	values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ppmi::build_ppmi;

	fn ppmi_fixture() -> CsrMatrix {
		let incidence = CsrMatrix::from_rows(
			4,
			vec![
				vec![(0, 1.0), (1, 1.0)],
				vec![(0, 1.0), (1, 1.0)],
				vec![(2, 1.0), (3, 1.0)],
				vec![(2, 1.0), (3, 1.0)],
				vec![(0, 1.0), (3, 1.0)],
			],
		);
		build_ppmi(&incidence, &[1.0, 2.0, 1.0, 2.0, 0.5]).unwrap().0
	}

	#[test]
	fn embedding_has_one_row_per_tag() {
		let (m, report) = embed_tags(&ppmi_fixture(), 2).unwrap();
		assert_eq!(m.rows(), 4);
		assert_eq!(m.cols(), 2);
		assert_eq!(report.components, 2);
		assert!(report.singular_values[0] >= report.singular_values[1]);
	}

	#[test]
	fn dimension_larger_than_vocabulary_pads_zeros() {
		let (m, report) = embed_tags(&ppmi_fixture(), 6).unwrap();
		assert_eq!(m.cols(), 6);
		assert_eq!(report.components, 4);
		for row in m.iter_rows() {
			assert_eq!(row[4], 0.0);
			assert_eq!(row[5], 0.0);
		}
	}

	#[test]
	fn full_rank_explains_all_variance() {
		let (_, report) = embed_tags(&ppmi_fixture(), 4).unwrap();
		assert!((report.total_explained_variance - 1.0).abs() < 1e-6);
		assert!(!report.low_variance);
	}

	#[test]
	fn embedding_is_deterministic() {
		let a = embed_tags(&ppmi_fixture(), 3).unwrap().0;
		let b = embed_tags(&ppmi_fixture(), 3).unwrap().0;
		assert_eq!(a, b);
	}

	#[test]
	fn zero_dimension_is_rejected() {
		assert!(embed_tags(&ppmi_fixture(), 0).is_err());
	}
}
