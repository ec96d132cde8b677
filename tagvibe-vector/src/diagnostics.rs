// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------
//
// Summary statistics shared by the build stages, plus hubness analysis: how
// often each vector appears in other vectors' k-nearest-neighbor lists. A
// healthy space spreads occurrences evenly; hubs show up as a long tail.
// ---------------------------------------------------------------------------

use serde::Serialize;

use crate::vectors::{cosine_similarity, EmbeddingMatrix};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SummaryStats {
	pub count: usize,
	pub min: f64,
	pub max: f64,
	pub mean: f64,
	pub std: f64,
}

impl SummaryStats {
	/// Population statistics. Empty input yields all zeros.
	pub fn of(values: &[f64]) -> Self {
		if values.is_empty() {
			return Self::default();
		}
		let n = values.len() as f64;
		let mean = values.iter().sum::<f64>() / n;
		let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
		Self {
			count: values.len(),
			min: values.iter().copied().fold(f64::INFINITY, f64::min),
			max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
			mean,
			std: var.sqrt(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubnessReport {
	pub k: usize,
	pub vectors: usize,
	pub occurrences: SummaryStats,
	/// Shannon entropy of the k-occurrence distribution, normalized to [0, 1].
	pub normalized_entropy: f64,
	/// Rows that never appear in any neighbor list.
	pub antihubs: usize,
}

/// k-occurrence statistics over the non-zero rows of `vectors`. Exact
/// all-pairs cosine, so callers cap the row count.
pub fn hubness(vectors: &EmbeddingMatrix, k: usize) -> Option<HubnessReport> {
	let rows: Vec<usize> = (0..vectors.rows()).filter(|&r| !vectors.is_zero_row(r)).collect();
	if rows.len() < 2 || k == 0 {
		return None;
	}
	let k = k.min(rows.len() - 1);

	let mut counts = vec![0usize; rows.len()];
	for (i, &a) in rows.iter().enumerate() {
		let mut sims: Vec<(usize, f64)> = rows
			.iter()
			.enumerate()
			.filter(|&(j, _)| j != i)
			.map(|(j, &b)| (j, cosine_similarity(vectors.row(a), vectors.row(b))))
			.collect();
		sims.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
		for &(j, _) in sims.iter().take(k) {
			counts[j] += 1;
		}
	}

	let values: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
	let total: f64 = values.iter().sum();
	let entropy: f64 = values
		.iter()
		.filter(|&&c| c > 0.0)
		.map(|&c| {
			let p = c / total;
			-p * p.ln()
		})
		.sum();
	let max_entropy = (rows.len() as f64).ln();

	Some(HubnessReport {
		k,
		vectors: rows.len(),
		occurrences: SummaryStats::of(&values),
		normalized_entropy: if max_entropy > 0.0 { entropy / max_entropy } else { 0.0 },
		antihubs: counts.iter().filter(|&&c| c == 0).count(),
	})
}
