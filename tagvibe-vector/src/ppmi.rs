// ---------------------------------------------------------------------------
// Weighted co-occurrence and positive PMI
// ---------------------------------------------------------------------------
//
// Each item row of the incidence matrix is scaled by sqrt(weight), so the
// tag x tag co-occurrence C = XwᵀXw counts every pair of tags on an item with
// that item's quality weight. PMI keeps only positive associations.
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::EngineError;
use crate::sparse::CsrMatrix;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PpmiReport {
	pub tags: usize,
	pub cooccurrence_entries: usize,
	pub ppmi_entries: usize,
	pub density: f64,
	pub max_value: f64,
	pub mean_value: f64,
	/// Tags whose weighted marginal is zero.
	pub isolated_tags: usize,
}

/// `C = (diag(√w)·X)ᵀ (diag(√w)·X)` accumulated row by row.
pub fn weighted_cooccurrence(incidence: &CsrMatrix, weights: &[f64]) -> Result<CsrMatrix, EngineError> {
	if weights.len() != incidence.n_rows() {
		return Err(EngineError::dimension(
			"item weights",
			incidence.n_rows(),
			weights.len(),
		));
	}

	let negative = weights.iter().filter(|w| **w < 0.0).count();
	if negative > 0 {
		tracing::warn!(negative, "negative item weights clamped to zero");
	}

	let mut entries: BTreeMap<(usize, usize), f64> = BTreeMap::new();
	for (row, &w) in weights.iter().enumerate() {
		let w = w.max(0.0);
		if w == 0.0 {
			continue;
		}
		let cols = incidence.row_indices(row);
		let vals = incidence.row_values(row);
		for (i, &a) in cols.iter().enumerate() {
			for (j, &b) in cols.iter().enumerate() {
				// √w·x_a · √w·x_b
				*entries.entry((a, b)).or_insert(0.0) += w * vals[i] * vals[j];
			}
		}
	}

	let n = incidence.n_cols();
	Ok(CsrMatrix::from_coo(n, n, &entries))
}

/// Positive PMI of a co-occurrence matrix. Entries with zero count or zero
/// marginals are skipped; non-positive PMI is dropped.
pub fn ppmi(cooc: &CsrMatrix) -> CsrMatrix {
	let n_rows = cooc.n_rows();
	let n_cols = cooc.n_cols();

	let mut row_sums = vec![0.0; n_rows];
	let mut col_sums = vec![0.0; n_cols];
	for r in 0..n_rows {
		for (&c, &v) in cooc.row_indices(r).iter().zip(cooc.row_values(r)) {
			row_sums[r] += v;
			col_sums[c] += v;
		}
	}
	let total: f64 = row_sums.iter().sum();

	let mut rows = Vec::with_capacity(n_rows);
	for r in 0..n_rows {
		let mut row = Vec::new();
		if total > 0.0 && row_sums[r] > 0.0 {
			for (&c, &v) in cooc.row_indices(r).iter().zip(cooc.row_values(r)) {
				if v <= 0.0 || col_sums[c] <= 0.0 {
					continue;
				}
				let pmi = (v * total / (row_sums[r] * col_sums[c])).ln();
				if pmi > 0.0 && pmi.is_finite() {
					row.push((c, pmi));
				}
			}
		}
		rows.push(row);
	}

	CsrMatrix::from_rows(n_cols, rows)
}

/// Co-occurrence followed by PPMI, with diagnostics.
pub fn build_ppmi(incidence: &CsrMatrix, weights: &[f64]) -> Result<(CsrMatrix, PpmiReport), EngineError> {
	let cooc = weighted_cooccurrence(incidence, weights)?;
	let matrix = ppmi(&cooc);

	let values = matrix.values();
	let max_value = values.iter().copied().fold(0.0, f64::max);
	let mean_value = if values.is_empty() {
		0.0
	} else {
		values.iter().sum::<f64>() / values.len() as f64
	};
	let isolated_tags = (0..cooc.n_rows()).filter(|&r| cooc.row_nnz(r) == 0).count();

	let report = PpmiReport {
		tags: matrix.n_rows(),
		cooccurrence_entries: cooc.nnz(),
		ppmi_entries: matrix.nnz(),
		density: matrix.density(),
		max_value,
		mean_value,
		isolated_tags,
	};
	tracing::info!(
		tags = report.tags,
		entries = report.ppmi_entries,
		density = report.density,
		"PPMI matrix built"
	);
	if isolated_tags > 0 {
		tracing::warn!(isolated_tags, "tags with no weighted co-occurrence");
	}

	Ok((matrix, report))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn incidence(rows: &[&[usize]], n_tags: usize) -> CsrMatrix {
		CsrMatrix::from_rows(
			n_tags,
			rows.iter()
				.map(|r| r.iter().map(|&c| (c, 1.0)).collect())
				.collect(),
		)
	}

	#[test]
	fn cooccurrence_is_weighted_and_symmetric() {
		let x = incidence(&[&[0, 1], &[1, 2]], 3);
		let c = weighted_cooccurrence(&x, &[2.0, 3.0]).unwrap();
		assert_eq!(c.get(0, 1), 2.0);
		assert_eq!(c.get(1, 0), 2.0);
		assert_eq!(c.get(1, 1), 5.0);
		assert_eq!(c.get(1, 2), 3.0);
		assert_eq!(c.get(0, 2), 0.0);
	}

	#[test]
	fn weight_length_mismatch_is_rejected() {
		let x = incidence(&[&[0]], 1);
		let err = weighted_cooccurrence(&x, &[1.0, 2.0]).unwrap_err();
		assert!(matches!(err, EngineError::DimensionMismatch { .. }));
	}

	#[test]
	fn ppmi_is_non_negative() {
		let x = incidence(&[&[0, 1], &[0, 1], &[2], &[0, 2], &[1, 2, 3]], 4);
		let (m, report) = build_ppmi(&x, &[1.0, 0.5, 2.0, 1.0, 0.25]).unwrap();
		assert!(m.values().iter().all(|&v| v > 0.0));
		assert_eq!(report.ppmi_entries, m.nnz());
		assert!(report.max_value >= report.mean_value);
	}

	#[test]
	fn zero_weight_tags_contribute_nothing() {
		let x = incidence(&[&[0, 1], &[2]], 3);
		let (m, report) = build_ppmi(&x, &[1.0, 0.0]).unwrap();
		assert_eq!(m.row_nnz(2), 0);
		assert_eq!(report.isolated_tags, 1);
	}

	#[test]
	fn independent_pair_has_no_entry() {
		// Every item carries both tags: PMI of (0,1) is exactly zero.
		let x = incidence(&[&[0, 1], &[0, 1]], 2);
		let m = ppmi(&weighted_cooccurrence(&x, &[1.0, 1.0]).unwrap());
		assert_eq!(m.nnz(), 0);
	}
}
