// ---------------------------------------------------------------------------
// Tag effects
// ---------------------------------------------------------------------------
//
// Regresses item quality weight on the item x tag incidence. Tag columns are
// divided by their standard deviation (no centering, so the sparse 0/1
// structure keeps its meaning) and a ridge model with intercept is fit. The
// coefficient of each scaled column is that tag's effect β.
// ---------------------------------------------------------------------------

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::diagnostics::SummaryStats;
use crate::error::EngineError;
use crate::quality::AlignedWeights;
use crate::ridge::fit_ridge;
use crate::sparse::CsrMatrix;
use crate::vocab::TagVocabulary;

/// Tags listed at each end of the effect ranking.
const EXTREME_TAGS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FitAssessment {
	HighOverfittingRisk,
	ModerateOverfittingRisk,
	GoodFit,
	PoorFit,
}

impl FitAssessment {
	pub fn from_r2(r2: f64) -> Self {
		if r2 > 0.9 {
			Self::HighOverfittingRisk
		} else if r2 > 0.7 {
			Self::ModerateOverfittingRisk
		} else if r2 > 0.5 {
			Self::GoodFit
		} else {
			Self::PoorFit
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagEffects {
	pub beta: Vec<f64>,
	pub intercept: f64,
	pub r2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagEffect {
	pub tag: String,
	pub beta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectReport {
	pub samples: usize,
	pub alpha: f64,
	pub r2: f64,
	pub intercept: f64,
	pub assessment: FitAssessment,
	pub coefficients: SummaryStats,
	pub target: SummaryStats,
	pub top_tags: Vec<TagEffect>,
	pub bottom_tags: Vec<TagEffect>,
}

/// Fit tag effects on the rows whose weight was observed from engagement.
pub fn estimate_effects(
	incidence: &CsrMatrix,
	weights: &AlignedWeights,
	vocab: &TagVocabulary,
	alpha: f64,
) -> Result<(TagEffects, EffectReport), EngineError> {
	if weights.values.len() != incidence.n_rows() {
		return Err(EngineError::dimension(
			"item weights",
			incidence.n_rows(),
			weights.values.len(),
		));
	}
	if vocab.len() != incidence.n_cols() {
		return Err(EngineError::dimension("tag vocabulary", incidence.n_cols(), vocab.len()));
	}

	let rows = weights.observed_rows();
	if rows.is_empty() {
		return Err(EngineError::EmptyInput(
			"no catalog item has engagement records".into(),
		));
	}

	let mut x = incidence.select_rows_dense(&rows);
	scale_columns(&mut x);
	let y = DMatrix::from_iterator(rows.len(), 1, rows.iter().map(|&r| weights.values[r]));

	let fit = fit_ridge(&x, &y, alpha, true)?;
	let beta: Vec<f64> = fit.coefficients.column(0).iter().copied().collect();
	let effects = TagEffects {
		intercept: fit.intercept[0],
		r2: fit.r2,
		beta,
	};

	let assessment = FitAssessment::from_r2(effects.r2);
	match assessment {
		FitAssessment::HighOverfittingRisk => {
			tracing::warn!(r2 = effects.r2, "tag effect model may be overfitting")
		}
		FitAssessment::PoorFit => {
			tracing::warn!(r2 = effects.r2, "tag effect model explains little of the quality signal")
		}
		_ => {}
	}
	tracing::info!(
		samples = rows.len(),
		r2 = effects.r2,
		intercept = effects.intercept,
		"tag effects estimated"
	);

	let target: Vec<f64> = y.iter().copied().collect();
	let report = EffectReport {
		samples: rows.len(),
		alpha,
		r2: effects.r2,
		intercept: effects.intercept,
		assessment,
		coefficients: SummaryStats::of(&effects.beta),
		target: SummaryStats::of(&target),
		top_tags: ranked_tags(&effects.beta, vocab, true),
		bottom_tags: ranked_tags(&effects.beta, vocab, false),
	};

	Ok((effects, report))
}

/// Divide each column by its population standard deviation. Constant columns
/// are left as they are.
fn scale_columns(x: &mut DMatrix<f64>) {
	let n = x.nrows() as f64;
	for j in 0..x.ncols() {
		let mean = x.column(j).sum() / n;
		let var = x.column(j).iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
		let std = var.sqrt();
		if std > 0.0 {
			for i in 0..x.nrows() {
				x[(i, j)] /= std;
			}
		}
	}
}

fn ranked_tags(beta: &[f64], vocab: &TagVocabulary, descending: bool) -> Vec<TagEffect> {
	let mut order: Vec<usize> = (0..beta.len()).collect();
	if descending {
		order.sort_by(|&a, &b| beta[b].total_cmp(&beta[a]));
	} else {
		order.sort_by(|&a, &b| beta[a].total_cmp(&beta[b]));
	}
	order
		.into_iter()
		.take(EXTREME_TAGS)
		.map(|i| TagEffect {
			tag: vocab.name(i).to_string(),
			beta: beta[i],
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;

	fn fixture() -> (CsrMatrix, TagVocabulary) {
		// tag 0 ("great") sits on high-weight items, tag 1 ("meh") on low ones
		let incidence = CsrMatrix::from_rows(
			2,
			vec![
				vec![(0, 1.0)],
				vec![(0, 1.0)],
				vec![(1, 1.0)],
				vec![(1, 1.0)],
				vec![(0, 1.0), (1, 1.0)],
			],
		);
		let vocab = TagVocabulary::from_parts(vec!["great".into(), "meh".into()], BTreeMap::new());
		(incidence, vocab)
	}

	#[test]
	fn effects_follow_quality() {
		let (incidence, vocab) = fixture();
		let weights = AlignedWeights {
			values: vec![9.0, 8.0, 2.0, 1.0, 5.0],
			observed: vec![true; 5],
		};
		let (effects, report) = estimate_effects(&incidence, &weights, &vocab, 1.0).unwrap();
		assert!(effects.beta[0] > 0.0);
		assert!(effects.beta[0] > effects.beta[1]);
		assert_eq!(report.top_tags[0].tag, "great");
		assert_eq!(report.bottom_tags[0].tag, "meh");
		assert_eq!(report.samples, 5);
		assert!(report.r2 > 0.0 && report.r2 <= 1.0);
	}

	#[test]
	fn unobserved_rows_are_excluded() {
		let (incidence, vocab) = fixture();
		let weights = AlignedWeights {
			values: vec![9.0, 8.0, 2.0, 1.0, 0.5],
			observed: vec![true, true, true, true, false],
		};
		let (_, report) = estimate_effects(&incidence, &weights, &vocab, 1.0).unwrap();
		assert_eq!(report.samples, 4);
	}

	#[test]
	fn no_observed_rows_is_an_error() {
		let (incidence, vocab) = fixture();
		let weights = AlignedWeights {
			values: vec![0.5; 5],
			observed: vec![false; 5],
		};
		assert!(matches!(
			estimate_effects(&incidence, &weights, &vocab, 1.0),
			Err(EngineError::EmptyInput(_))
		));
	}

	#[test]
	fn assessment_thresholds() {
		assert_eq!(FitAssessment::from_r2(0.95), FitAssessment::HighOverfittingRisk);
		assert_eq!(FitAssessment::from_r2(0.8), FitAssessment::ModerateOverfittingRisk);
		assert_eq!(FitAssessment::from_r2(0.6), FitAssessment::GoodFit);
		assert_eq!(FitAssessment::from_r2(0.2), FitAssessment::PoorFit);
	}

	#[test]
	fn scaling_divides_by_std() {
		let mut x = DMatrix::from_row_slice(4, 2, &[1.0, 3.0, 0.0, 3.0, 1.0, 3.0, 0.0, 3.0]);
		scale_columns(&mut x);
		// column 0 has std 0.5; column 1 is constant
		assert_eq!(x[(0, 0)], 2.0);
		assert_eq!(x[(0, 1)], 3.0);
	}
}
