// ---------------------------------------------------------------------------
// Item vector synthesis
// ---------------------------------------------------------------------------
//
// An item vector is a weighted average of its tag vectors. Weights come from
// a temperature-controlled softmax over the item's clipped tag effects,
// optionally damped by tag count, and the result is unit length. Steering
// then nudges every vector along the global quality axis d_β.
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::diagnostics::SummaryStats;
use crate::error::EngineError;
use crate::sparse::CsrMatrix;
use crate::vectors::{add_scaled, l2_normalize, EmbeddingMatrix, ZERO_NORM};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisParams {
	/// Softmax temperature κ. Smaller values concentrate weight on the
	/// strongest tags; larger values flatten toward a plain average.
	pub kappa: f64,
	/// Tag-count dampening exponent α.
	pub count_alpha: f64,
	/// Steering strength η along the quality axis. Zero disables steering.
	pub eta: f64,
}

impl Default for SynthesisParams {
	fn default() -> Self {
		Self {
			kappa: 1.0,
			count_alpha: 0.5,
			eta: 0.2,
		}
	}
}

impl SynthesisParams {
	pub fn validate(&self) -> Result<(), EngineError> {
		if !(self.kappa.is_finite() && self.kappa > 0.0) {
			return Err(EngineError::InvalidParameter(format!(
				"kappa must be positive, got {}",
				self.kappa
			)));
		}
		if !(self.count_alpha >= 0.0) {
			return Err(EngineError::InvalidParameter(format!(
				"count alpha must be >= 0, got {}",
				self.count_alpha
			)));
		}
		if !(self.eta >= 0.0) {
			return Err(EngineError::InvalidParameter(format!(
				"eta must be >= 0, got {}",
				self.eta
			)));
		}
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisReport {
	pub items: usize,
	pub zero_vectors: usize,
	pub steered: bool,
	/// Norms of the synthesized vectors before the final normalization.
	pub raw_norms: SummaryStats,
}

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

/// `softmax(x/κ)`, shifted by the max for numerical stability.
pub fn softmax_kappa(x: &[f64], kappa: f64) -> Vec<f64> {
	if x.is_empty() {
		return Vec::new();
	}
	let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
	let exps: Vec<f64> = x.iter().map(|&v| ((v - max) / kappa).exp()).collect();
	let sum: f64 = exps.iter().sum();
	exps.into_iter().map(|e| e / sum).collect()
}

/// Effects clipped at zero plus the normalizer used for every item. When no
/// effect is positive the normalizer is 1.
pub fn clip_effects(beta: &[f64]) -> (Vec<f64>, f64) {
	let clipped: Vec<f64> = beta.iter().map(|b| b.max(0.0)).collect();
	let max = clipped.iter().copied().fold(0.0, f64::max);
	let bmax = if max > 0.0 { max } else { 1.0 };
	(clipped, bmax)
}

/// Softmax weights of one item's tags (sum to 1).
pub fn tag_weights(tags: &[usize], clipped: &[f64], bmax: f64, kappa: f64) -> Vec<f64> {
	let scaled: Vec<f64> = tags.iter().map(|&t| clipped[t] / bmax).collect();
	softmax_kappa(&scaled, kappa)
}

/// `normalize(Σ max(β,0)·tagVector)`; `None` when no tag has a positive
/// effect or the sum cancels.
pub fn quality_axis(tag_vectors: &EmbeddingMatrix, beta: &[f64]) -> Option<Vec<f64>> {
	let mut axis = vec![0.0; tag_vectors.cols()];
	for (t, &b) in beta.iter().enumerate() {
		if b > 0.0 {
			add_scaled(&mut axis, tag_vectors.row(t), b);
		}
	}
	if l2_normalize(&mut axis) == 0.0 {
		return None;
	}
	Some(axis)
}

/// `normalize(v + η⟨v,d⟩d)` for a unit `v` and unit `d`.
pub fn steer(v: &mut [f64], axis: &[f64], eta: f64) {
	let proj: f64 = v.iter().zip(axis).map(|(a, b)| a * b).sum();
	for (x, d) in v.iter_mut().zip(axis) {
		*x += eta * proj * d;
	}
	l2_normalize(v);
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// One unit vector per item row; tagless rows (or rows whose tag vectors
/// cancel) are zero.
pub fn synthesize(
	incidence: &CsrMatrix,
	tag_vectors: &EmbeddingMatrix,
	beta: &[f64],
	params: &SynthesisParams,
) -> Result<(EmbeddingMatrix, SynthesisReport), EngineError> {
	params.validate()?;
	if incidence.n_cols() != tag_vectors.rows() {
		return Err(EngineError::dimension(
			"tag vectors vs incidence columns",
			incidence.n_cols(),
			tag_vectors.rows(),
		));
	}
	if beta.len() != tag_vectors.rows() {
		return Err(EngineError::dimension("tag effects", tag_vectors.rows(), beta.len()));
	}

	let dim = tag_vectors.cols();
	let (clipped, bmax) = clip_effects(beta);
	let axis = if params.eta > 0.0 {
		quality_axis(tag_vectors, beta)
	} else {
		None
	};
	if params.eta > 0.0 && axis.is_none() {
		tracing::warn!("no positive tag effects; steering skipped");
	}

	let mut out = EmbeddingMatrix::zeros(incidence.n_rows(), dim);
	let mut raw_norms = Vec::with_capacity(incidence.n_rows());
	let mut zero_vectors = 0;

	for row in 0..incidence.n_rows() {
		let tags = incidence.row_indices(row);
		if tags.is_empty() {
			zero_vectors += 1;
			raw_norms.push(0.0);
			continue;
		}

		let mut weights = tag_weights(tags, &clipped, bmax, params.kappa);
		if tags.len() > 1 && params.count_alpha > 0.0 {
			let damp = (tags.len() as f64).powf(params.count_alpha);
			for w in weights.iter_mut() {
				*w /= damp;
			}
		}
		let total: f64 = weights.iter().sum();

		let mut v = vec![0.0; dim];
		for (&t, &w) in tags.iter().zip(&weights) {
			add_scaled(&mut v, tag_vectors.row(t), w / total);
		}

		let norm = l2_normalize(&mut v);
		raw_norms.push(norm);
		if norm < ZERO_NORM {
			zero_vectors += 1;
			continue;
		}
		if let Some(d) = &axis {
			steer(&mut v, d, params.eta);
		}
		out.set_row(row, &v);
	}

	if zero_vectors > 0 {
		tracing::warn!(zero_vectors, "items synthesized to zero vectors");
	}
	tracing::info!(
		items = incidence.n_rows(),
		zero_vectors,
		steered = axis.is_some(),
		"item vectors synthesized"
	);

	Ok((
		out,
		SynthesisReport {
			items: incidence.n_rows(),
			zero_vectors,
			steered: axis.is_some(),
			raw_norms: SummaryStats::of(&raw_norms),
		},
	))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vectors::{cosine_similarity, magnitude};

	fn tags(rows: &[&[usize]], n: usize) -> CsrMatrix {
		CsrMatrix::from_rows(n, rows.iter().map(|r| r.iter().map(|&c| (c, 1.0)).collect()).collect())
	}

	fn orthonormal(n: usize, dim: usize) -> EmbeddingMatrix {
		let mut m = EmbeddingMatrix::zeros(n, dim);
		for i in 0..n {
			m.row_mut(i)[i] = 1.0;
		}
		m
	}

	// -- softmax tests ------------------------------------------------------

	#[test]
	fn softmax_sums_to_one() {
		for kappa in [0.1, 1.0, 5.0, 50.0] {
			let w = softmax_kappa(&[0.2, 1.0, 0.0, 0.7], kappa);
			assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
		}
	}

	#[test]
	fn softmax_divides_by_temperature() {
		let w = softmax_kappa(&[0.0, 1.0], 2.0);
		let e = 0.5f64.exp();
		assert!((w[1] - e / (1.0 + e)).abs() < 1e-12);
		assert!((w[0] - 1.0 / (1.0 + e)).abs() < 1e-12);
	}

	#[test]
	fn smaller_temperature_sharpens_weights() {
		let x = [0.0, 0.5, 1.0];
		let sharp = softmax_kappa(&x, 0.25);
		let plain = softmax_kappa(&x, 1.0);
		let flat = softmax_kappa(&x, 4.0);
		assert!(sharp[2] > plain[2]);
		assert!(plain[2] > flat[2]);
	}

	#[test]
	fn softmax_is_stable_for_large_inputs() {
		let w = softmax_kappa(&[1000.0, 999.0], 10.0);
		assert!(w.iter().all(|v| v.is_finite()));
		assert!(w[0] > w[1]);
	}

	#[test]
	fn clipping_uses_unit_normalizer_when_no_positive_effect() {
		let (clipped, bmax) = clip_effects(&[-1.0, 0.0]);
		assert_eq!(clipped, vec![0.0, 0.0]);
		assert_eq!(bmax, 1.0);
	}

	// -- synthesis tests ----------------------------------------------------

	#[test]
	fn stronger_tag_gets_more_weight_and_closer_vector() {
		let beta = [2.0, -1.0];
		let (clipped, bmax) = clip_effects(&beta);
		let w = tag_weights(&[0, 1], &clipped, bmax, 1.0);
		assert!(w[0] > w[1]);

		let tv = orthonormal(2, 3);
		let params = SynthesisParams {
			eta: 0.0,
			..Default::default()
		};
		let (items, _) = synthesize(&tags(&[&[0, 1]], 2), &tv, &beta, &params).unwrap();
		let v = items.row(0);
		assert!(cosine_similarity(v, tv.row(0)) > cosine_similarity(v, tv.row(1)));
	}

	#[test]
	fn zero_effect_tag_loses_to_positive_effect() {
		let beta = [2.0, 0.0];
		let (clipped, bmax) = clip_effects(&beta);
		assert_eq!(bmax, 2.0);
		let w = tag_weights(&[0, 1], &clipped, bmax, 1.0);
		let e = 1.0f64.exp();
		assert!((w[0] - e / (1.0 + e)).abs() < 1e-12);
		assert!(w[0] > w[1]);

		let tv = orthonormal(2, 3);
		let params = SynthesisParams {
			kappa: 1.0,
			eta: 0.0,
			..Default::default()
		};
		let (items, _) = synthesize(&tags(&[&[0, 1]], 2), &tv, &beta, &params).unwrap();
		let v = items.row(0);
		assert!(cosine_similarity(v, tv.row(0)) > cosine_similarity(v, tv.row(1)));
	}

	#[test]
	fn vectors_are_unit_length_with_and_without_steering() {
		let incidence = tags(&[&[0], &[0, 1], &[1, 2, 3], &[2]], 4);
		let mut tv = EmbeddingMatrix::zeros(4, 3);
		tv.set_row(0, &[1.0, 0.2, 0.0]);
		tv.set_row(1, &[0.0, 2.0, 0.5]);
		tv.set_row(2, &[0.3, 0.0, 1.5]);
		tv.set_row(3, &[-1.0, 1.0, 1.0]);
		let beta = [0.5, 1.5, -0.2, 0.8];

		for eta in [0.0, 0.2, 1.0] {
			let params = SynthesisParams {
				eta,
				..Default::default()
			};
			let (items, report) = synthesize(&incidence, &tv, &beta, &params).unwrap();
			for row in items.iter_rows() {
				assert!((magnitude(row) - 1.0).abs() < 1e-5);
			}
			assert_eq!(report.zero_vectors, 0);
			assert_eq!(report.steered, eta > 0.0);
		}
	}

	#[test]
	fn steering_moves_toward_quality_axis() {
		let incidence = tags(&[&[0, 1]], 2);
		let tv = orthonormal(2, 2);
		let beta = [0.0, 1.0];
		let plain = SynthesisParams {
			eta: 0.0,
			..Default::default()
		};
		let steered = SynthesisParams {
			eta: 1.0,
			..Default::default()
		};
		let (a, _) = synthesize(&incidence, &tv, &beta, &plain).unwrap();
		let (b, _) = synthesize(&incidence, &tv, &beta, &steered).unwrap();
		// axis is tag 1
		assert!(b.row(0)[1] > a.row(0)[1]);
	}

	#[test]
	fn count_dampening_cancels_in_the_average() {
		let incidence = tags(&[&[0, 1, 2]], 3);
		let tv = orthonormal(3, 3);
		let beta = [1.0, 0.5, 0.0];
		let damped = SynthesisParams {
			count_alpha: 0.5,
			eta: 0.0,
			..Default::default()
		};
		let undamped = SynthesisParams {
			count_alpha: 0.0,
			eta: 0.0,
			..Default::default()
		};
		let (a, _) = synthesize(&incidence, &tv, &beta, &damped).unwrap();
		let (b, _) = synthesize(&incidence, &tv, &beta, &undamped).unwrap();
		for (x, y) in a.row(0).iter().zip(b.row(0)) {
			assert!((x - y).abs() < 1e-6);
		}
	}

	#[test]
	fn tagless_items_are_zero() {
		let incidence = tags(&[&[], &[0]], 1);
		let tv = orthonormal(1, 2);
		let (items, report) = synthesize(&incidence, &tv, &[1.0], &SynthesisParams::default()).unwrap();
		assert!(items.is_zero_row(0));
		assert!(!items.is_zero_row(1));
		assert_eq!(report.zero_vectors, 1);
	}

	#[test]
	fn synthesis_is_idempotent() {
		let incidence = tags(&[&[0, 1], &[1, 2], &[0, 2]], 3);
		let mut tv = EmbeddingMatrix::zeros(3, 4);
		tv.set_row(0, &[0.1, 0.7, -0.3, 0.2]);
		tv.set_row(1, &[0.9, -0.1, 0.4, 0.0]);
		tv.set_row(2, &[-0.5, 0.5, 0.5, 0.5]);
		let beta = [0.3, 1.2, -0.4];
		let params = SynthesisParams::default();
		let (a, _) = synthesize(&incidence, &tv, &beta, &params).unwrap();
		let (b, _) = synthesize(&incidence, &tv, &beta, &params).unwrap();
		assert_eq!(a.as_flat(), b.as_flat());
	}

	#[test]
	fn dimension_checks() {
		let incidence = tags(&[&[0]], 2);
		let tv = orthonormal(1, 2);
		assert!(matches!(
			synthesize(&incidence, &tv, &[1.0], &SynthesisParams::default()),
			Err(EngineError::DimensionMismatch { .. })
		));
		let incidence = tags(&[&[0]], 1);
		assert!(matches!(
			synthesize(&incidence, &tv, &[1.0, 2.0], &SynthesisParams::default()),
			Err(EngineError::DimensionMismatch { .. })
		));
	}

	#[test]
	fn invalid_kappa_is_rejected() {
		let params = SynthesisParams {
			kappa: 0.0,
			..Default::default()
		};
		assert!(params.validate().is_err());
	}
}
