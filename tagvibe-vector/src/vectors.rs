// ---------------------------------------------------------------------------
// Dense vector math and row-major embedding matrices
// ---------------------------------------------------------------------------
//
// Stored vectors are f32 (compact artifacts); all arithmetic accumulates in
// f64 and is cast back once at the end.
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

/// Norms below this are treated as zero.
pub const ZERO_NORM: f64 = 1e-12;

/// Compute cosine similarity between two f32 vectors.
/// Returns 0.0 for zero-magnitude vectors or dimension mismatches.
/// Result clamped to [-1.0, 1.0].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let mut dot: f64 = 0.0;
	let mut norm_a: f64 = 0.0;
	let mut norm_b: f64 = 0.0;

	for (&x, &y) in a.iter().zip(b) {
		let xf = x as f64;
		let yf = y as f64;
		dot += xf * yf;
		norm_a += xf * xf;
		norm_b += yf * yf;
	}

	let denom = norm_a.sqrt() * norm_b.sqrt();
	if denom < ZERO_NORM {
		return 0.0;
	}

	let result = dot / denom;
	if !result.is_finite() {
		return 0.0;
	}
	result.clamp(-1.0, 1.0)
}

/// Inner product accumulated in f64.
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
	a.iter()
		.zip(b)
		.map(|(&x, &y)| (x as f64) * (y as f64))
		.sum()
}

/// L2 norm of an f32 vector.
pub fn magnitude(v: &[f32]) -> f64 {
	v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt()
}

/// L2 norm of an f64 vector.
pub fn magnitude_f64(v: &[f64]) -> f64 {
	v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Normalize in place. Returns the original norm; a zero vector is left
/// untouched and reports 0.
pub fn l2_normalize(v: &mut [f64]) -> f64 {
	let norm = magnitude_f64(v);
	if norm < ZERO_NORM {
		return 0.0;
	}
	for x in v.iter_mut() {
		*x /= norm;
	}
	norm
}

/// `acc += scale * v`
pub fn add_scaled(acc: &mut [f64], v: &[f32], scale: f64) {
	for (a, &x) in acc.iter_mut().zip(v) {
		*a += scale * x as f64;
	}
}

pub fn to_f32(v: &[f64]) -> Vec<f32> {
	v.iter().map(|&x| x as f32).collect()
}

// ---------------------------------------------------------------------------
// EmbeddingMatrix
// ---------------------------------------------------------------------------

/// Row-major dense matrix of f32 values. One row per tag or item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMatrix {
	rows: usize,
	cols: usize,
	data: Vec<f32>,
}

impl EmbeddingMatrix {
	pub fn zeros(rows: usize, cols: usize) -> Self {
		Self {
			rows,
			cols,
			data: vec![0.0; rows * cols],
		}
	}

	/// Wrap a flat buffer. Returns `None` when the length does not match.
	pub fn from_flat(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
		if data.len() != rows * cols {
			return None;
		}
		Some(Self { rows, cols, data })
	}

	pub fn rows(&self) -> usize {
		self.rows
	}

	pub fn cols(&self) -> usize {
		self.cols
	}

	pub fn row(&self, i: usize) -> &[f32] {
		&self.data[i * self.cols..(i + 1) * self.cols]
	}

	pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
		&mut self.data[i * self.cols..(i + 1) * self.cols]
	}

	pub fn set_row(&mut self, i: usize, values: &[f64]) {
		for (dst, &src) in self.row_mut(i).iter_mut().zip(values) {
			*dst = src as f32;
		}
	}

	pub fn as_flat(&self) -> &[f32] {
		&self.data
	}

	pub fn is_zero_row(&self, i: usize) -> bool {
		magnitude(self.row(i)) < ZERO_NORM
	}

	pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
		self.data.chunks_exact(self.cols.max(1)).take(self.rows)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	// -- cosine tests -------------------------------------------------------

	#[test]
	fn identical_vectors() {
		let a = vec![1.0f32, 2.0, 3.0];
		let sim = cosine_similarity(&a, &a);
		assert!((sim - 1.0).abs() < 1e-10);
	}

	#[test]
	fn orthogonal_vectors() {
		let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
		assert!(sim.abs() < 1e-10);
	}

	#[test]
	fn opposite_vectors() {
		let sim = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]);
		assert!((sim + 1.0).abs() < 1e-10);
	}

	#[test]
	fn zero_and_mismatched_vectors() {
		assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
		assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
		assert_eq!(cosine_similarity(&[], &[]), 0.0);
	}

	// -- normalize tests ----------------------------------------------------

	#[test]
	fn normalize_returns_norm_and_unit_vector() {
		let mut v = vec![3.0, 4.0];
		let norm = l2_normalize(&mut v);
		assert!((norm - 5.0).abs() < 1e-12);
		assert!((magnitude_f64(&v) - 1.0).abs() < 1e-12);
	}

	#[test]
	fn normalize_leaves_zero_vector() {
		let mut v = vec![0.0, 0.0];
		assert_eq!(l2_normalize(&mut v), 0.0);
		assert_eq!(v, vec![0.0, 0.0]);
	}

	// -- matrix tests -------------------------------------------------------

	#[test]
	fn matrix_rows_are_contiguous() {
		let mut m = EmbeddingMatrix::zeros(2, 3);
		m.set_row(1, &[1.0, 2.0, 3.0]);
		assert_eq!(m.row(0), &[0.0, 0.0, 0.0]);
		assert_eq!(m.row(1), &[1.0, 2.0, 3.0]);
		assert!(m.is_zero_row(0));
		assert!(!m.is_zero_row(1));
		assert_eq!(m.iter_rows().count(), 2);
	}

	#[test]
	fn from_flat_rejects_bad_length() {
		assert!(EmbeddingMatrix::from_flat(2, 2, vec![0.0; 3]).is_none());
		assert!(EmbeddingMatrix::from_flat(2, 2, vec![0.0; 4]).is_some());
	}
}
