// ---------------------------------------------------------------------------
// Diversity re-ranking (Maximal Marginal Relevance)
// ---------------------------------------------------------------------------
//
// Greedy selection over an explicit work-list: `remaining` holds candidate
// indices in first-seen order and `max_sim[i]` tracks each candidate's
// highest similarity to anything already picked (it may be negative; only
// the first round, with nothing picked, uses 0). Each round scans the
// work-list once, so selection finishes in at most K rounds.
// ---------------------------------------------------------------------------

use crate::types::DiversityMetrics;
use crate::vectors::cosine_similarity;

/// Indices into `relevance`/`vectors`, in selection order.
/// `MMR(c) = λ·relevance(c) + (1−λ)·(1 − maxSim(c, selected))`; ties go to
/// the earliest candidate.
pub fn mmr_select(relevance: &[f64], vectors: &[&[f32]], k: usize, lambda: f64) -> Vec<usize> {
	let n = relevance.len().min(vectors.len());
	let target = k.min(n);
	let lambda = lambda.clamp(0.0, 1.0);

	let mut remaining: Vec<usize> = (0..n).collect();
	let mut max_sim = vec![f64::NEG_INFINITY; n];
	let mut selected = Vec::with_capacity(target);

	while selected.len() < target {
		let mut best: Option<(usize, f64)> = None;
		for (pos, &c) in remaining.iter().enumerate() {
			let redundancy = if selected.is_empty() { 0.0 } else { max_sim[c] };
			let score = lambda * relevance[c] + (1.0 - lambda) * (1.0 - redundancy);
			if best.is_none_or(|(_, b)| score > b) {
				best = Some((pos, score));
			}
		}
		let Some((pos, _)) = best else { break };
		let picked = remaining.remove(pos);
		selected.push(picked);

		for &c in &remaining {
			let sim = cosine_similarity(vectors[c], vectors[picked]);
			if sim > max_sim[c] {
				max_sim[c] = sim;
			}
		}
	}

	selected
}

/// Mean pairwise cosine similarity. Lists shorter than two score 0.
pub fn intra_list_similarity(vectors: &[&[f32]]) -> f64 {
	let n = vectors.len();
	if n < 2 {
		return 0.0;
	}
	let mut total = 0.0;
	let mut pairs = 0usize;
	for i in 0..n {
		for j in (i + 1)..n {
			total += cosine_similarity(vectors[i], vectors[j]);
			pairs += 1;
		}
	}
	total / pairs as f64
}

pub fn diversity_metrics(vectors: &[&[f32]], novelty: &[f64]) -> DiversityMetrics {
	let ils = intra_list_similarity(vectors);
	DiversityMetrics {
		intra_list_similarity: ils,
		diversity_score: 1.0 - ils,
		mean_novelty: if novelty.is_empty() {
			0.0
		} else {
			novelty.iter().sum::<f64>() / novelty.len() as f64
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	fn pool() -> (Vec<f64>, Vec<Vec<f32>>) {
		let relevance = vec![1.0, 0.95, 0.9, 0.5, 0.4];
		let vectors = vec![
			vec![1.0, 0.0],
			vec![0.99, 0.1],
			vec![0.0, 1.0],
			vec![0.7, 0.7],
			vec![-1.0, 0.0],
		];
		(relevance, vectors)
	}

	fn refs(v: &[Vec<f32>]) -> Vec<&[f32]> {
		v.iter().map(|x| x.as_slice()).collect()
	}

	#[test]
	fn lambda_one_is_relevance_order() {
		let (rel, vecs) = pool();
		let picked = mmr_select(&rel, &refs(&vecs), 3, 1.0);
		assert_eq!(picked, vec![0, 1, 2]);
	}

	#[test]
	fn diversity_pushes_out_near_duplicates() {
		let (rel, vecs) = pool();
		let picked = mmr_select(&rel, &refs(&vecs), 2, 0.5);
		assert_eq!(picked[0], 0);
		assert_ne!(picked[1], 1);
	}

	#[test]
	fn output_length_and_uniqueness() {
		let (rel, vecs) = pool();
		for k in 0..8 {
			for lambda in [0.0, 0.3, 0.7, 1.0] {
				let picked = mmr_select(&rel, &refs(&vecs), k, lambda);
				assert_eq!(picked.len(), k.min(rel.len()));
				let unique: HashSet<usize> = picked.iter().copied().collect();
				assert_eq!(unique.len(), picked.len());
			}
		}
	}

	#[test]
	fn opposite_vector_keeps_its_negative_similarity() {
		// After picking 0, candidate 1 scores 0.5·0.5 + 0.5·(1 + 1) = 1.25 and
		// candidate 2 scores 0.5·0.6 + 0.5·(1 − 0) = 0.8.
		let vecs = [vec![1.0f32, 0.0], vec![-1.0, 0.0], vec![0.0, 1.0]];
		let picked = mmr_select(&[1.0, 0.5, 0.6], &refs(&vecs), 2, 0.5);
		assert_eq!(picked, vec![0, 1]);
	}

	#[test]
	fn first_pick_ignores_redundancy() {
		let vecs = [vec![1.0f32, 0.0], vec![-1.0, 0.0]];
		// λ = 0: nothing selected yet, so both score 1 and the first wins
		let picked = mmr_select(&[0.1, 0.9], &refs(&vecs), 1, 0.0);
		assert_eq!(picked, vec![0]);
	}

	#[test]
	fn ties_go_to_first_seen() {
		let vecs = [vec![1.0f32, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]];
		let picked = mmr_select(&[0.5, 0.5, 0.5], &refs(&vecs), 3, 1.0);
		assert_eq!(picked, vec![0, 1, 2]);
	}

	#[test]
	fn empty_pool_selects_nothing() {
		assert!(mmr_select(&[], &[], 5, 0.5).is_empty());
	}

	#[test]
	fn metrics_for_orthogonal_list() {
		let vecs = [vec![1.0f32, 0.0], vec![0.0, 1.0]];
		let m = diversity_metrics(&refs(&vecs), &[0.2, 0.4]);
		assert!(m.intra_list_similarity.abs() < 1e-12);
		assert!((m.diversity_score - 1.0).abs() < 1e-12);
		assert!((m.mean_novelty - 0.3).abs() < 1e-12);
	}
}
