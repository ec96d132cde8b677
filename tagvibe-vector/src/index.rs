// ---------------------------------------------------------------------------
// Retrieval index over item vectors
// ---------------------------------------------------------------------------
//
// Only non-zero item vectors are indexed, re-normalized so that inner product
// equals cosine similarity. Two variants share the `VectorIndex` trait:
//
// - `ExactIndex`: linear scan, exact top-k.
// - `HnswIndex`: hierarchical navigable small-world graph. Level assignment
//   uses a seeded RNG, so the same vectors and config always build the same
//   graph.
//
// Both are built once per artifact generation and are read-only afterwards.
// ---------------------------------------------------------------------------

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::vectors::{dot, l2_normalize, EmbeddingMatrix};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
	Exact,
	#[default]
	Hnsw,
}

impl std::str::FromStr for IndexKind {
	type Err = EngineError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"exact" | "flat" => Ok(Self::Exact),
			"hnsw" => Ok(Self::Hnsw),
			other => Err(EngineError::InvalidParameter(format!("unknown index type: {other}"))),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
	pub kind: IndexKind,
	/// Max links per node on upper layers (layer 0 allows 2M).
	pub m: usize,
	pub ef_construction: usize,
	pub ef_search: usize,
	pub seed: u64,
}

impl Default for IndexConfig {
	fn default() -> Self {
		Self {
			kind: IndexKind::Hnsw,
			m: 32,
			ef_construction: 200,
			ef_search: 100,
			seed: 42,
		}
	}
}

/// One search hit: the catalog row and its cosine similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
	pub row: usize,
	pub similarity: f64,
}

pub trait VectorIndex: Send + Sync {
	/// Up to `k` rows ordered by descending similarity.
	fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor>;
	fn len(&self) -> usize;
	fn kind(&self) -> IndexKind;

	fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Build the configured index over every non-zero row of `vectors`.
pub fn build_index(
	vectors: &EmbeddingMatrix,
	config: &IndexConfig,
) -> Result<Box<dyn VectorIndex>, EngineError> {
	if config.kind == IndexKind::Hnsw && config.m < 2 {
		return Err(EngineError::InvalidParameter("HNSW m must be >= 2".into()));
	}
	let points = IndexedVectors::from_matrix(vectors);
	let skipped = vectors.rows() - points.len();
	if skipped > 0 {
		tracing::warn!(skipped, "zero item vectors left out of the index");
	}

	let index: Box<dyn VectorIndex> = match config.kind {
		IndexKind::Exact => Box::new(ExactIndex { points }),
		IndexKind::Hnsw => Box::new(HnswIndex::build(points, config)),
	};
	tracing::info!(kind = ?index.kind(), indexed = index.len(), "retrieval index built");
	Ok(index)
}

// ---------------------------------------------------------------------------
// Shared storage
// ---------------------------------------------------------------------------

struct IndexedVectors {
	/// Catalog row of each indexed point.
	rows: Vec<usize>,
	vectors: EmbeddingMatrix,
}

impl IndexedVectors {
	fn from_matrix(m: &EmbeddingMatrix) -> Self {
		let rows: Vec<usize> = (0..m.rows()).filter(|&r| !m.is_zero_row(r)).collect();
		let mut vectors = EmbeddingMatrix::zeros(rows.len(), m.cols());
		for (i, &r) in rows.iter().enumerate() {
			let mut v: Vec<f64> = m.row(r).iter().map(|&x| x as f64).collect();
			l2_normalize(&mut v);
			vectors.set_row(i, &v);
		}
		Self { rows, vectors }
	}

	fn len(&self) -> usize {
		self.rows.len()
	}

	fn similarity(&self, point: usize, query: &[f32]) -> f64 {
		dot(self.vectors.row(point), query)
	}
}

fn normalized_query(query: &[f32]) -> Vec<f32> {
	let mut q: Vec<f64> = query.iter().map(|&x| x as f64).collect();
	l2_normalize(&mut q);
	q.into_iter().map(|x| x as f32).collect()
}

fn by_similarity(a: &Neighbor, b: &Neighbor) -> Ordering {
	b.similarity.total_cmp(&a.similarity).then(a.row.cmp(&b.row))
}

// ---------------------------------------------------------------------------
// ExactIndex
// ---------------------------------------------------------------------------

pub struct ExactIndex {
	points: IndexedVectors,
}

impl VectorIndex for ExactIndex {
	fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
		if query.len() != self.points.vectors.cols() || k == 0 {
			return Vec::new();
		}
		let q = normalized_query(query);
		let mut hits: Vec<Neighbor> = (0..self.points.len())
			.map(|p| Neighbor {
				row: self.points.rows[p],
				similarity: self.points.similarity(p, &q),
			})
			.collect();
		hits.sort_by(by_similarity);
		hits.truncate(k);
		hits
	}

	fn len(&self) -> usize {
		self.points.len()
	}

	fn kind(&self) -> IndexKind {
		IndexKind::Exact
	}
}

// ---------------------------------------------------------------------------
// HnswIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
	sim: f64,
	point: usize,
}

impl Eq for Scored {}

impl Ord for Scored {
	fn cmp(&self, other: &Self) -> Ordering {
		self.sim
			.total_cmp(&other.sim)
			.then(other.point.cmp(&self.point))
	}
}

impl PartialOrd for Scored {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

pub struct HnswIndex {
	points: IndexedVectors,
	/// links[point][layer] -> neighbor points
	links: Vec<Vec<Vec<usize>>>,
	entry: Option<usize>,
	m: usize,
	ef_construction: usize,
	ef_search: usize,
}

impl HnswIndex {
	fn build(points: IndexedVectors, config: &IndexConfig) -> Self {
		let mut index = Self {
			links: Vec::with_capacity(points.len()),
			points,
			entry: None,
			m: config.m,
			ef_construction: config.ef_construction.max(1),
			ef_search: config.ef_search.max(1),
		};
		let mut rng = StdRng::seed_from_u64(config.seed);
		let ml = 1.0 / (config.m as f64).ln();
		for point in 0..index.points.len() {
			// 1 - r is in (0, 1], so the log is finite
			let r: f64 = rng.random();
			let level = (-(1.0 - r).ln() * ml).floor() as usize;
			index.insert(point, level);
		}
		index
	}

	fn top_layer(&self) -> usize {
		self.entry.map_or(0, |e| self.links[e].len() - 1)
	}

	fn max_links(&self, layer: usize) -> usize {
		if layer == 0 {
			2 * self.m
		} else {
			self.m
		}
	}

	fn insert(&mut self, point: usize, level: usize) {
		self.links.push(vec![Vec::new(); level + 1]);
		let Some(entry) = self.entry else {
			self.entry = Some(point);
			return;
		};

		let query: Vec<f32> = self.points.vectors.row(point).to_vec();
		let top = self.top_layer();

		let mut current = entry;
		for layer in (level + 1..=top).rev() {
			current = self.greedy_closest(&query, current, layer);
		}

		for layer in (0..=level.min(top)).rev() {
			let found = self.search_layer(&query, current, self.ef_construction, layer);
			let max = self.max_links(layer);
			let selected: Vec<usize> = found.iter().take(max).map(|s| s.point).collect();

			for &neighbor in &selected {
				self.links[point][layer].push(neighbor);
				self.links[neighbor][layer].push(point);
				self.prune(neighbor, layer);
			}
			if let Some(best) = found.first() {
				current = best.point;
			}
		}

		if level > top {
			self.entry = Some(point);
		}
	}

	/// Keep the `max_links` most similar neighbors of `point` on `layer`.
	fn prune(&mut self, point: usize, layer: usize) {
		let max = self.max_links(layer);
		if self.links[point][layer].len() <= max {
			return;
		}
		let base = self.points.vectors.row(point);
		let mut scored: Vec<Scored> = self.links[point][layer]
			.iter()
			.map(|&n| Scored {
				sim: dot(base, self.points.vectors.row(n)),
				point: n,
			})
			.collect();
		scored.sort_by(|a, b| b.cmp(a));
		self.links[point][layer] = scored.into_iter().take(max).map(|s| s.point).collect();
	}

	fn greedy_closest(&self, query: &[f32], start: usize, layer: usize) -> usize {
		let mut current = start;
		let mut best = self.points.similarity(current, query);
		loop {
			let mut improved = false;
			for &n in &self.links[current][layer] {
				let sim = self.points.similarity(n, query);
				if sim > best {
					best = sim;
					current = n;
					improved = true;
				}
			}
			if !improved {
				return current;
			}
		}
	}

	/// Best-first beam search on one layer. Returns up to `ef` points,
	/// most similar first.
	fn search_layer(&self, query: &[f32], entry: usize, ef: usize, layer: usize) -> Vec<Scored> {
		let mut visited = HashSet::new();
		visited.insert(entry);

		let start = Scored {
			sim: self.points.similarity(entry, query),
			point: entry,
		};
		let mut candidates = BinaryHeap::new();
		let mut results = BinaryHeap::new();
		candidates.push(start);
		results.push(Reverse(start));

		while let Some(current) = candidates.pop() {
			let worst = results.peek().map_or(f64::NEG_INFINITY, |r| r.0.sim);
			if current.sim < worst && results.len() >= ef {
				break;
			}
			for &n in &self.links[current.point][layer] {
				if !visited.insert(n) {
					continue;
				}
				let scored = Scored {
					sim: self.points.similarity(n, query),
					point: n,
				};
				let worst = results.peek().map_or(f64::NEG_INFINITY, |r| r.0.sim);
				if results.len() < ef || scored.sim > worst {
					candidates.push(scored);
					results.push(Reverse(scored));
					if results.len() > ef {
						results.pop();
					}
				}
			}
		}

		let mut out: Vec<Scored> = results.into_iter().map(|r| r.0).collect();
		out.sort_by(|a, b| b.cmp(a));
		out
	}
}

impl VectorIndex for HnswIndex {
	fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
		let Some(entry) = self.entry else {
			return Vec::new();
		};
		if query.len() != self.points.vectors.cols() || k == 0 {
			return Vec::new();
		}
		let q = normalized_query(query);

		let mut current = entry;
		for layer in (1..=self.top_layer()).rev() {
			current = self.greedy_closest(&q, current, layer);
		}
		let found = self.search_layer(&q, current, self.ef_search.max(k), 0);

		let mut hits: Vec<Neighbor> = found
			.into_iter()
			.map(|s| Neighbor {
				row: self.points.rows[s.point],
				similarity: s.sim,
			})
			.collect();
		hits.sort_by(by_similarity);
		hits.truncate(k);
		hits
	}

	fn len(&self) -> usize {
		self.points.len()
	}

	fn kind(&self) -> IndexKind {
		IndexKind::Hnsw
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Deterministic spread of vectors on the unit sphere.
	fn fixture(n: usize, dim: usize) -> EmbeddingMatrix {
		let mut m = EmbeddingMatrix::zeros(n, dim);
		for i in 0..n {
			let v: Vec<f64> = (0..dim)
				.map(|j| ((i * 31 + j * 17) as f64 * 0.37).sin())
				.collect();
			m.set_row(i, &v);
		}
		m
	}

	#[test]
	fn exact_returns_sorted_top_k() {
		let m = fixture(20, 4);
		let index = build_index(&m, &IndexConfig {
			kind: IndexKind::Exact,
			..Default::default()
		})
		.unwrap();
		let hits = index.search(m.row(3), 5);
		assert_eq!(hits.len(), 5);
		assert_eq!(hits[0].row, 3);
		assert!((hits[0].similarity - 1.0).abs() < 1e-5);
		for w in hits.windows(2) {
			assert!(w[0].similarity >= w[1].similarity);
		}
	}

	#[test]
	fn zero_rows_are_not_indexed() {
		let mut m = fixture(5, 3);
		m.set_row(2, &[0.0, 0.0, 0.0]);
		for kind in [IndexKind::Exact, IndexKind::Hnsw] {
			let index = build_index(&m, &IndexConfig {
				kind,
				..Default::default()
			})
			.unwrap();
			assert_eq!(index.len(), 4);
			assert!(index.search(m.row(0), 10).iter().all(|h| h.row != 2));
		}
	}

	#[test]
	fn hnsw_matches_exact_on_small_sets() {
		let m = fixture(60, 8);
		let exact = build_index(&m, &IndexConfig {
			kind: IndexKind::Exact,
			..Default::default()
		})
		.unwrap();
		let hnsw = build_index(&m, &IndexConfig {
			kind: IndexKind::Hnsw,
			m: 16,
			ef_construction: 100,
			ef_search: 100,
			seed: 7,
		})
		.unwrap();
		for q in [0, 11, 42] {
			let a: Vec<usize> = exact.search(m.row(q), 10).iter().map(|h| h.row).collect();
			let b: Vec<usize> = hnsw.search(m.row(q), 10).iter().map(|h| h.row).collect();
			assert_eq!(a, b);
		}
	}

	#[test]
	fn hnsw_build_is_deterministic() {
		let m = fixture(40, 6);
		let config = IndexConfig::default();
		let a = build_index(&m, &config).unwrap();
		let b = build_index(&m, &config).unwrap();
		let qa: Vec<usize> = a.search(m.row(5), 7).iter().map(|h| h.row).collect();
		let qb: Vec<usize> = b.search(m.row(5), 7).iter().map(|h| h.row).collect();
		assert_eq!(qa, qb);
	}

	#[test]
	fn wrong_query_dimension_returns_nothing() {
		let m = fixture(5, 3);
		let index = build_index(&m, &IndexConfig::default()).unwrap();
		assert!(index.search(&[1.0, 0.0], 3).is_empty());
	}

	#[test]
	fn index_kind_parses() {
		assert_eq!("HNSW".parse::<IndexKind>().unwrap(), IndexKind::Hnsw);
		assert_eq!("exact".parse::<IndexKind>().unwrap(), IndexKind::Exact);
		assert!("ivf".parse::<IndexKind>().is_err());
	}
}
