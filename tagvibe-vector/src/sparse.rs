// ---------------------------------------------------------------------------
// Compressed sparse row matrix
// ---------------------------------------------------------------------------
//
// Used for the item x tag incidence matrix and the tag x tag PPMI matrix.
// Column indices within a row are strictly increasing.
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
	n_rows: usize,
	n_cols: usize,
	indptr: Vec<usize>,
	indices: Vec<usize>,
	data: Vec<f64>,
}

impl CsrMatrix {
	/// Build from per-row entry lists. Entries within a row are sorted and
	/// duplicate columns are summed.
	pub fn from_rows(n_cols: usize, rows: Vec<Vec<(usize, f64)>>) -> Self {
		let n_rows = rows.len();
		let mut indptr = Vec::with_capacity(n_rows + 1);
		let mut indices = Vec::new();
		let mut data = Vec::new();
		indptr.push(0);

		for mut row in rows {
			row.sort_by_key(|&(c, _)| c);
			let mut last: Option<usize> = None;
			for (col, value) in row {
				debug_assert!(col < n_cols);
				if last == Some(col) {
					if let Some(v) = data.last_mut() {
						*v += value;
					}
					continue;
				}
				indices.push(col);
				data.push(value);
				last = Some(col);
			}
			indptr.push(indices.len());
		}

		Self {
			n_rows,
			n_cols,
			indptr,
			indices,
			data,
		}
	}

	/// Build from coordinate entries keyed by (row, col).
	pub fn from_coo(n_rows: usize, n_cols: usize, entries: &BTreeMap<(usize, usize), f64>) -> Self {
		let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_rows];
		for (&(r, c), &v) in entries {
			rows[r].push((c, v));
		}
		Self::from_rows(n_cols, rows)
	}

	pub fn n_rows(&self) -> usize {
		self.n_rows
	}

	pub fn n_cols(&self) -> usize {
		self.n_cols
	}

	pub fn nnz(&self) -> usize {
		self.data.len()
	}

	/// Fraction of stored entries.
	pub fn density(&self) -> f64 {
		let cells = self.n_rows * self.n_cols;
		if cells == 0 {
			return 0.0;
		}
		self.nnz() as f64 / cells as f64
	}

	pub fn row_indices(&self, row: usize) -> &[usize] {
		&self.indices[self.indptr[row]..self.indptr[row + 1]]
	}

	pub fn row_values(&self, row: usize) -> &[f64] {
		&self.data[self.indptr[row]..self.indptr[row + 1]]
	}

	pub fn row_nnz(&self, row: usize) -> usize {
		self.indptr[row + 1] - self.indptr[row]
	}

	/// Stored value at (row, col), zero when absent.
	pub fn get(&self, row: usize, col: usize) -> f64 {
		let idx = self.row_indices(row);
		match idx.binary_search(&col) {
			Ok(pos) => self.row_values(row)[pos],
			Err(_) => 0.0,
		}
	}

	pub fn values(&self) -> &[f64] {
		&self.data
	}

	/// Count of non-zero entries per column.
	pub fn column_counts(&self) -> Vec<usize> {
		let mut counts = vec![0usize; self.n_cols];
		for &c in &self.indices {
			counts[c] += 1;
		}
		counts
	}

	pub fn to_dense(&self) -> DMatrix<f64> {
		let mut m = DMatrix::zeros(self.n_rows, self.n_cols);
		for r in 0..self.n_rows {
			for (&c, &v) in self.row_indices(r).iter().zip(self.row_values(r)) {
				m[(r, c)] = v;
			}
		}
		m
	}

	/// Dense copy of a subset of rows, in the given order.
	pub fn select_rows_dense(&self, rows: &[usize]) -> DMatrix<f64> {
		let mut m = DMatrix::zeros(rows.len(), self.n_cols);
		for (out, &r) in rows.iter().enumerate() {
			for (&c, &v) in self.row_indices(r).iter().zip(self.row_values(r)) {
				m[(out, c)] = v;
			}
		}
		m
	}
}
