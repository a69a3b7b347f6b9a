// ---------------------------------------------------------------------------
// Sparse implicit-feedback interactions
// ---------------------------------------------------------------------------
//
// `SparseRow` is one entity's interactions (column → confidence), kept sorted
// by column with duplicates summed. `InteractionMatrix` is a row-major list of
// such rows with a fixed shape.
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;

use crate::error::EngineError;

/// BM25 saturation used when weighting play counts.
pub const BM25_K1: f32 = 100.0;
/// BM25 length normalization used when weighting play counts.
pub const BM25_B: f32 = 0.8;

// ---------------------------------------------------------------------------
// SparseRow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseRow {
	indices: Vec<usize>,
	values: Vec<f32>,
}

impl SparseRow {
	/// Build from `(column, value)` pairs. Repeated columns are summed.
	pub fn from_pairs(pairs: impl IntoIterator<Item = (usize, f32)>) -> Self {
		let mut merged: BTreeMap<usize, f32> = BTreeMap::new();
		for (col, value) in pairs {
			*merged.entry(col).or_insert(0.0) += value;
		}
		let (indices, values) = merged.into_iter().unzip();
		Self { indices, values }
	}

	/// Every column in `columns` set to `weight`. Repeated columns count once.
	pub fn constant(columns: impl IntoIterator<Item = usize>, weight: f32) -> Self {
		let mut indices: Vec<usize> = columns.into_iter().collect();
		indices.sort_unstable();
		indices.dedup();
		let values = vec![weight; indices.len()];
		Self { indices, values }
	}

	pub fn indices(&self) -> &[usize] {
		&self.indices
	}

	pub fn values(&self) -> &[f32] {
		&self.values
	}

	pub fn nnz(&self) -> usize {
		self.indices.len()
	}

	pub fn is_empty(&self) -> bool {
		self.indices.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
		self.indices.iter().copied().zip(self.values.iter().copied())
	}

	pub fn sum(&self) -> f32 {
		self.values.iter().sum()
	}

	/// Largest column referenced, if any.
	pub fn max_index(&self) -> Option<usize> {
		self.indices.last().copied()
	}
}

// ---------------------------------------------------------------------------
// InteractionMatrix
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMatrix {
	cols: usize,
	rows: Vec<SparseRow>,
}

impl InteractionMatrix {
	/// Build a `rows × cols` matrix from `(row, col, value)` triplets.
	/// Duplicate coordinates are summed; out-of-range coordinates are rejected.
	pub fn from_triplets(
		rows: usize,
		cols: usize,
		triplets: impl IntoIterator<Item = (usize, usize, f32)>,
	) -> Result<Self, EngineError> {
		let mut grouped: Vec<Vec<(usize, f32)>> = vec![Vec::new(); rows];
		for (r, c, v) in triplets {
			if r >= rows || c >= cols {
				return Err(EngineError::InvalidInput(format!(
					"interaction ({}, {}) outside a {}x{} matrix",
					r, c, rows, cols
				)));
			}
			if !v.is_finite() {
				return Err(EngineError::InvalidInput(format!(
					"interaction ({}, {}) has non-finite value",
					r, c
				)));
			}
			grouped[r].push((c, v));
		}
		Ok(Self {
			cols,
			rows: grouped.into_iter().map(SparseRow::from_pairs).collect(),
		})
	}

	pub fn n_rows(&self) -> usize {
		self.rows.len()
	}

	pub fn n_cols(&self) -> usize {
		self.cols
	}

	pub fn row(&self, i: usize) -> &SparseRow {
		&self.rows[i]
	}

	pub fn iter_rows(&self) -> impl Iterator<Item = &SparseRow> {
		self.rows.iter()
	}

	pub fn nnz(&self) -> usize {
		self.rows.iter().map(SparseRow::nnz).sum()
	}

	pub fn transpose(&self) -> InteractionMatrix {
		let mut columns: Vec<Vec<(usize, f32)>> = vec![Vec::new(); self.cols];
		for (r, row) in self.rows.iter().enumerate() {
			for (c, v) in row.iter() {
				columns[c].push((r, v));
			}
		}
		InteractionMatrix {
			cols: self.rows.len(),
			rows: columns.into_iter().map(SparseRow::from_pairs).collect(),
		}
	}
}

// ---------------------------------------------------------------------------
// BM25 weighting
// ---------------------------------------------------------------------------

/// Okapi BM25 reweighting with rows as documents and columns as terms.
///
/// `idf(c) = ln(N) - ln(1 + df(c))` where `N` is the row count and `df(c)`
/// the number of rows touching column `c`. Each value becomes
/// `v * (k1 + 1) / (k1 * len_norm(r) + v) * idf(c)` with
/// `len_norm(r) = (1 - b) + b * sum(r) / avg_sum`.
pub fn bm25_weight(matrix: &InteractionMatrix, k1: f32, b: f32) -> InteractionMatrix {
	let n = matrix.n_rows();
	if n == 0 {
		return matrix.clone();
	}

	let mut df = vec![0usize; matrix.n_cols()];
	for row in matrix.iter_rows() {
		for &c in row.indices() {
			df[c] += 1;
		}
	}
	let ln_n = (n as f32).ln();
	let idf: Vec<f32> = df.iter().map(|&d| ln_n - (d as f32).ln_1p()).collect();

	let sums: Vec<f32> = matrix.iter_rows().map(SparseRow::sum).collect();
	let average = sums.iter().sum::<f32>() / n as f32;

	let rows = matrix
		.iter_rows()
		.zip(sums.iter())
		.map(|(row, &sum)| {
			let length_norm = if average > 0.0 {
				(1.0 - b) + b * sum / average
			} else {
				1.0
			};
			SparseRow::from_pairs(row.iter().map(|(c, v)| {
				let weighted = v * (k1 + 1.0) / (k1 * length_norm + v) * idf[c];
				(c, weighted)
			}))
		})
		.collect();

	InteractionMatrix {
		cols: matrix.n_cols(),
		rows,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn from_pairs_sorts_and_sums() {
		let row = SparseRow::from_pairs([(3, 1.0), (1, 2.0), (3, 0.5)]);
		assert_eq!(row.indices(), &[1, 3]);
		assert_eq!(row.values(), &[2.0, 1.5]);
		assert_eq!(row.max_index(), Some(3));
	}

	#[test]
	fn constant_row_ignores_repeats() {
		let row = SparseRow::constant([5, 2, 5, 5], 444.0);
		assert_eq!(row.indices(), &[2, 5]);
		assert_eq!(row.values(), &[444.0, 444.0]);
	}

	#[test]
	fn triplets_out_of_range_rejected() {
		let err = InteractionMatrix::from_triplets(2, 2, [(0, 2, 1.0)]).unwrap_err();
		assert!(matches!(err, EngineError::InvalidInput(_)));
		assert!(InteractionMatrix::from_triplets(2, 2, [(0, 0, f32::NAN)]).is_err());
	}

	#[test]
	fn transpose_swaps_shape() {
		let m = InteractionMatrix::from_triplets(2, 3, [(0, 2, 1.0), (1, 0, 4.0), (1, 2, 2.0)])
			.unwrap();
		let t = m.transpose();
		assert_eq!(t.n_rows(), 3);
		assert_eq!(t.n_cols(), 2);
		assert_eq!(t.row(2).indices(), &[0, 1]);
		assert_eq!(t.row(2).values(), &[1.0, 2.0]);
		assert!(t.row(1).is_empty());
		assert_eq!(t.nnz(), m.nnz());
	}

	#[test]
	fn bm25_keeps_sparsity_pattern() {
		let m = InteractionMatrix::from_triplets(
			3,
			2,
			[(0, 0, 10.0), (1, 0, 1.0), (1, 1, 3.0), (2, 1, 5.0)],
		)
		.unwrap();
		let w = bm25_weight(&m, BM25_K1, BM25_B);
		assert_eq!(w.n_rows(), 3);
		assert_eq!(w.nnz(), m.nnz());
		for (a, b) in m.iter_rows().zip(w.iter_rows()) {
			assert_eq!(a.indices(), b.indices());
		}
	}

	#[test]
	fn bm25_matches_formula() {
		// Two documents, one term in both and one in only the first.
		let m = InteractionMatrix::from_triplets(2, 2, [(0, 0, 2.0), (0, 1, 2.0), (1, 0, 4.0)])
			.unwrap();
		let (k1, b) = (100.0f32, 0.8f32);
		let w = bm25_weight(&m, k1, b);

		let idf_shared = 2.0f32.ln() - 2.0f32.ln_1p();
		let idf_rare = 2.0f32.ln() - 1.0f32.ln_1p();
		let len0 = (1.0 - b) + b * 4.0 / 4.0;
		let expected_rare = 2.0 * (k1 + 1.0) / (k1 * len0 + 2.0) * idf_rare;
		let expected_shared = 2.0 * (k1 + 1.0) / (k1 * len0 + 2.0) * idf_shared;

		assert!((w.row(0).values()[1] - expected_rare).abs() < 1e-5);
		assert!((w.row(0).values()[0] - expected_shared).abs() < 1e-5);
	}

	#[test]
	fn bm25_on_empty_matrix() {
		let m = InteractionMatrix::from_triplets(0, 4, []).unwrap();
		assert_eq!(bm25_weight(&m, BM25_K1, BM25_B).n_rows(), 0);
	}
}
