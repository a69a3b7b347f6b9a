// ---------------------------------------------------------------------------
// MIPS → cosine ANN reduction
// ---------------------------------------------------------------------------
//
// Every item row v gets one extra coordinate sqrt(max_norm² - |v|²), so all
// augmented rows share the norm `max_norm`. For a query q augmented with a
// trailing 0, cos(q', v') = q·v / (|q| * max_norm): ranking by cosine distance
// over the augmented rows is ranking by raw inner product. Distances convert
// back with score = max_norm * |q'| * (1 - d).
//
// Rows appended later are augmented against the max_norm current at that
// time. Rows already in the index are never recomputed, so after max_norm
// grows their norms fall short of it and rankings across the two generations
// are approximate.
// ---------------------------------------------------------------------------

use crate::cosine::norm;
use crate::index::{IndexError, VectorIndex};
use crate::matrix::FactorMatrix;

/// Augment a whole matrix. Returns `(max_norm, augmented)` where `augmented`
/// has `rank + 1` columns.
pub fn augment(matrix: &FactorMatrix) -> (f32, FactorMatrix) {
	let max_norm = matrix.iter_rows().map(norm).fold(0.0f32, f32::max);
	(max_norm, augment_against(matrix, max_norm))
}

/// Augment only `rows`, against `max(current_max_norm, max |row|)`.
/// Returns the (non-decreasing) max_norm used and the augmented rows.
pub fn augment_rows(rows: &FactorMatrix, current_max_norm: f32) -> (f32, FactorMatrix) {
	let local = rows.iter_rows().map(norm).fold(0.0f32, f32::max);
	let max_norm = current_max_norm.max(local);
	(max_norm, augment_against(rows, max_norm))
}

fn augment_against(matrix: &FactorMatrix, max_norm: f32) -> FactorMatrix {
	matrix.with_extra_column(|row| {
		let n = norm(row);
		(max_norm * max_norm - n * n).max(0.0).sqrt()
	})
}

/// The query side of the reduction: `q` with a trailing zero.
pub fn augment_query(query: &[f32]) -> Vec<f32> {
	let mut q = Vec::with_capacity(query.len() + 1);
	q.extend_from_slice(query);
	q.push(0.0);
	q
}

/// Largest row norm of an already-augmented index. Used to recover
/// `max_norm` after loading a persisted recommend index.
pub fn recover_max_norm(augmented: &dyn VectorIndex) -> f32 {
	let dim = augmented.dim();
	if dim == 0 {
		return 0.0;
	}
	augmented
		.vectors()
		.chunks_exact(dim)
		.map(norm)
		.fold(0.0f32, f32::max)
}

/// Top `k` rows of `index` by inner product with `query`, as
/// `(handle, score)` pairs in descending score order.
pub fn query_inner_product(
	index: &dyn VectorIndex,
	max_norm: f32,
	query: &[f32],
	k: usize,
) -> Result<Vec<(usize, f32)>, IndexError> {
	let q = augment_query(query);
	let scaling = max_norm * norm(&q);
	let hits = index.query(&q, k)?;
	let mut scored: Vec<(usize, f32)> = hits
		.into_iter()
		.map(|n| (n.handle, scaling * (1.0 - n.distance)))
		.collect();
	scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
	Ok(scored)
}
