// ---------------------------------------------------------------------------
// HNSW-backed cosine index (hnsw_rs)
// ---------------------------------------------------------------------------
//
// hnsw_rs grows on demand, so `max_elements` is only the sizing hint handed to
// the graph at construction plus the capacity the store reasons about. The
// raw rows are kept next to the graph: the on-disk format stores rows only and
// the graph is rebuilt on load.
//
// DistCosine reports distance 0 for a zero-norm vector, so zero rows stay out
// of the graph and are ranked at distance 1 next to the graph hits. Graph hits
// are re-scored with `cosine_distance`; both backends rank identically.
// ---------------------------------------------------------------------------

use anndists::dist::distances::DistCosine;
use hnsw_rs::hnsw::Hnsw;

use super::{check_rows, IndexError, IndexParams, Neighbour, VectorIndex};
use crate::cosine::{cosine_distance, norm};

/// hnsw_rs caps the layer count at 16.
const MAX_LAYER: usize = 16;

pub struct HnswIndex {
	dim: usize,
	params: IndexParams,
	max_elements: usize,
	data: Vec<f32>,
	/// Handles of zero-norm rows, ascending. Never in the graph.
	zero_rows: Vec<usize>,
	graph: Hnsw<'static, f32, DistCosine>,
}

impl HnswIndex {
	pub fn new(dim: usize, capacity: usize, params: IndexParams) -> Self {
		let graph = Hnsw::<f32, DistCosine>::new(
			params.m,
			capacity.max(1),
			MAX_LAYER,
			params.ef_construction,
			DistCosine {},
		);
		Self {
			dim,
			params,
			max_elements: capacity,
			data: Vec::with_capacity(capacity * dim),
			zero_rows: Vec::new(),
			graph,
		}
	}

	fn row(&self, handle: usize) -> &[f32] {
		&self.data[handle * self.dim..(handle + 1) * self.dim]
	}

	fn graph_len(&self) -> usize {
		self.current_count() - self.zero_rows.len()
	}
}

impl VectorIndex for HnswIndex {
	fn dim(&self) -> usize {
		self.dim
	}

	fn insert(&mut self, rows: &[f32]) -> Result<(), IndexError> {
		check_rows(self.dim, rows)?;
		let start = self.current_count();
		for (offset, row) in rows.chunks_exact(self.dim).enumerate() {
			if norm(row) == 0.0 {
				self.zero_rows.push(start + offset);
			} else {
				self.graph.insert((row, start + offset));
			}
		}
		self.data.extend_from_slice(rows);
		let count = self.current_count();
		if count > self.max_elements {
			self.max_elements = count;
		}
		Ok(())
	}

	fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbour>, IndexError> {
		if vector.len() != self.dim {
			return Err(IndexError::Dimension {
				expected: self.dim,
				actual: vector.len(),
			});
		}
		let k = k.min(self.current_count());
		if k == 0 {
			return Ok(Vec::new());
		}

		// Every row is at distance 1 from a zero query.
		if norm(vector) == 0.0 {
			return Ok((0..k)
				.map(|handle| Neighbour {
					handle,
					distance: 1.0,
				})
				.collect());
		}

		let mut hits: Vec<Neighbour> = Vec::with_capacity(k * 2);
		let graph_k = k.min(self.graph_len());
		if graph_k > 0 {
			let ef = self.params.ef_search.max(graph_k);
			hits.extend(
				self.graph
					.search(vector, graph_k, ef)
					.into_iter()
					.filter(|n| n.d_id < self.current_count())
					.map(|n| Neighbour {
						handle: n.d_id,
						distance: cosine_distance(vector, self.row(n.d_id)),
					}),
			);
			if hits.len() < graph_k {
				tracing::debug!(requested = graph_k, found = hits.len(), "hnsw returned fewer neighbours");
			}
		}
		hits.extend(self.zero_rows.iter().take(k).map(|&handle| Neighbour {
			handle,
			distance: 1.0,
		}));

		hits.sort_by(|a, b| {
			a.distance
				.partial_cmp(&b.distance)
				.unwrap_or(std::cmp::Ordering::Equal)
				.then(a.handle.cmp(&b.handle))
		});
		hits.truncate(k);
		Ok(hits)
	}

	fn current_count(&self) -> usize {
		if self.dim == 0 {
			0
		} else {
			self.data.len() / self.dim
		}
	}

	fn max_elements(&self) -> usize {
		self.max_elements
	}

	fn resize(&mut self, new_capacity: usize) {
		self.max_elements = new_capacity.max(self.current_count());
		self.data
			.reserve((self.max_elements - self.current_count()) * self.dim);
	}

	fn vectors(&self) -> &[f32] {
		&self.data
	}
}
