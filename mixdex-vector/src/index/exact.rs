// Brute-force cosine index. O(N) per query, exact results.

use super::{check_rows, IndexError, Neighbour, VectorIndex};
use crate::cosine::cosine_distance;

pub struct ExactIndex {
	dim: usize,
	max_elements: usize,
	data: Vec<f32>,
}

impl ExactIndex {
	pub fn new(dim: usize, capacity: usize) -> Self {
		Self {
			dim,
			max_elements: capacity,
			data: Vec::with_capacity(capacity * dim),
		}
	}
}

impl VectorIndex for ExactIndex {
	fn dim(&self) -> usize {
		self.dim
	}

	fn insert(&mut self, rows: &[f32]) -> Result<(), IndexError> {
		check_rows(self.dim, rows)?;
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

		let mut hits: Vec<Neighbour> = self
			.data
			.chunks_exact(self.dim)
			.enumerate()
			.map(|(handle, row)| Neighbour {
				handle,
				distance: cosine_distance(vector, row),
			})
			.collect();
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
