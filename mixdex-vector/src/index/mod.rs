// ---------------------------------------------------------------------------
// VectorIndex — append-only ANN index over fixed-dimension vectors
// ---------------------------------------------------------------------------
//
// Handles are sequential: the n-th inserted row gets handle n. Every backend
// keeps its raw rows so that an index can be persisted and the factor matrix
// recovered from it on load.
// ---------------------------------------------------------------------------

mod codec;
mod exact;
mod hnsw;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use codec::IndexSnapshot;
pub use exact::ExactIndex;
pub use hnsw::HnswIndex;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IndexError {
	#[error("Dimension mismatch: index has {expected}, got {actual}")]
	Dimension { expected: usize, actual: usize },
	#[error("Query failed: {0}")]
	Query(String),
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Corruption: {0}")]
	Corruption(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A single k-NN hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
	pub handle: usize,
	pub distance: f32,
}

pub trait VectorIndex {
	/// Dimension of every indexed vector.
	fn dim(&self) -> usize;

	/// Append row-major `rows` (a multiple of `dim()` values). The first new
	/// row gets handle `current_count()` before the call.
	fn insert(&mut self, rows: &[f32]) -> Result<(), IndexError>;

	/// Up to `k` nearest rows by cosine distance, ascending. `k` is clamped to
	/// `current_count()`.
	fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbour>, IndexError>;

	fn current_count(&self) -> usize;

	fn max_elements(&self) -> usize;

	/// Raise the capacity. Never shrinks below the current count.
	fn resize(&mut self, new_capacity: usize);

	/// Row-major copy of every indexed vector, in handle order.
	fn vectors(&self) -> &[f32];

	/// Point-in-time copy suitable for writing to disk from another thread.
	fn snapshot(&self) -> IndexSnapshot {
		IndexSnapshot {
			dim: self.dim(),
			max_elements: self.max_elements(),
			data: self.vectors().to_vec(),
		}
	}

	/// Persist atomically to `path`.
	fn save(&self, path: &Path) -> Result<(), IndexError> {
		let bytes = self.snapshot().encode()?;
		crate::persistence::write_atomic(path, &bytes)?;
		Ok(())
	}
}

pub(crate) fn check_rows(dim: usize, rows: &[f32]) -> Result<(), IndexError> {
	// A ragged buffer reports its full length as the offending size.
	if dim == 0 || rows.len() % dim != 0 {
		return Err(IndexError::Dimension {
			expected: dim,
			actual: rows.len(),
		});
	}
	Ok(())
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which ANN implementation backs an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
	/// Hierarchical navigable small world graph.
	Hnsw,
	/// Brute-force scan. Exact, for small catalogs and tests.
	Exact,
}

impl Default for IndexBackend {
	fn default() -> Self {
		Self::Hnsw
	}
}

/// Graph construction and search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
	pub m: usize,
	#[serde(rename = "efConstruction")]
	pub ef_construction: usize,
	#[serde(rename = "efSearch")]
	pub ef_search: usize,
}

impl Default for IndexParams {
	fn default() -> Self {
		Self {
			m: 16,
			ef_construction: 400,
			ef_search: 90,
		}
	}
}

/// Creates, builds and loads indexes of one configured backend.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndexFactory {
	pub backend: IndexBackend,
	pub params: IndexParams,
}

impl IndexFactory {
	pub fn new(backend: IndexBackend, params: IndexParams) -> Self {
		Self { backend, params }
	}

	pub fn exact() -> Self {
		Self::new(IndexBackend::Exact, IndexParams::default())
	}

	/// An empty index with room for `capacity` rows.
	pub fn create(&self, dim: usize, capacity: usize) -> Box<dyn VectorIndex> {
		match self.backend {
			IndexBackend::Hnsw => Box::new(HnswIndex::new(dim, capacity, self.params)),
			IndexBackend::Exact => Box::new(ExactIndex::new(dim, capacity)),
		}
	}

	/// An index holding exactly `rows`, with capacity equal to the row count.
	pub fn build(&self, dim: usize, rows: &[f32]) -> Result<Box<dyn VectorIndex>, IndexError> {
		check_rows(dim, rows)?;
		let mut index = self.create(dim, rows.len() / dim);
		index.insert(rows)?;
		Ok(index)
	}

	/// Load from `path`. A missing or partial file yields an empty index with
	/// room for `max_elements` rows.
	pub fn load(
		&self,
		dim: usize,
		path: &Path,
		max_elements: usize,
	) -> Result<Box<dyn VectorIndex>, IndexError> {
		let snapshot = match codec::read_file(path, dim)? {
			Some(s) => s,
			None => return Ok(self.create(dim, max_elements)),
		};
		let count = snapshot.count();
		let capacity = max_elements.max(snapshot.max_elements).max(count);
		let mut index = self.create(dim, capacity);
		index.insert(&snapshot.data)?;
		tracing::debug!(path = %path.display(), count, capacity, "loaded index");
		Ok(index)
	}
}
