// ---------------------------------------------------------------------------
// FactorMatrix — dense row-major factor storage
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Dense matrix with one row per entity and `rank` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorMatrix {
	rank: usize,
	data: Vec<f32>,
}

impl FactorMatrix {
	/// An empty matrix with `rank` columns.
	pub fn empty(rank: usize) -> Self {
		Self {
			rank,
			data: Vec::new(),
		}
	}

	/// A matrix of zeros.
	pub fn zeros(rows: usize, rank: usize) -> Self {
		Self {
			rank,
			data: vec![0.0; rows * rank],
		}
	}

	/// Wrap row-major data. `data.len()` must be a multiple of `rank`.
	pub fn from_flat(rank: usize, data: Vec<f32>) -> Result<Self, EngineError> {
		if rank == 0 {
			return Err(EngineError::InvalidInput("rank must be positive".into()));
		}
		if data.len() % rank != 0 {
			return Err(EngineError::Shape {
				expected: format!("a multiple of {} values", rank),
				actual: format!("{} values", data.len()),
			});
		}
		Ok(Self { rank, data })
	}

	/// Build from individual rows; every row must have `rank` values.
	pub fn from_rows(rank: usize, rows: &[Vec<f32>]) -> Result<Self, EngineError> {
		let mut data = Vec::with_capacity(rows.len() * rank);
		for row in rows {
			if row.len() != rank {
				return Err(EngineError::rank(rank, row.len()));
			}
			data.extend_from_slice(row);
		}
		Ok(Self { rank, data })
	}

	/// A single-row matrix.
	pub fn from_row(row: Vec<f32>) -> Self {
		Self {
			rank: row.len(),
			data: row,
		}
	}

	pub fn rank(&self) -> usize {
		self.rank
	}

	pub fn rows(&self) -> usize {
		if self.rank == 0 {
			0
		} else {
			self.data.len() / self.rank
		}
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	pub fn row(&self, i: usize) -> &[f32] {
		&self.data[i * self.rank..(i + 1) * self.rank]
	}

	pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
		self.data.chunks_exact(self.rank.max(1))
	}

	pub fn as_slice(&self) -> &[f32] {
		&self.data
	}

	/// Append all rows of `other`. Ranks must agree.
	pub fn append(&mut self, other: &FactorMatrix) -> Result<(), EngineError> {
		if other.rank != self.rank {
			return Err(EngineError::rank(self.rank, other.rank));
		}
		self.data.extend_from_slice(&other.data);
		Ok(())
	}

	/// A `rank + 1` matrix: each row followed by `extra(row)`.
	pub fn with_extra_column(&self, extra: impl Fn(&[f32]) -> f32) -> FactorMatrix {
		let mut data = Vec::with_capacity(self.rows() * (self.rank + 1));
		for row in self.iter_rows() {
			data.extend_from_slice(row);
			data.push(extra(row));
		}
		FactorMatrix {
			rank: self.rank + 1,
			data,
		}
	}

	/// `Yᵀ Y` as a row-major `rank × rank` buffer.
	pub fn gram(&self) -> Vec<f64> {
		let f = self.rank;
		let mut out = vec![0.0f64; f * f];
		for row in self.iter_rows() {
			for a in 0..f {
				let ra = row[a] as f64;
				if ra == 0.0 {
					continue;
				}
				for b in a..f {
					out[a * f + b] += ra * row[b] as f64;
				}
			}
		}
		for a in 0..f {
			for b in 0..a {
				out[a * f + b] = out[b * f + a];
			}
		}
		out
	}
}
