// ---------------------------------------------------------------------------
// Solver — implicit-feedback matrix factorization
// ---------------------------------------------------------------------------
//
// The engine only needs two things from a factorization model: train item
// and user factors from a weighted interaction matrix, and fold a single new
// user in against fixed item factors. `AlsSolver` provides both with
// alternating least squares on confidence-weighted implicit feedback
// (Hu, Koren & Volinsky), one Cholesky solve per row.
//
// For a row with confidences c_i over items y_i:
//   A = YᵀY + λI + Σ (c_i - 1) y_i y_iᵀ
//   b = Σ c_i y_i
//   x = A⁻¹ b
// A negative confidence is negative feedback: preference 0, weight |c|.
// ---------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::error::EngineError;
use crate::interactions::{InteractionMatrix, SparseRow};
use crate::matrix::FactorMatrix;

/// Trained factors. Row `i` of `items` belongs to column `i` of the training
/// matrix; row `u` of `users` to its row `u`.
#[derive(Debug, Clone)]
pub struct Factors {
	pub items: FactorMatrix,
	pub users: FactorMatrix,
}

pub trait Solver: Send {
	/// Rank of the factors this solver produces.
	fn factors(&self) -> usize;

	/// Train on a users × items confidence matrix.
	fn fit(&self, user_items: &InteractionMatrix) -> Result<Factors, EngineError>;

	/// Factor vector for one user's interaction row, holding items fixed.
	/// `item_gram` is `item_factors.gram()`, which callers cache between
	/// requests.
	fn recalculate_user(
		&self,
		row: &SparseRow,
		item_factors: &FactorMatrix,
		item_gram: &[f64],
	) -> Result<Vec<f32>, EngineError>;
}

// ---------------------------------------------------------------------------
// ALS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlsConfig {
	pub factors: usize,
	pub iterations: usize,
	pub regularization: f64,
	pub seed: u64,
}

impl Default for AlsConfig {
	fn default() -> Self {
		Self {
			factors: 64,
			iterations: 15,
			regularization: 0.01,
			seed: 42,
		}
	}
}

pub struct AlsSolver {
	config: AlsConfig,
}

impl AlsSolver {
	pub fn new(config: AlsConfig) -> Result<Self, EngineError> {
		if config.factors == 0 {
			return Err(EngineError::InvalidInput("factors must be positive".into()));
		}
		if !(config.regularization > 0.0) {
			return Err(EngineError::InvalidInput(format!(
				"regularization must be positive, got {}",
				config.regularization
			)));
		}
		Ok(Self { config })
	}

	pub fn config(&self) -> &AlsConfig {
		&self.config
	}

	/// One least-squares pass: a new factor row for every row of `matrix`,
	/// holding `fixed` constant.
	fn solve_all(
		&self,
		matrix: &InteractionMatrix,
		fixed: &FactorMatrix,
	) -> Result<FactorMatrix, EngineError> {
		let gram = gram_matrix(fixed.rank(), &fixed.gram());
		let solved: Vec<Vec<f32>> = (0..matrix.n_rows())
			.into_par_iter()
			.map(|r| solve_row(&gram, fixed, matrix.row(r), self.config.regularization))
			.collect::<Result<_, _>>()?;
		FactorMatrix::from_rows(self.config.factors, &solved)
	}

	fn random_factors(&self, rows: usize, rng: &mut StdRng) -> FactorMatrix {
		let data: Vec<f32> = (0..rows * self.config.factors)
			.map(|_| rng.random_range(0.0f32..0.01))
			.collect();
		FactorMatrix::from_flat(self.config.factors, data)
			.unwrap_or_else(|_| FactorMatrix::zeros(rows, self.config.factors))
	}
}

impl Solver for AlsSolver {
	fn factors(&self) -> usize {
		self.config.factors
	}

	fn fit(&self, user_items: &InteractionMatrix) -> Result<Factors, EngineError> {
		let item_users = user_items.transpose();
		let mut rng = StdRng::seed_from_u64(self.config.seed);
		let mut users = self.random_factors(user_items.n_rows(), &mut rng);
		let mut items = self.random_factors(user_items.n_cols(), &mut rng);

		tracing::info!(
			users = user_items.n_rows(),
			items = user_items.n_cols(),
			nnz = user_items.nnz(),
			factors = self.config.factors,
			iterations = self.config.iterations,
			"Fitting ALS model"
		);

		for iteration in 0..self.config.iterations {
			users = self.solve_all(user_items, &items)?;
			items = self.solve_all(&item_users, &users)?;
			tracing::debug!(iteration, "ALS iteration done");
		}

		Ok(Factors { items, users })
	}

	fn recalculate_user(
		&self,
		row: &SparseRow,
		item_factors: &FactorMatrix,
		item_gram: &[f64],
	) -> Result<Vec<f32>, EngineError> {
		let f = self.config.factors;
		if item_factors.rank() != f {
			return Err(EngineError::rank(f, item_factors.rank()));
		}
		if item_gram.len() != f * f {
			return Err(EngineError::Shape {
				expected: format!("{}x{} gram matrix", f, f),
				actual: format!("{} values", item_gram.len()),
			});
		}
		let gram = gram_matrix(f, item_gram);
		solve_row(&gram, item_factors, row, self.config.regularization)
	}
}

fn gram_matrix(rank: usize, gram: &[f64]) -> DMatrix<f64> {
	DMatrix::from_row_slice(rank, rank, gram)
}

fn solve_row(
	gram: &DMatrix<f64>,
	fixed: &FactorMatrix,
	row: &SparseRow,
	regularization: f64,
) -> Result<Vec<f32>, EngineError> {
	let f = fixed.rank();
	let mut a = gram.clone();
	for k in 0..f {
		a[(k, k)] += regularization;
	}
	let mut b = DVector::<f64>::zeros(f);

	for (col, value) in row.iter() {
		if col >= fixed.rows() {
			return Err(EngineError::Shape {
				expected: format!("column < {}", fixed.rows()),
				actual: format!("column {}", col),
			});
		}
		let y = fixed.row(col);
		let confidence = (value as f64).abs();
		if value > 0.0 {
			for k in 0..f {
				b[k] += confidence * y[k] as f64;
			}
		}
		let scale = confidence - 1.0;
		if scale == 0.0 {
			continue;
		}
		for p in 0..f {
			let yp = y[p] as f64 * scale;
			if yp == 0.0 {
				continue;
			}
			for q in 0..f {
				a[(p, q)] += yp * y[q] as f64;
			}
		}
	}

	let cholesky = a
		.cholesky()
		.ok_or_else(|| EngineError::Solver("normal equations are not positive definite".into()))?;
	let x = cholesky.solve(&b);
	Ok(x.iter().map(|v| *v as f32).collect())
}
