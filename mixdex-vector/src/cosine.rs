// ---------------------------------------------------------------------------
// Vector math shared by the exact index, the MIPS adapter and the solver.
// Accumulates in f64 and hands back f32, the storage type of every factor.
// ---------------------------------------------------------------------------

/// Inner product of two equal-length vectors. Mismatched lengths give 0.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() {
		return 0.0;
	}
	let mut sum: f64 = 0.0;
	for i in 0..a.len() {
		sum += a[i] as f64 * b[i] as f64;
	}
	sum as f32
}

/// L2 norm of a vector.
pub fn norm(v: &[f32]) -> f32 {
	let mut sum: f64 = 0.0;
	for &x in v {
		let xf = x as f64;
		sum += xf * xf;
	}
	sum.sqrt() as f32
}

/// Cosine distance `1 - cos(a, b)` in `[0, 2]`.
///
/// Zero-magnitude vectors are at distance 1 from everything, which keeps them
/// out of the head of any ranking without producing NaN.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() || a.is_empty() {
		return 1.0;
	}

	let mut dot: f64 = 0.0;
	let mut norm_a: f64 = 0.0;
	let mut norm_b: f64 = 0.0;
	for i in 0..a.len() {
		let ai = a[i] as f64;
		let bi = b[i] as f64;
		dot += ai * bi;
		norm_a += ai * ai;
		norm_b += bi * bi;
	}

	let denom = norm_a.sqrt() * norm_b.sqrt();
	if denom == 0.0 {
		return 1.0;
	}
	let cos = dot / denom;
	if !cos.is_finite() {
		return 1.0;
	}
	(1.0 - cos.clamp(-1.0, 1.0)) as f32
}
