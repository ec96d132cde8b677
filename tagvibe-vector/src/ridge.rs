// ---------------------------------------------------------------------------
// Ridge regression
// ---------------------------------------------------------------------------
//
// Closed-form L2-regularized least squares with optional intercept and any
// number of targets. The intercept is fit by centering X and Y, so it is not
// penalized. When there are fewer samples than features the dual form
// Xᵀ(XXᵀ + αI)⁻¹Y is solved instead of (XᵀX + αI)⁻¹XᵀY; both give the same
// coefficients.
// ---------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct RidgeFit {
	/// n_features x n_targets
	pub coefficients: DMatrix<f64>,
	/// One entry per target; zero when fit without intercept.
	pub intercept: DVector<f64>,
	/// Coefficient of determination on the training data, averaged uniformly
	/// over targets.
	pub r2: f64,
}

impl RidgeFit {
	pub fn predict(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
		let mut out = x * &self.coefficients;
		for j in 0..out.ncols() {
			for i in 0..out.nrows() {
				out[(i, j)] += self.intercept[j];
			}
		}
		out
	}
}

pub fn fit_ridge(
	x: &DMatrix<f64>,
	y: &DMatrix<f64>,
	alpha: f64,
	fit_intercept: bool,
) -> Result<RidgeFit, EngineError> {
	if x.nrows() != y.nrows() {
		return Err(EngineError::dimension("ridge samples", x.nrows(), y.nrows()));
	}
	if x.nrows() == 0 {
		return Err(EngineError::EmptyInput("ridge regression needs at least one sample".into()));
	}
	if !(alpha >= 0.0) {
		return Err(EngineError::InvalidParameter(format!(
			"ridge alpha must be >= 0, got {alpha}"
		)));
	}

	let (xc, yc, x_mean, y_mean) = if fit_intercept {
		let x_mean = column_means(x);
		let y_mean = column_means(y);
		(center(x, &x_mean), center(y, &y_mean), x_mean, y_mean)
	} else {
		(
			x.clone(),
			y.clone(),
			DVector::zeros(x.ncols()),
			DVector::zeros(y.ncols()),
		)
	};

	let coefficients = if xc.nrows() < xc.ncols() {
		let gram = &xc * xc.transpose() + DMatrix::identity(xc.nrows(), xc.nrows()) * alpha;
		let dual = solve_spd(gram, &yc)?;
		xc.transpose() * dual
	} else {
		let gram = xc.transpose() * &xc + DMatrix::identity(xc.ncols(), xc.ncols()) * alpha;
		solve_spd(gram, &(xc.transpose() * &yc))?
	};

	let intercept = if fit_intercept {
		&y_mean - coefficients.transpose() * &x_mean
	} else {
		DVector::zeros(y.ncols())
	};

	let mut fit = RidgeFit {
		coefficients,
		intercept,
		r2: 0.0,
	};
	fit.r2 = r2_score(y, &fit.predict(x));
	Ok(fit)
}

/// Cholesky when the system is positive definite, LU otherwise (alpha = 0
/// with a singular Gram matrix fails here).
fn solve_spd(a: DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>, EngineError> {
	if let Some(chol) = a.clone().cholesky() {
		return Ok(chol.solve(b));
	}
	a.lu()
		.solve(b)
		.ok_or_else(|| EngineError::Numerical("ridge system is singular".into()))
}

fn column_means(m: &DMatrix<f64>) -> DVector<f64> {
	let n = m.nrows().max(1) as f64;
	DVector::from_iterator(m.ncols(), m.column_iter().map(|c| c.sum() / n))
}

fn center(m: &DMatrix<f64>, means: &DVector<f64>) -> DMatrix<f64> {
	let mut out = m.clone();
	for j in 0..out.ncols() {
		for i in 0..out.nrows() {
			out[(i, j)] -= means[j];
		}
	}
	out
}

/// Uniform average over targets of `1 - SS_res / SS_tot`. A constant target
/// scores 1 when predicted exactly and 0 otherwise.
pub fn r2_score(y: &DMatrix<f64>, pred: &DMatrix<f64>) -> f64 {
	if y.ncols() == 0 {
		return 0.0;
	}
	let means = column_means(y);
	let mut total = 0.0;
	for j in 0..y.ncols() {
		let mut ss_res = 0.0;
		let mut ss_tot = 0.0;
		for i in 0..y.nrows() {
			let r = y[(i, j)] - pred[(i, j)];
			let t = y[(i, j)] - means[j];
			ss_res += r * r;
			ss_tot += t * t;
		}
		total += if ss_tot > 0.0 {
			1.0 - ss_res / ss_tot
		} else if ss_res == 0.0 {
			1.0
		} else {
			0.0
		};
	}
	total / y.ncols() as f64
}
