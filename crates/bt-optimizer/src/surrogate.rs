//! Gaussian-process surrogate model over observed (feature vector, target)
//! pairs.
//!
//! The model is refit from scratch on every [`GaussianProcess::fit`] call.
//! At the observation counts a backtest search produces (tens to a few
//! hundred points) the O(n³) refit is cheap next to a single evaluation, and
//! a fresh Cholesky factorization is far better conditioned than maintaining
//! an incremental dense inverse.

use tracing::warn;

use bt_types::{BtError, BtResult};

/// Escalating diagonal jitter applied when the kernel matrix is not
/// positive definite (duplicate or near-duplicate rows).
const JITTER_SCHEDULE: [f64; 4] = [1e-10, 1e-8, 1e-6, 1e-4];

/// Posterior mean and variance at a batch of query points.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

/// Squared-exponential (RBF) Gaussian process regressor.
///
/// `k(x, y) = signal_variance * exp(-0.5 * ||x - y||^2 / length_scale^2)`
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    length_scale: f64,
    signal_variance: f64,
    noise_variance: f64,
    fitted: Option<Fitted>,
    fit_count: usize,
}

/// State captured by a successful fit: the training design, the Cholesky
/// factor L of the regularized Gram matrix, and alpha = K^-1 y.
#[derive(Debug, Clone)]
struct Fitted {
    x_train: Vec<Vec<f64>>,
    chol: Vec<Vec<f64>>,
    alpha: Vec<f64>,
}

impl GaussianProcess {
    pub fn new() -> Self {
        Self {
            length_scale: 1.0,
            signal_variance: 1.0,
            noise_variance: 1e-6,
            fitted: None,
            fit_count: 0,
        }
    }

    pub fn with_length_scale(mut self, length_scale: f64) -> Self {
        self.length_scale = length_scale;
        self
    }

    pub fn with_signal_variance(mut self, signal_variance: f64) -> Self {
        self.signal_variance = signal_variance;
        self
    }

    pub fn with_noise_variance(mut self, noise_variance: f64) -> Self {
        self.noise_variance = noise_variance;
        self
    }

    /// Number of successful fits since construction. Diagnostic; lets a
    /// session report whether the surrogate was ever actually used.
    pub fn fit_count(&self) -> usize {
        self.fit_count
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        let sq_dist: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
        self.signal_variance * (-0.5 * sq_dist / (self.length_scale * self.length_scale)).exp()
    }

    /// Fit the process to training data, replacing any previous fit.
    ///
    /// Builds the Gram matrix with `noise_variance` on the diagonal and
    /// Cholesky-factorizes it. A non-positive-definite matrix is retried
    /// with escalating jitter before surfacing [`BtError::Numerical`].
    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> BtResult<()> {
        if x.len() < 2 {
            return Err(BtError::Numerical(format!(
                "surrogate needs at least 2 observations, got {}",
                x.len()
            )));
        }
        if x.len() != y.len() {
            return Err(BtError::Numerical(format!(
                "design has {} rows but {} targets",
                x.len(),
                y.len()
            )));
        }
        let dims = x[0].len();
        if x.iter().any(|row| row.len() != dims) {
            return Err(BtError::Numerical(
                "inconsistent feature-vector widths in design".to_string(),
            ));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(BtError::Numerical(
                "non-finite target in training data".to_string(),
            ));
        }

        let n = x.len();
        let mut gram = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..=i {
                let k = self.kernel(&x[i], &x[j]);
                gram[i][j] = k;
                gram[j][i] = k;
            }
            gram[i][i] += self.noise_variance;
        }

        let mut chol = cholesky(&gram);
        if chol.is_none() {
            for &jitter in &JITTER_SCHEDULE {
                warn!(jitter, "kernel matrix not positive definite, retrying with jitter");
                let mut regularized = gram.clone();
                for (i, row) in regularized.iter_mut().enumerate() {
                    row[i] += jitter;
                }
                chol = cholesky(&regularized);
                if chol.is_some() {
                    break;
                }
            }
        }
        let chol = chol.ok_or_else(|| {
            BtError::Numerical("kernel matrix not positive definite after jitter".to_string())
        })?;

        // alpha = K^-1 y via the factor: L L^T alpha = y
        let alpha = solve_upper(&chol, &solve_lower(&chol, y));

        self.fitted = Some(Fitted {
            x_train: x.to_vec(),
            chol,
            alpha,
        });
        self.fit_count += 1;
        Ok(())
    }

    /// Posterior mean and variance at each query point. Variance is clamped
    /// non-negative to guard against round-off.
    pub fn predict(&self, queries: &[Vec<f64>]) -> BtResult<Prediction> {
        let fitted = self.fitted.as_ref().ok_or_else(|| {
            BtError::Numerical("predict called before fit".to_string())
        })?;

        let mut mean = Vec::with_capacity(queries.len());
        let mut variance = Vec::with_capacity(queries.len());
        for query in queries {
            let k_star: Vec<f64> = fitted
                .x_train
                .iter()
                .map(|row| self.kernel(query, row))
                .collect();

            let mu: f64 = k_star.iter().zip(&fitted.alpha).map(|(k, a)| k * a).sum();

            // var = k(x, x) - ||L^-1 k*||^2
            let v = solve_lower(&fitted.chol, &k_star);
            let var = self.kernel(query, query) - v.iter().map(|x| x * x).sum::<f64>();

            mean.push(mu);
            variance.push(var.max(0.0));
        }
        Ok(Prediction { mean, variance })
    }
}

impl Default for GaussianProcess {
    fn default() -> Self {
        Self::new()
    }
}

/// Cholesky decomposition of a symmetric positive-definite matrix.
/// Returns the lower-triangular factor, or `None` if not positive definite.
fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let diag = matrix[i][i] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[i][j] = diag.sqrt();
            } else {
                l[i][j] = (matrix[i][j] - sum) / l[j][j];
            }
        }
    }
    Some(l)
}

/// Forward substitution: solve L x = b.
fn solve_lower(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i][j] * x[j];
        }
        x[i] = sum / l[i][i];
    }
    x
}

/// Backward substitution: solve L^T x = b.
fn solve_upper(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= l[j][i] * x[j];
        }
        x[i] = sum / l[i][i];
    }
    x
}
