//! Acquisition functions scoring candidate points from the surrogate
//! posterior. Pure functions over equal-length mean/variance slices; the
//! session picks the argmax-scoring candidate as the next proposal.

use serde::{Deserialize, Serialize};

/// Which acquisition function a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionKind {
    /// Expected Improvement.
    #[serde(rename = "ei")]
    Ei,
    /// Upper Confidence Bound.
    #[serde(rename = "ucb")]
    Ucb,
}

impl Default for AcquisitionKind {
    fn default() -> Self {
        Self::Ei
    }
}

impl AcquisitionKind {
    /// Score a candidate pool with this acquisition. `best` is the current
    /// best observed target (only EI uses it), `xi`/`kappa` the respective
    /// exploration knobs.
    pub fn score(
        &self,
        mean: &[f64],
        variance: &[f64],
        best: f64,
        xi: f64,
        kappa: f64,
    ) -> Vec<f64> {
        match self {
            Self::Ei => expected_improvement(mean, variance, best, xi),
            Self::Ucb => upper_confidence_bound(mean, variance, kappa),
        }
    }
}

/// Expected Improvement over the current best, with exploration margin `xi`.
///
/// `EI = (mu - best - xi) * Phi(z) + sigma * phi(z)` with
/// `z = (mu - best - xi) / sigma`; a point with zero posterior uncertainty
/// scores zero (nothing left to learn there).
pub fn expected_improvement(mean: &[f64], variance: &[f64], best: f64, xi: f64) -> Vec<f64> {
    debug_assert_eq!(mean.len(), variance.len());
    mean.iter()
        .zip(variance)
        .map(|(&mu, &var)| {
            let sigma = var.max(0.0).sqrt();
            if sigma < 1e-12 {
                return 0.0;
            }
            let improvement = mu - best - xi;
            let z = improvement / sigma;
            (improvement * norm_cdf(z) + sigma * norm_pdf(z)).max(0.0)
        })
        .collect()
}

/// Upper Confidence Bound: `mu + kappa * sigma`. Larger `kappa` explores more.
pub fn upper_confidence_bound(mean: &[f64], variance: &[f64], kappa: f64) -> Vec<f64> {
    debug_assert_eq!(mean.len(), variance.len());
    mean.iter()
        .zip(variance)
        .map(|(&mu, &var)| mu + kappa * var.max(0.0).sqrt())
        .collect()
}

/// Standard normal PDF.
pub fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF, Abramowitz-Stegun rational approximation
/// (absolute error below 1e-7, ample for ranking candidates).
pub fn norm_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }

    let abs_x = x.abs();
    let t = 1.0 / (1.0 + 0.231_641_9 * abs_x);
    let t2 = t * t;
    let t3 = t2 * t;
    let t4 = t3 * t;
    let t5 = t4 * t;

    let poly = 0.319_381_530 * t - 0.356_563_782 * t2 + 1.781_477_937 * t3 - 1.821_255_978 * t4
        + 1.330_274_429 * t5;
    let cdf = 1.0 - norm_pdf(abs_x) * poly;

    if x >= 0.0 {
        cdf
    } else {
        1.0 - cdf
    }
}
