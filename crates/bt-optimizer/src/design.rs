//! Space-filling initial designs: Latin Hypercube Sampling and random fallback.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use bt_types::BtResult;

use crate::space::{Assignment, ParameterSpace};

/// Quality criterion for [`optimized_lhs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LhsCriterion {
    /// Maximize the minimum pairwise Euclidean distance between samples.
    Maximin,
    /// Minimize the maximum absolute pairwise Pearson correlation
    /// between dimensions (scored as its negation, larger is better).
    Correlation,
}

/// Generate `n` Latin Hypercube rows in the unit cube `[0, 1]^dims`.
///
/// Each dimension is divided into `n` equal strata with exactly one sample
/// per stratum (the stratum midpoint if `centered`, else uniform within the
/// stratum), and the per-dimension samples are permuted independently. This
/// guarantees even marginal coverage; joint coverage is improved over
/// independent sampling but not guaranteed.
pub fn unit_lhs(n: usize, dims: usize, centered: bool, rng: &mut impl Rng) -> Vec<Vec<f64>> {
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(dims);
    for _ in 0..dims {
        let mut column: Vec<f64> = (0..n)
            .map(|stratum| {
                let offset = if centered { 0.5 } else { rng.random_range(0.0..1.0) };
                (stratum as f64 + offset) / n as f64
            })
            .collect();
        column.shuffle(rng);
        columns.push(column);
    }
    (0..n)
        .map(|row| columns.iter().map(|col| col[row]).collect())
        .collect()
}

/// Generate `n` assignments via Latin Hypercube Sampling over the space's
/// feature dimensions, mapped back through [`ParameterSpace::decode`].
///
/// `n < 2` degenerates to plain random sampling (a hypercube needs at least
/// two strata to stratify anything).
pub fn lhs(
    space: &ParameterSpace,
    n: usize,
    centered: bool,
    rng: &mut impl Rng,
) -> BtResult<Vec<Assignment>> {
    if n < 2 {
        return Ok((0..n).map(|_| space.sample_random(rng)).collect());
    }
    unit_lhs(n, space.width(), centered, rng)
        .iter()
        .map(|row| space.decode(row))
        .collect()
}

/// Draw `iterations` independent LHS designs and keep the one with the best
/// score under `criterion`.
pub fn optimized_lhs(
    space: &ParameterSpace,
    n: usize,
    iterations: usize,
    criterion: LhsCriterion,
    rng: &mut impl Rng,
) -> BtResult<Vec<Assignment>> {
    if n < 2 {
        return Ok((0..n).map(|_| space.sample_random(rng)).collect());
    }
    let dims = space.width();
    let mut best: Option<(f64, Vec<Vec<f64>>)> = None;
    for _ in 0..iterations.max(1) {
        let design = unit_lhs(n, dims, false, rng);
        let score = match criterion {
            LhsCriterion::Maximin => maximin_score(&design),
            LhsCriterion::Correlation => correlation_score(&design),
        };
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, design));
        }
    }
    let (_, design) = best.expect("at least one design drawn");
    design.iter().map(|row| space.decode(row)).collect()
}

/// Plain random design, used when stratification is not applicable.
pub fn random_design(space: &ParameterSpace, n: usize, rng: &mut impl Rng) -> Vec<Assignment> {
    (0..n).map(|_| space.sample_random(rng)).collect()
}

/// Minimum pairwise Euclidean distance across all sample pairs. Larger is
/// better (samples spread apart).
pub fn maximin_score(design: &[Vec<f64>]) -> f64 {
    let mut min_dist = f64::INFINITY;
    for i in 0..design.len() {
        for j in (i + 1)..design.len() {
            let dist: f64 = design[i]
                .iter()
                .zip(&design[j])
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            min_dist = min_dist.min(dist);
        }
    }
    min_dist
}

/// Negative of the maximum absolute pairwise Pearson correlation between
/// dimensions. Larger (closer to zero) is better.
pub fn correlation_score(design: &[Vec<f64>]) -> f64 {
    let n = design.len();
    if n < 2 || design[0].len() < 2 {
        return 0.0;
    }
    let dims = design[0].len();
    let mut max_abs = 0.0_f64;
    for a in 0..dims {
        for b in (a + 1)..dims {
            let corr = pearson(design.iter().map(|r| r[a]), design.iter().map(|r| r[b]), n);
            max_abs = max_abs.max(corr.abs());
        }
    }
    -max_abs
}

fn pearson(
    xs: impl Iterator<Item = f64> + Clone,
    ys: impl Iterator<Item = f64> + Clone,
    n: usize,
) -> f64 {
    let nf = n as f64;
    let mean_x = xs.clone().sum::<f64>() / nf;
    let mean_y = ys.clone().sum::<f64>() / nf;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x) * (x - mean_x);
        var_y += (y - mean_y) * (y - mean_y);
    }
    let denom = (var_x * var_y).sqrt();
    if denom < f64::EPSILON {
        0.0
    } else {
        cov / denom
    }
}
