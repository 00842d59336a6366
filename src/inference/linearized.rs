//! Linearized (Taylor-series) variance estimation.
//!
//! A statistic that is a weighted sum of per-record contributions has its
//! design-based covariance estimated from those contributions ("scores"):
//!
//! 1. total the scores within each cluster,
//! 2. within every stratum h with n_h ≥ 2 clusters, add
//!    `n_h/(n_h - 1) · Σ_c (z_hc - z̄_h)(z_hc - z̄_h)ᵀ`,
//! 3. strata with a single cluster add nothing.
//!
//! Cluster totals are accumulated in sorted (stratum, cluster) order.

use crate::data::SurveyDesign;
use crate::solvers::EstimationError;
use crate::utils::symmetrize;
use faer::Mat;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Sum per-record scores (n × p) within each cluster (n_clusters × p).
pub fn cluster_totals(scores: &Mat<f64>, design: &SurveyDesign) -> Mat<f64> {
    let p = scores.ncols();
    let mut totals = Mat::zeros(design.n_clusters(), p);
    for i in 0..scores.nrows() {
        let c = design.cluster_of(i);
        for j in 0..p {
            totals[(c, j)] += scores[(i, j)];
        }
    }
    totals
}

/// Design-based covariance of a statistic from its per-record scores.
///
/// Fails with [`EstimationError::SingularDesign`] when every stratum has a
/// single cluster.
pub fn estimate_variance(
    scores: &Mat<f64>,
    design: &SurveyDesign,
) -> Result<Mat<f64>, EstimationError> {
    if scores.nrows() != design.n_records() {
        return Err(EstimationError::DimensionMismatch {
            x_rows: scores.nrows(),
            y_len: design.n_records(),
        });
    }
    if design.is_singular() {
        return Err(EstimationError::SingularDesign {
            n_strata: design.n_strata(),
        });
    }

    let p = scores.ncols();
    let totals = cluster_totals(scores, design);

    // Stratum means of the cluster totals
    let n_strata = design.n_strata();
    let mut means: Mat<f64> = Mat::zeros(n_strata, p);
    for c in 0..design.n_clusters() {
        let h = design.stratum_of_cluster(c);
        for j in 0..p {
            means[(h, j)] += totals[(c, j)];
        }
    }
    for h in 0..n_strata {
        let n_h = design.clusters_in_stratum(h).max(1) as f64;
        for j in 0..p {
            means[(h, j)] /= n_h;
        }
    }

    let mut meat: Mat<f64> = Mat::zeros(p, p);
    let mut deviation = vec![0.0; p];
    for c in 0..design.n_clusters() {
        let h = design.stratum_of_cluster(c);
        let n_h = design.clusters_in_stratum(h);
        if n_h < 2 {
            continue;
        }
        let scale = n_h as f64 / (n_h as f64 - 1.0);
        for j in 0..p {
            deviation[j] = totals[(c, j)] - means[(h, j)];
        }
        for j in 0..p {
            let dj = scale * deviation[j];
            for k in 0..p {
                meat[(j, k)] += dj * deviation[k];
            }
        }
    }

    symmetrize(&mut meat);
    debug!(
        n_clusters = design.n_clusters(),
        n_strata = n_strata,
        singleton_strata = design.singleton_strata(),
        dim = p,
        "linearized variance"
    );
    Ok(meat)
}

/// Sandwich covariance A⁻¹ V A⁻¹ from an inverted bread and a meat matrix.
pub fn sandwich(bread_inverse: &Mat<f64>, meat: &Mat<f64>) -> Mat<f64> {
    let left = bread_inverse * meat;
    let mut cov = &left * bread_inverse;
    symmetrize(&mut cov);
    cov
}

/// A design-weighted mean and its linearized standard error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedMean {
    pub estimate: f64,
    pub std_error: f64,
    pub sum_weights: f64,
    pub df: usize,
}

/// Weighted mean Σwy/Σw with scores (w/Σw)(y - ȳ).
pub fn weighted_mean(y: &[f64], design: &SurveyDesign) -> Result<WeightedMean, EstimationError> {
    if y.len() != design.n_records() {
        return Err(EstimationError::DimensionMismatch {
            x_rows: design.n_records(),
            y_len: y.len(),
        });
    }
    let weights = design.weights();
    let sum_w: f64 = weights.iter().sum();
    if !(sum_w > 0.0) {
        return Err(EstimationError::InvalidWeights(
            "sum of weights must be positive".to_string(),
        ));
    }

    let estimate = y
        .iter()
        .zip(weights.iter())
        .map(|(&yi, &wi)| wi * yi)
        .sum::<f64>()
        / sum_w;

    let scores = Mat::from_fn(y.len(), 1, |i, _| weights[i] / sum_w * (y[i] - estimate));
    let variance = estimate_variance(&scores, design)?;

    Ok(WeightedMean {
        estimate,
        std_error: variance[(0, 0)].max(0.0).sqrt(),
        sum_weights: sum_w,
        df: design.degrees_of_freedom(),
    })
}
