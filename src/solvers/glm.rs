//! Pieces shared by the survey-weighted solvers.

use crate::core::{
    ColumnKind, ColumnSpec, FamilyExtras, FitWarning, FittedModel, GlmFamily, ModelFamily,
};
use crate::data::{ModelEncoding, SurveyDesign};
use crate::inference::{estimate_variance, sandwich};
use crate::solvers::EstimationError;
use crate::utils::{to_rows, weighted_cross_product};
use faer::Mat;

/// Newton system of a GLM at the current linear predictor.
///
/// `A = Xᵀ diag(w·info) X` and `U = Xᵀ (w·score)`.
pub(crate) fn newton_system(
    x: &Mat<f64>,
    weights: &[f64],
    score_eta: &[f64],
    info_eta: &[f64],
) -> (Mat<f64>, Vec<f64>) {
    let working: Vec<f64> = weights
        .iter()
        .zip(info_eta.iter())
        .map(|(w, i)| w * i)
        .collect();
    let a = weighted_cross_product(x, &working);

    let p = x.ncols();
    let mut u = vec![0.0; p];
    for i in 0..x.nrows() {
        let s = weights[i] * score_eta[i];
        if s == 0.0 {
            continue;
        }
        for j in 0..p {
            u[j] += s * x[(i, j)];
        }
    }
    (a, u)
}

/// Per-record score contributions `w_i · s_i · x_i` (n × p).
pub(crate) fn glm_scores(x: &Mat<f64>, weights: &[f64], score_eta: &[f64]) -> Mat<f64> {
    Mat::from_fn(x.nrows(), x.ncols(), |i, j| {
        weights[i] * score_eta[i] * x[(i, j)]
    })
}

/// Linearized sandwich covariance from an inverted bread and per-record scores.
pub(crate) fn design_covariance(
    bread_inverse: &Mat<f64>,
    scores: &Mat<f64>,
    design: &SurveyDesign,
) -> Result<Mat<f64>, EstimationError> {
    let meat = estimate_variance(scores, design)?;
    Ok(sandwich(bread_inverse, &meat))
}

/// Position of the intercept column, if any.
pub(crate) fn intercept_position(columns: &[ColumnSpec]) -> Option<usize> {
    columns.iter().position(|c| c.kind == ColumnKind::Intercept)
}

/// Survey-weighted mean of the outcome.
pub(crate) fn weighted_outcome_mean(y: &[f64], weights: &[f64]) -> f64 {
    let sum_w: f64 = weights.iter().sum();
    y.iter()
        .zip(weights.iter())
        .map(|(yi, wi)| yi * wi)
        .sum::<f64>()
        / sum_w
}

/// Weighted deviance at linear predictor `eta` and of the intercept-only model.
pub(crate) fn deviances<F: GlmFamily>(
    family: &F,
    y: &[f64],
    eta: &[f64],
    weights: &[f64],
) -> (f64, f64) {
    let mu: Vec<f64> = eta.iter().map(|&e| family.link_inverse(e)).collect();
    (family.deviance(y, &mu, weights), family.null_deviance(y, weights))
}

/// Warnings that depend only on the design.
pub(crate) fn design_warnings(design: &SurveyDesign) -> Vec<FitWarning> {
    match design.singleton_strata() {
        0 => Vec::new(),
        count => vec![FitWarning::SingletonStrata { count }],
    }
}

/// Everything a solver produces before it is tied to columns and design.
pub(crate) struct FitOutcome {
    pub coefficients: Vec<f64>,
    pub covariance: Mat<f64>,
    pub log_pseudo_likelihood: f64,
    pub converged: bool,
    pub iterations: usize,
    pub warnings: Vec<FitWarning>,
    pub deviance: Option<f64>,
    pub null_deviance: Option<f64>,
    pub extras: FamilyExtras,
}

impl FitOutcome {
    pub(crate) fn into_model(
        self,
        family: ModelFamily,
        columns: Vec<ColumnSpec>,
        design: &SurveyDesign,
        encoding: Option<ModelEncoding>,
    ) -> FittedModel {
        FittedModel {
            family,
            columns,
            coefficients: self.coefficients,
            covariance: to_rows(&self.covariance),
            log_pseudo_likelihood: self.log_pseudo_likelihood,
            converged: self.converged,
            iterations: self.iterations,
            warnings: self.warnings,
            n_observations: design.n_records(),
            n_strata: design.n_strata(),
            n_clusters: design.n_clusters(),
            design_df: design.degrees_of_freedom(),
            sum_weights: design.sum_weights(),
            deviance: self.deviance,
            null_deviance: self.null_deviance,
            extras: self.extras,
            encoding,
        }
    }
}
