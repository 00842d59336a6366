//! Two-sided censored (Tobit) regression under a survey design.
//!
//! The latent outcome `y* = xᵀβ + σε` is observed clamped to `[lower, upper]`.
//! Parameters are `(β, ln σ)`; the log pseudo-likelihood is maximized by
//! Newton-Raphson with analytic derivatives and step halving. When the
//! negative Hessian is not positive definite the step is Levenberg-damped.
//! The reported covariance is the sandwich `H⁻¹ V H⁻¹` built from the
//! observed Hessian and the per-record weighted gradients; it covers the
//! trailing `lnsigma` parameter too.

use crate::core::{
    tobit_contribution, CensoringBranch, CensoringSummary, ColumnSpec, EstimationOptions,
    EstimationOptionsBuilder, FamilyExtras, FitWarning, FittedModel, ModelFamily, OptionsError,
    LN_SIGMA,
};
use crate::data::{ModelEncoding, SurveyDesign};
use crate::solvers::glm::{design_covariance, design_warnings, FitOutcome};
use crate::solvers::traits::{validate_inputs, EstimationError, SurveyEstimator};
use crate::utils::{
    is_positive_definite, mat_vec, max_relative_change, symmetric_inverse, weighted_cross_product,
};
use faer::{Col, Mat};
use tracing::{debug, info, warn};

/// Damping attempts before a non-concave surface is reported.
const MAX_DAMPING_ATTEMPTS: usize = 30;

/// Gradient and curvature below this share of the weight total count as flat.
const FLAT_TOLERANCE: f64 = 1e-8;

/// Log pseudo-likelihood with its gradient and Hessian in `(β, ln σ)`.
struct Evaluation {
    log_likelihood: f64,
    gradient: Vec<f64>,
    hessian: Mat<f64>,
}

/// Survey-weighted two-sided Tobit estimator.
#[derive(Debug, Clone)]
pub struct TobitRegressor {
    options: EstimationOptions,
    lower: f64,
    upper: f64,
}

impl Default for TobitRegressor {
    fn default() -> Self {
        Self::new(EstimationOptions::default(), 0.0, 1.0)
    }
}

impl TobitRegressor {
    /// Create a new regressor censored at `lower` and `upper`.
    pub fn new(options: EstimationOptions, lower: f64, upper: f64) -> Self {
        Self {
            options,
            lower,
            upper,
        }
    }

    /// Create a builder with bounds `[0, 1]`.
    pub fn builder() -> TobitRegressorBuilder {
        TobitRegressorBuilder::default()
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    fn validate_bounds(&self) -> Result<(), EstimationError> {
        if !(self.lower.is_finite() && self.upper.is_finite() && self.lower < self.upper) {
            return Err(OptionsError::InvalidBounds {
                lower: self.lower,
                upper: self.upper,
            }
            .into());
        }
        Ok(())
    }

    fn classify(&self, y: &Col<f64>) -> Result<Vec<CensoringBranch>, EstimationError> {
        (0..y.nrows())
            .map(|i| {
                CensoringBranch::classify(y[i], self.lower, self.upper).ok_or(
                    EstimationError::InvalidOutcome {
                        row: i,
                        value: y[i],
                        expected: "outcome within the censoring bounds",
                    },
                )
            })
            .collect()
    }

    /// Weighted least squares coefficients and residual scale.
    fn starting_values(
        &self,
        x: &Mat<f64>,
        y: &Col<f64>,
        weights: &[f64],
    ) -> Result<Vec<f64>, EstimationError> {
        let n = x.nrows();
        let p = x.ncols();
        let xtwx = weighted_cross_product(x, weights);
        let mut xtwy = vec![0.0; p];
        for i in 0..n {
            for j in 0..p {
                xtwy[j] += weights[i] * x[(i, j)] * y[i];
            }
        }
        let inv = symmetric_inverse(&xtwx, self.options.rank_tolerance)?;
        let mut params = mat_vec(&inv, &xtwy);

        let sum_w: f64 = weights.iter().sum();
        let rss: f64 = (0..n)
            .map(|i| {
                let fitted: f64 = (0..p).map(|j| x[(i, j)] * params[j]).sum();
                weights[i] * (y[i] - fitted).powi(2)
            })
            .sum();
        let sigma = (rss / sum_w).sqrt();
        let sigma = if sigma.is_finite() && sigma > 0.0 {
            sigma
        } else {
            (self.upper - self.lower) / 4.0
        };
        params.push(sigma.ln());
        Ok(params)
    }

    fn evaluate(
        &self,
        x: &Mat<f64>,
        y: &Col<f64>,
        weights: &[f64],
        branches: &[CensoringBranch],
        params: &[f64],
    ) -> Evaluation {
        let p = x.ncols();
        let q = p + 1;
        let ln_sigma = params[p];

        let mut log_likelihood = 0.0;
        let mut gradient = vec![0.0; q];
        let mut hessian: Mat<f64> = Mat::zeros(q, q);

        for i in 0..x.nrows() {
            let eta: f64 = (0..p).map(|j| x[(i, j)] * params[j]).sum();
            let c = tobit_contribution(y[i], eta, ln_sigma, self.lower, self.upper, branches[i]);
            let w = weights[i];

            log_likelihood += w * c.log_likelihood;
            for j in 0..p {
                let xj = x[(i, j)];
                gradient[j] += w * c.d_eta * xj;
                hessian[(j, p)] += w * c.d_eta_s * xj;
                for k in j..p {
                    hessian[(j, k)] += w * c.d_eta_eta * xj * x[(i, k)];
                }
            }
            gradient[p] += w * c.d_s;
            hessian[(p, p)] += w * c.d_s_s;
        }
        for j in 0..q {
            for k in 0..j {
                hessian[(j, k)] = hessian[(k, j)];
            }
        }

        Evaluation {
            log_likelihood,
            gradient,
            hessian,
        }
    }

    /// Per-record weighted gradient contributions (n × (p + 1)).
    fn scores(
        &self,
        x: &Mat<f64>,
        y: &Col<f64>,
        weights: &[f64],
        branches: &[CensoringBranch],
        params: &[f64],
    ) -> Mat<f64> {
        let p = x.ncols();
        let mut scores = Mat::zeros(x.nrows(), p + 1);
        for i in 0..x.nrows() {
            let eta: f64 = (0..p).map(|j| x[(i, j)] * params[j]).sum();
            let c = tobit_contribution(y[i], eta, params[p], self.lower, self.upper, branches[i]);
            for j in 0..p {
                scores[(i, j)] = weights[i] * c.d_eta * x[(i, j)];
            }
            scores[(i, p)] = weights[i] * c.d_s;
        }
        scores
    }

    /// Newton direction from `-H`, Levenberg-damped when `-H` is not positive definite.
    fn newton_direction(&self, eval: &Evaluation) -> Result<Vec<f64>, EstimationError> {
        let q = eval.gradient.len();
        let neg_h = Mat::from_fn(q, q, |i, j| -eval.hessian[(i, j)]);
        if is_positive_definite(&neg_h) {
            if let Ok(inv) = symmetric_inverse(&neg_h, self.options.rank_tolerance) {
                return Ok(mat_vec(&inv, &eval.gradient));
            }
        }

        let scale = (0..q).map(|i| neg_h[(i, i)].abs()).fold(1e-8_f64, f64::max);
        let mut lambda = 1e-4 * scale;
        for _ in 0..MAX_DAMPING_ATTEMPTS {
            let damped = Mat::from_fn(q, q, |i, j| {
                if i == j {
                    neg_h[(i, j)] + lambda
                } else {
                    neg_h[(i, j)]
                }
            });
            if is_positive_definite(&damped) {
                let inv = symmetric_inverse(&damped, self.options.rank_tolerance)?;
                debug!(lambda, "levenberg-damped tobit step");
                return Ok(mat_vec(&inv, &eval.gradient));
            }
            lambda *= 10.0;
        }
        Err(EstimationError::Optimization(
            "censored likelihood surface admits no ascent direction".to_string(),
        ))
    }

    /// Whether the surface at `eval` has no usable curvature: the gradient
    /// vanishes while `-H` is singular or negligible against the weight total.
    fn is_flat(&self, eval: &Evaluation, sum_weights: f64) -> bool {
        let q = eval.gradient.len();
        let threshold = FLAT_TOLERANCE * sum_weights.max(1.0);
        let max_gradient = eval.gradient.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
        if max_gradient > threshold.sqrt() {
            return false;
        }
        let neg_h = Mat::from_fn(q, q, |i, j| -eval.hessian[(i, j)]);
        let curvature = (0..q).map(|i| neg_h[(i, i)].abs()).fold(0.0_f64, f64::max);
        curvature <= threshold
            || !is_positive_definite(&neg_h)
            || symmetric_inverse(&neg_h, self.options.rank_tolerance).is_err()
    }

    fn fit_newton(
        &self,
        x: &Mat<f64>,
        y: &Col<f64>,
        design: &SurveyDesign,
        branches: &[CensoringBranch],
    ) -> Result<FitOutcome, EstimationError> {
        let weights = design.weights();
        let mut params = self.starting_values(x, y, weights)?;
        let mut eval = self.evaluate(x, y, weights, branches, &params);
        if !eval.log_likelihood.is_finite() {
            return Err(EstimationError::Optimization(
                "censored log-likelihood is not finite at the starting values".to_string(),
            ));
        }

        let tol = self.options.tolerance;
        let mut converged = false;
        let mut iterations = 0;
        let mut max_change = f64::INFINITY;

        for iter in 0..self.options.max_iterations {
            iterations = iter + 1;
            let mut step = self.newton_direction(&eval)?;

            let mut accepted = None;
            for _ in 0..=self.options.max_step_halvings {
                let candidate: Vec<f64> =
                    params.iter().zip(step.iter()).map(|(a, s)| a + s).collect();
                let candidate_eval = self.evaluate(x, y, weights, branches, &candidate);
                let current = eval.log_likelihood;
                if candidate_eval.log_likelihood.is_finite()
                    && candidate_eval.log_likelihood >= current - 1e-10 * current.abs().max(1.0)
                {
                    accepted = Some((candidate, candidate_eval));
                    break;
                }
                step.iter_mut().for_each(|s| *s *= 0.5);
            }

            let Some((candidate, candidate_eval)) = accepted else {
                debug!(iteration = iterations, "tobit line search stalled");
                break;
            };

            max_change = max_relative_change(&step, &params);
            params = candidate;
            eval = candidate_eval;

            debug!(
                iteration = iterations,
                max_change,
                log_likelihood = eval.log_likelihood,
                sigma = params[params.len() - 1].exp(),
                "tobit newton step"
            );

            if max_change < tol {
                converged = true;
                break;
            }
        }

        if !converged && self.is_flat(&eval, design.sum_weights()) {
            return Err(EstimationError::Optimization(format!(
                "censored likelihood surface is flat after {iterations} iterations"
            )));
        }

        let q = params.len();
        let neg_h = Mat::from_fn(q, q, |i, j| -eval.hessian[(i, j)]);
        if !is_positive_definite(&neg_h) {
            return Err(EstimationError::Optimization(
                "Hessian is not negative definite at the final estimate".to_string(),
            ));
        }
        let bread_inverse = symmetric_inverse(&neg_h, self.options.rank_tolerance)?;
        let scores = self.scores(x, y, weights, branches, &params);
        let covariance = design_covariance(&bread_inverse, &scores, design)?;

        let mut warnings = design_warnings(design);
        if !converged {
            warn!(iterations, max_change, "tobit fit did not converge");
            warnings.push(FitWarning::NonConvergence {
                iterations,
                max_change,
            });
        }

        let sigma = params[q - 1].exp();
        Ok(FitOutcome {
            coefficients: params,
            covariance,
            log_pseudo_likelihood: eval.log_likelihood,
            converged,
            iterations,
            warnings,
            deviance: None,
            null_deviance: None,
            extras: FamilyExtras::Censored {
                lower: self.lower,
                upper: self.upper,
                sigma,
                censoring: CensoringSummary::from_branches(branches, weights),
            },
        })
    }
}

impl SurveyEstimator for TobitRegressor {
    fn family(&self) -> ModelFamily {
        ModelFamily::TwoSidedCensored
    }

    fn options(&self) -> &EstimationOptions {
        &self.options
    }

    fn fit_design(
        &self,
        x: &Mat<f64>,
        y: &Col<f64>,
        design: &SurveyDesign,
        columns: Vec<ColumnSpec>,
        encoding: Option<ModelEncoding>,
    ) -> Result<FittedModel, EstimationError> {
        self.options.validate()?;
        self.validate_bounds()?;
        validate_inputs(x, y, design, &columns)?;
        let branches = self.classify(y)?;
        if !branches.contains(&CensoringBranch::Uncensored) {
            return Err(EstimationError::Optimization(
                "no outcome lies strictly inside the bounds; the scale is not identified"
                    .to_string(),
            ));
        }

        let outcome = self.fit_newton(x, y, design, &branches)?;
        if let FamilyExtras::Censored {
            sigma, censoring, ..
        } = &outcome.extras
        {
            info!(
                n = x.nrows(),
                n_lower = censoring.n_lower,
                n_upper = censoring.n_upper,
                sigma = *sigma,
                iterations = outcome.iterations,
                converged = outcome.converged,
                "tobit fit complete"
            );
        }

        let mut columns = columns;
        columns.push(ColumnSpec::ancillary(LN_SIGMA));
        Ok(outcome.into_model(ModelFamily::TwoSidedCensored, columns, design, encoding))
    }
}

/// Builder for `TobitRegressor`.
#[derive(Debug, Clone)]
pub struct TobitRegressorBuilder {
    options_builder: EstimationOptionsBuilder,
    lower: f64,
    upper: f64,
}

impl Default for TobitRegressorBuilder {
    fn default() -> Self {
        Self {
            options_builder: EstimationOptionsBuilder::default(),
            lower: 0.0,
            upper: 1.0,
        }
    }
}

impl TobitRegressorBuilder {
    /// Start from existing options.
    pub fn options(mut self, options: EstimationOptions) -> Self {
        self.options_builder = EstimationOptionsBuilder::from(options);
        self
    }

    /// Set the lower censoring bound.
    pub fn lower(mut self, lower: f64) -> Self {
        self.lower = lower;
        self
    }

    /// Set the upper censoring bound.
    pub fn upper(mut self, upper: f64) -> Self {
        self.upper = upper;
        self
    }

    /// Set whether to include an intercept term for raw matrices.
    pub fn with_intercept(mut self, include: bool) -> Self {
        self.options_builder = self.options_builder.with_intercept(include);
        self
    }

    /// Set the maximum Newton iterations.
    pub fn max_iterations(mut self, max_iter: usize) -> Self {
        self.options_builder = self.options_builder.max_iterations(max_iter);
        self
    }

    /// Set the convergence tolerance.
    pub fn tolerance(mut self, tol: f64) -> Self {
        self.options_builder = self.options_builder.tolerance(tol);
        self
    }

    /// Build the regressor. Options and bounds are validated when fitting.
    pub fn build(self) -> TobitRegressor {
        TobitRegressor::new(self.options_builder.build_unchecked(), self.lower, self.upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn paired_design(n: usize) -> SurveyDesign {
        let strata: Vec<String> = (0..n).map(|i| (i % 4).to_string()).collect();
        let clusters: Vec<String> = (0..n).map(|i| ((i / 4) % 2).to_string()).collect();
        SurveyDesign::from_columns(&vec![1.0; n], &strata, &clusters).unwrap()
    }

    #[test]
    fn test_rejects_out_of_bounds_outcome() {
        let x = Mat::zeros(8, 0);
        let y = Col::from_fn(8, |i| if i == 4 { 1.2 } else { 0.1 * i as f64 });
        assert!(matches!(
            TobitRegressor::builder().build().fit(&x, &y, &paired_design(8)),
            Err(EstimationError::InvalidOutcome { row: 4, .. })
        ));
    }

    #[test]
    fn test_invalid_bounds() {
        let x = Mat::zeros(8, 0);
        let y = Col::from_fn(8, |_| 0.5);
        let result = TobitRegressor::builder()
            .lower(1.0)
            .upper(0.0)
            .build()
            .fit(&x, &y, &paired_design(8));
        assert!(matches!(
            result,
            Err(EstimationError::InvalidOptions(OptionsError::InvalidBounds { .. }))
        ));
    }

    #[test]
    fn test_uncensored_data_match_weighted_least_squares() {
        let n = 16;
        let x = Mat::from_fn(n, 1, |i, _| (i % 4) as f64);
        let y = Col::from_fn(n, |i| 0.2 + 0.1 * (i % 4) as f64 + [0.03, -0.02, 0.01, -0.02][i / 4]);
        let model = TobitRegressor::builder()
            .build()
            .fit(&x, &y, &paired_design(n))
            .unwrap();

        assert!(model.converged);
        assert_eq!(model.column_names(), vec!["(Intercept)", "x0", "lnsigma"]);
        assert_relative_eq!(model.coefficients[1], 0.1, epsilon = 1e-6);
        assert_eq!(model.censoring().unwrap().n_uncensored, n);
        let cov = model.covariance_mat();
        assert_eq!(cov.nrows(), 3);
        assert!(cov[(2, 2)] >= 0.0);
    }

    #[test]
    fn test_flat_surface_detection() {
        let regressor = TobitRegressor::default();
        let flat = Evaluation {
            log_likelihood: 0.0,
            gradient: vec![0.0, 1e-12],
            hessian: Mat::zeros(2, 2),
        };
        assert!(regressor.is_flat(&flat, 40.0));

        let curved = Evaluation {
            log_likelihood: -3.0,
            gradient: vec![0.0, 0.0],
            hessian: Mat::from_fn(2, 2, |i, j| if i == j { -5.0 } else { -1.0 }),
        };
        assert!(!regressor.is_flat(&curved, 40.0));

        let steep = Evaluation {
            log_likelihood: -3.0,
            gradient: vec![2.0, 0.0],
            hessian: Mat::zeros(2, 2),
        };
        assert!(!regressor.is_flat(&steep, 40.0));
    }

    #[test]
    fn test_branch_counts() {
        let n = 16;
        let x = Mat::from_fn(n, 1, |i, _| (i % 4) as f64);
        let y = Col::from_fn(n, |i| [0.0, 0.3, 0.6, 1.0, 0.1, 0.0, 0.8, 1.0][i % 8]);
        let model = TobitRegressor::builder()
            .build()
            .fit(&x, &y, &paired_design(n))
            .unwrap();
        let censoring = model.censoring().unwrap();
        assert_eq!(censoring.n_lower, 4);
        assert_eq!(censoring.n_upper, 4);
        assert_eq!(censoring.n_uncensored, 8);
        assert!(model.sigma().unwrap() > 0.0);
    }
}
