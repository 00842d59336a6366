//! Survey-weighted logistic regression.
//!
//! Pseudo-maximum likelihood with the binomial-logit family. The Newton
//! iteration is IRLS written in update form,
//!
//! `β ← β + (Xᵀ W X)⁻¹ Xᵀ w (y − μ)`, `W = w μ(1 − μ)`,
//!
//! with `1 − μ` evaluated as `expit(−η)` so residuals and working weights keep
//! their precision near 0 and 1. The reported covariance is the linearized
//! sandwich `A⁻¹ V A⁻¹`; the model-based inverse information is never used.
//!
//! # Example
//!
//! ```rust,ignore
//! use survey_regress::solvers::{BinomialRegressor, SurveyEstimator};
//!
//! let model = BinomialRegressor::logistic()
//!     .tolerance(1e-10)
//!     .build()
//!     .fit_frame(&frame)?;
//!
//! let or = model.coefficient("poverty[Poor]").map(f64::exp);
//! ```

use crate::core::{
    expit, BinomialFamily, ColumnSpec, EstimationOptions, EstimationOptionsBuilder, FamilyExtras,
    FitWarning, FittedModel, GlmFamily, LinkFunction, ModelFamily,
};
use crate::data::{ModelEncoding, SurveyDesign};
use crate::solvers::glm::{
    design_covariance, design_warnings, deviances, glm_scores, intercept_position, newton_system,
    weighted_outcome_mean, FitOutcome,
};
use crate::solvers::traits::{validate_inputs, EstimationError, SurveyEstimator};
use crate::utils::{linear_predictor, mat_vec, max_relative_change, symmetric_inverse};
use faer::{Col, Mat};
use tracing::{debug, info, warn};

/// μ(1 − μ) below which a record counts as fitted at 0 or 1.
const SATURATION: f64 = 1e-10;

/// Survey-weighted binomial-logit estimator.
#[derive(Debug, Clone, Default)]
pub struct BinomialRegressor {
    options: EstimationOptions,
    family: BinomialFamily,
}

impl BinomialRegressor {
    /// Create a new logistic regressor with the given options.
    pub fn new(options: EstimationOptions) -> Self {
        Self {
            options,
            family: BinomialFamily::logistic(),
        }
    }

    /// Create a builder for logistic regression.
    pub fn logistic() -> BinomialRegressorBuilder {
        BinomialRegressorBuilder::default()
    }

    /// Create a general builder.
    pub fn builder() -> BinomialRegressorBuilder {
        BinomialRegressorBuilder::default()
    }

    fn validate_outcome(y: &Col<f64>) -> Result<(), EstimationError> {
        for i in 0..y.nrows() {
            if y[i] != 0.0 && y[i] != 1.0 {
                return Err(EstimationError::InvalidOutcome {
                    row: i,
                    value: y[i],
                    expected: "binary outcome in {0, 1}",
                });
            }
        }
        Ok(())
    }

    fn log_likelihood(&self, y: &[f64], eta: &[f64], weights: &[f64]) -> f64 {
        y.iter()
            .zip(eta.iter())
            .zip(weights.iter())
            .map(|((&yi, &ei), &wi)| wi * self.family.log_likelihood(yi, ei))
            .sum()
    }

    fn is_saturated(eta: &[f64]) -> bool {
        eta.iter()
            .any(|&e| !e.is_finite() || expit(e) * expit(-e) < SATURATION)
    }

    /// Column with the largest coefficient magnitude.
    fn largest_coefficient(beta: &[f64], columns: &[ColumnSpec]) -> (String, f64) {
        let (j, magnitude) = beta
            .iter()
            .map(|b| b.abs())
            .enumerate()
            .fold((0, 0.0_f64), |best, (j, m)| {
                if m > best.1 || m.is_nan() {
                    (j, m)
                } else {
                    best
                }
            });
        let name = columns
            .get(j)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| format!("x{j}"));
        (name, magnitude)
    }

    fn starting_values(
        &self,
        y: &[f64],
        weights: &[f64],
        columns: &[ColumnSpec],
    ) -> Result<Vec<f64>, EstimationError> {
        let mut beta = vec![0.0; columns.len()];
        if let Some(k) = intercept_position(columns) {
            let y_bar = weighted_outcome_mean(y, weights);
            if y_bar <= 0.0 || y_bar >= 1.0 {
                // Every outcome is the same: the intercept diverges.
                return Err(EstimationError::Separation {
                    iterations: 0,
                    column: columns[k].name.clone(),
                    magnitude: f64::INFINITY,
                });
            }
            beta[k] = LinkFunction::Logit.link(y_bar);
        }
        Ok(beta)
    }

    fn fit_newton(
        &self,
        x: &Mat<f64>,
        y: &Col<f64>,
        design: &SurveyDesign,
        columns: &[ColumnSpec],
    ) -> Result<FitOutcome, EstimationError> {
        let n = x.nrows();
        let weights = design.weights();
        let y_vec: Vec<f64> = (0..n).map(|i| y[i]).collect();

        let mut beta = self.starting_values(&y_vec, weights, columns)?;
        let mut eta = linear_predictor(x, &Col::from_fn(beta.len(), |j| beta[j]));

        let max_iter = self.options.max_iterations;
        let tol = self.options.tolerance;
        let bound = self.options.separation_bound;
        let mut converged = false;
        let mut iterations = 0;
        let mut max_change = f64::INFINITY;

        for iter in 0..max_iter {
            iterations = iter + 1;

            let residual: Vec<f64> = (0..n)
                .map(|i| self.family.residual(y_vec[i], eta[i]))
                .collect();
            let info: Vec<f64> = eta.iter().map(|&e| self.family.info_eta(e)).collect();
            let (a, u) = newton_system(x, weights, &residual, &info);

            let a_inv = match symmetric_inverse(&a, self.options.rank_tolerance) {
                Ok(inv) => inv,
                Err(EstimationError::SingularMatrix) if Self::is_saturated(&eta) => {
                    let (column, magnitude) = Self::largest_coefficient(&beta, columns);
                    return Err(EstimationError::Separation {
                        iterations,
                        column,
                        magnitude,
                    });
                }
                Err(e) => return Err(e),
            };

            let mut step = mat_vec(&a_inv, &u);
            let mut candidate: Vec<f64> =
                beta.iter().zip(step.iter()).map(|(b, s)| b + s).collect();
            let mut candidate_eta =
                linear_predictor(x, &Col::from_fn(candidate.len(), |j| candidate[j]));

            if !self.log_likelihood(&y_vec, &candidate_eta, weights).is_finite() {
                // One retry with half the step before giving up.
                step.iter_mut().for_each(|s| *s *= 0.5);
                candidate = beta.iter().zip(step.iter()).map(|(b, s)| b + s).collect();
                candidate_eta =
                    linear_predictor(x, &Col::from_fn(candidate.len(), |j| candidate[j]));
                if !self.log_likelihood(&y_vec, &candidate_eta, weights).is_finite() {
                    return Err(EstimationError::NumericalError(format!(
                        "non-finite logit update at iteration {iterations}"
                    )));
                }
            }

            max_change = max_relative_change(&step, &beta);
            beta = candidate;
            eta = candidate_eta;

            debug!(
                iteration = iterations,
                max_change,
                log_likelihood = self.log_likelihood(&y_vec, &eta, weights),
                "logit newton step"
            );

            if beta.iter().any(|b| b.abs() > bound) {
                let (column, magnitude) = Self::largest_coefficient(&beta, columns);
                return Err(EstimationError::Separation {
                    iterations,
                    column,
                    magnitude,
                });
            }

            if max_change < tol {
                converged = true;
                break;
            }
        }

        let mut warnings = design_warnings(design);
        if !converged {
            if Self::is_saturated(&eta) {
                let (column, magnitude) = Self::largest_coefficient(&beta, columns);
                return Err(EstimationError::Separation {
                    iterations,
                    column,
                    magnitude,
                });
            }
            warn!(iterations, max_change, "logit fit did not converge");
            warnings.push(FitWarning::NonConvergence {
                iterations,
                max_change,
            });
        }

        // Bread and scores at the final estimate
        let residual: Vec<f64> = (0..n).map(|i| self.family.residual(y_vec[i], eta[i])).collect();
        let info: Vec<f64> = eta.iter().map(|&e| self.family.info_eta(e)).collect();
        let (a, _) = newton_system(x, weights, &residual, &info);
        let a_inv = symmetric_inverse(&a, self.options.rank_tolerance)?;
        let scores = glm_scores(x, weights, &residual);
        let covariance = design_covariance(&a_inv, &scores, design)?;
        let (deviance, null_deviance) = deviances(&self.family, &y_vec, &eta, weights);

        Ok(FitOutcome {
            log_pseudo_likelihood: self.log_likelihood(&y_vec, &eta, weights),
            coefficients: beta,
            covariance,
            converged,
            iterations,
            warnings,
            deviance: Some(deviance),
            null_deviance: Some(null_deviance),
            extras: FamilyExtras::None,
        })
    }
}

impl SurveyEstimator for BinomialRegressor {
    fn family(&self) -> ModelFamily {
        ModelFamily::BinomialLogit
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
        validate_inputs(x, y, design, &columns)?;
        Self::validate_outcome(y)?;

        let outcome = self.fit_newton(x, y, design, &columns)?;
        info!(
            family = %ModelFamily::BinomialLogit,
            n = x.nrows(),
            parameters = x.ncols(),
            iterations = outcome.iterations,
            converged = outcome.converged,
            "logit fit complete"
        );
        Ok(outcome.into_model(ModelFamily::BinomialLogit, columns, design, encoding))
    }
}

/// Builder for `BinomialRegressor`.
#[derive(Debug, Clone, Default)]
pub struct BinomialRegressorBuilder {
    options_builder: EstimationOptionsBuilder,
}

impl BinomialRegressorBuilder {
    /// Start from existing options.
    pub fn options(mut self, options: EstimationOptions) -> Self {
        self.options_builder = EstimationOptionsBuilder::from(options);
        self
    }

    /// Set whether to include an intercept term for raw matrices.
    pub fn with_intercept(mut self, include: bool) -> Self {
        self.options_builder = self.options_builder.with_intercept(include);
        self
    }

    /// Set the confidence level for confidence intervals.
    pub fn confidence_level(mut self, level: f64) -> Self {
        self.options_builder = self.options_builder.confidence_level(level);
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

    /// Set the coefficient magnitude that signals separation.
    pub fn separation_bound(mut self, bound: f64) -> Self {
        self.options_builder = self.options_builder.separation_bound(bound);
        self
    }

    /// Build the regressor. Options are validated when fitting.
    pub fn build(self) -> BinomialRegressor {
        BinomialRegressor::new(self.options_builder.build_unchecked())
    }
}
