//! Survey-weighted negative binomial regression.
//!
//! NB2 with log link: `E[Y] = μ = exp(Xβ)`, `Var[Y] = μ + αμ²`, `α = 1/θ`.
//!
//! # Dispersion estimation
//!
//! - Estimated (default): alternate a Fisher-scoring step for β at the current
//!   θ with a weighted profile-likelihood update of θ at the current means,
//!   until both the relative β change and the relative θ change fall below
//!   the tolerance.
//! - Fixed: the user supplies θ and only β is estimated.
//!
//! The reported covariance covers β only; θ is carried as a family extra.
//!
//! # Example
//!
//! ```rust,ignore
//! use survey_regress::solvers::{NegativeBinomialRegressor, SurveyEstimator};
//!
//! let model = NegativeBinomialRegressor::builder().build().fit_frame(&frame)?;
//! println!("alpha = {:?}", model.alpha());
//! ```

use crate::core::{
    estimate_theta_ml, estimate_theta_moments, ColumnSpec, EstimationOptions,
    EstimationOptionsBuilder, FamilyExtras, FitWarning, FittedModel, GlmFamily,
    NegativeBinomialFamily, ModelFamily, THETA_MAX, THETA_MIN,
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

/// Survey-weighted negative binomial estimator.
#[derive(Debug, Clone)]
pub struct NegativeBinomialRegressor {
    options: EstimationOptions,
    /// Starting (or fixed) size parameter.
    theta: Option<f64>,
    estimate_theta: bool,
}

impl Default for NegativeBinomialRegressor {
    fn default() -> Self {
        Self::new(EstimationOptions::default())
    }
}

impl NegativeBinomialRegressor {
    /// Create a new regressor with estimated dispersion.
    pub fn new(options: EstimationOptions) -> Self {
        Self {
            options,
            theta: None,
            estimate_theta: true,
        }
    }

    /// Create a builder.
    pub fn builder() -> NegativeBinomialRegressorBuilder {
        NegativeBinomialRegressorBuilder::default()
    }

    /// Create a builder with a fixed theta value.
    pub fn with_theta(theta: f64) -> NegativeBinomialRegressorBuilder {
        NegativeBinomialRegressorBuilder::default()
            .theta(theta)
            .estimate_theta(false)
    }

    fn validate_outcome(y: &Col<f64>) -> Result<(), EstimationError> {
        for i in 0..y.nrows() {
            let v = y[i];
            if !v.is_finite() || v < 0.0 || v.fract() != 0.0 {
                return Err(EstimationError::InvalidOutcome {
                    row: i,
                    value: v,
                    expected: "non-negative integer count",
                });
            }
        }
        Ok(())
    }

    fn log_likelihood(
        family: &NegativeBinomialFamily,
        y: &[f64],
        eta: &[f64],
        weights: &[f64],
    ) -> f64 {
        y.iter()
            .zip(eta.iter())
            .zip(weights.iter())
            .map(|((&yi, &ei), &wi)| wi * family.log_likelihood(yi, ei))
            .sum()
    }

    fn fit_alternating(
        &self,
        x: &Mat<f64>,
        y: &Col<f64>,
        design: &SurveyDesign,
        columns: &[ColumnSpec],
    ) -> Result<FitOutcome, EstimationError> {
        let n = x.nrows();
        let weights = design.weights();
        let y_vec: Vec<f64> = (0..n).map(|i| y[i]).collect();
        let y_bar = weighted_outcome_mean(&y_vec, weights);
        if y_bar <= 0.0 {
            return Err(EstimationError::Optimization(
                "every count is zero, the log mean is unbounded".to_string(),
            ));
        }

        let mut beta = vec![0.0; columns.len()];
        if let Some(k) = intercept_position(columns) {
            beta[k] = y_bar.ln();
        }
        let mut eta = linear_predictor(x, &Col::from_fn(beta.len(), |j| beta[j]));

        let max_iter = self.options.max_iterations;
        let tol = self.options.tolerance;

        let mut theta = match self.theta {
            Some(t) => t,
            None => {
                let mu: Vec<f64> = eta.iter().map(|e| e.exp()).collect();
                let start = estimate_theta_moments(&y_vec, &mu, weights);
                estimate_theta_ml(
                    &y_vec,
                    &mu,
                    weights,
                    start,
                    self.options.dispersion_max_iterations,
                    tol,
                )
            }
        };
        let mut family = NegativeBinomialFamily::new(theta);
        theta = family.theta;
        let mut current = Self::log_likelihood(&family, &y_vec, &eta, weights);

        let mut converged = false;
        let mut iterations = 0;
        let mut max_change = f64::INFINITY;

        for iter in 0..max_iter {
            iterations = iter + 1;

            // (a) Fisher-scoring step for β at fixed θ
            let score: Vec<f64> = (0..n).map(|i| family.score_eta(y_vec[i], eta[i])).collect();
            let info: Vec<f64> = eta.iter().map(|&e| family.info_eta(e)).collect();
            let (a, u) = newton_system(x, weights, &score, &info);
            let a_inv = symmetric_inverse(&a, self.options.rank_tolerance)?;
            let mut step = mat_vec(&a_inv, &u);

            let mut accepted = None;
            for halving in 0..=self.options.max_step_halvings {
                let candidate: Vec<f64> =
                    beta.iter().zip(step.iter()).map(|(b, s)| b + s).collect();
                let candidate_eta =
                    linear_predictor(x, &Col::from_fn(candidate.len(), |j| candidate[j]));
                let value = Self::log_likelihood(&family, &y_vec, &candidate_eta, weights);
                let finite = value.is_finite();
                if finite && value >= current - 1e-10 * current.abs().max(1.0) {
                    accepted = Some((candidate, candidate_eta, value));
                    break;
                }
                if !finite && halving >= 1 {
                    return Err(EstimationError::NumericalError(format!(
                        "non-finite negative binomial update at iteration {iterations}"
                    )));
                }
                step.iter_mut().for_each(|s| *s *= 0.5);
            }

            let beta_change = match accepted {
                Some((candidate, candidate_eta, value)) => {
                    let change = max_relative_change(
                        &candidate
                            .iter()
                            .zip(beta.iter())
                            .map(|(c, b)| c - b)
                            .collect::<Vec<_>>(),
                        &beta,
                    );
                    beta = candidate;
                    eta = candidate_eta;
                    current = value;
                    change
                }
                // No ascent along the scoring direction: β is at its maximum for this θ
                None => 0.0,
            };

            // (b) profile ML update of θ at the new means
            let theta_change = if self.estimate_theta {
                let mu: Vec<f64> = eta.iter().map(|e| e.exp()).collect();
                let updated = estimate_theta_ml(
                    &y_vec,
                    &mu,
                    weights,
                    theta,
                    self.options.dispersion_max_iterations,
                    tol,
                );
                let change = (updated - theta).abs() / theta;
                theta = updated;
                family = NegativeBinomialFamily::new(theta);
                current = Self::log_likelihood(&family, &y_vec, &eta, weights);
                change
            } else {
                0.0
            };

            max_change = beta_change.max(theta_change);
            debug!(
                iteration = iterations,
                beta_change,
                theta_change,
                theta,
                log_likelihood = current,
                "negative binomial step"
            );

            if max_change < tol {
                converged = true;
                break;
            }
        }

        let mut warnings = design_warnings(design);
        if !converged {
            warn!(iterations, max_change, theta, "negative binomial fit did not converge");
            warnings.push(FitWarning::NonConvergence {
                iterations,
                max_change,
            });
        }
        let at_bound = theta <= THETA_MIN * (1.0 + 1e-9) || theta >= THETA_MAX * (1.0 - 1e-9);
        if self.estimate_theta && at_bound {
            warn!(theta, "dispersion estimate at the boundary of its range");
            warnings.push(FitWarning::DispersionAtBound { theta });
        }

        let score: Vec<f64> = (0..n).map(|i| family.score_eta(y_vec[i], eta[i])).collect();
        let info: Vec<f64> = eta.iter().map(|&e| family.info_eta(e)).collect();
        let (a, _) = newton_system(x, weights, &score, &info);
        let a_inv = symmetric_inverse(&a, self.options.rank_tolerance)?;
        let scores = glm_scores(x, weights, &score);
        let covariance = design_covariance(&a_inv, &scores, design)?;
        let (deviance, null_deviance) = deviances(&family, &y_vec, &eta, weights);

        Ok(FitOutcome {
            coefficients: beta,
            covariance,
            log_pseudo_likelihood: current,
            converged,
            iterations,
            warnings,
            deviance: Some(deviance),
            null_deviance: Some(null_deviance),
            extras: FamilyExtras::NegativeBinomial {
                theta,
                alpha: family.alpha(),
            },
        })
    }
}

impl SurveyEstimator for NegativeBinomialRegressor {
    fn family(&self) -> ModelFamily {
        ModelFamily::NegativeBinomialLog
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
        if let Some(theta) = self.theta {
            if !(theta > 0.0 && theta.is_finite()) {
                return Err(EstimationError::NumericalError(format!(
                    "theta must be positive and finite, got {theta}"
                )));
            }
        }

        let outcome = self.fit_alternating(x, y, design, &columns)?;
        info!(
            family = %ModelFamily::NegativeBinomialLog,
            n = x.nrows(),
            parameters = x.ncols(),
            iterations = outcome.iterations,
            converged = outcome.converged,
            "negative binomial fit complete"
        );
        Ok(outcome.into_model(ModelFamily::NegativeBinomialLog, columns, design, encoding))
    }
}

/// Builder for `NegativeBinomialRegressor`.
#[derive(Debug, Clone)]
pub struct NegativeBinomialRegressorBuilder {
    options_builder: EstimationOptionsBuilder,
    theta: Option<f64>,
    estimate_theta: bool,
}

impl Default for NegativeBinomialRegressorBuilder {
    fn default() -> Self {
        Self {
            options_builder: EstimationOptionsBuilder::default(),
            theta: None,
            estimate_theta: true,
        }
    }
}

impl NegativeBinomialRegressorBuilder {
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

    /// Set the maximum outer iterations.
    pub fn max_iterations(mut self, max_iter: usize) -> Self {
        self.options_builder = self.options_builder.max_iterations(max_iter);
        self
    }

    /// Set the convergence tolerance.
    pub fn tolerance(mut self, tol: f64) -> Self {
        self.options_builder = self.options_builder.tolerance(tol);
        self
    }

    /// Set the initial (or fixed) θ.
    pub fn theta(mut self, theta: f64) -> Self {
        self.theta = Some(theta);
        self
    }

    /// Set whether θ is estimated.
    pub fn estimate_theta(mut self, estimate: bool) -> Self {
        self.estimate_theta = estimate;
        self
    }

    /// Set the iteration cap of the dispersion update.
    pub fn dispersion_max_iterations(mut self, max_iter: usize) -> Self {
        self.options_builder = self.options_builder.dispersion_max_iterations(max_iter);
        self
    }

    /// Build the regressor. Options are validated when fitting.
    pub fn build(self) -> NegativeBinomialRegressor {
        NegativeBinomialRegressor {
            options: self.options_builder.build_unchecked(),
            theta: self.theta,
            estimate_theta: self.estimate_theta || self.theta.is_none(),
        }
    }
}
