//! Estimation options and configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration options shared by the survey-weighted solvers.
///
/// Options are explicit values handed to each fit; nothing is read from
/// process-wide state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationOptions {
    /// Whether to include an intercept column when fitting raw matrices (default: true).
    pub with_intercept: bool,
    /// Confidence level for coefficient and margin intervals (default: 0.95).
    pub confidence_level: f64,
    /// Maximum iterations for the iterative solvers (default: 100).
    pub max_iterations: usize,
    /// Convergence tolerance on the maximum relative coefficient change (default: 1e-8).
    pub tolerance: f64,
    /// Coefficient magnitude treated as divergence of a logit fit (default: 1e8).
    pub separation_bound: f64,
    /// Relative tolerance for pivots when inverting information matrices.
    pub rank_tolerance: f64,
    /// Maximum Newton iterations of the inner dispersion update (negative binomial).
    pub dispersion_max_iterations: usize,
    /// Maximum number of step halvings per Newton iteration.
    pub max_step_halvings: usize,
}

impl Default for EstimationOptions {
    fn default() -> Self {
        Self {
            with_intercept: true,
            confidence_level: 0.95,
            max_iterations: 100,
            tolerance: 1e-8,
            separation_bound: 1e8,
            rank_tolerance: 1e-12,
            dispersion_max_iterations: 50,
            max_step_halvings: 30,
        }
    }
}

/// Errors that can occur when validating estimation options.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("confidence_level must be in (0, 1), got {0}")]
    InvalidConfidenceLevel(f64),
    #[error("tolerance must be positive, got {0}")]
    InvalidTolerance(f64),
    #[error("max_iterations must be at least 1, got {0}")]
    InvalidMaxIterations(usize),
    #[error("separation_bound must be positive and finite, got {0}")]
    InvalidSeparationBound(f64),
    #[error("rank_tolerance must be non-negative, got {0}")]
    InvalidRankTolerance(f64),
    #[error("censoring bounds must satisfy lower < upper, got [{lower}, {upper}]")]
    InvalidBounds { lower: f64, upper: f64 },
}

impl EstimationOptions {
    /// Create a new builder for estimation options.
    pub fn builder() -> EstimationOptionsBuilder {
        EstimationOptionsBuilder::default()
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.confidence_level <= 0.0 || self.confidence_level >= 1.0 {
            return Err(OptionsError::InvalidConfidenceLevel(self.confidence_level));
        }
        if !(self.tolerance > 0.0) {
            return Err(OptionsError::InvalidTolerance(self.tolerance));
        }
        if self.max_iterations < 1 {
            return Err(OptionsError::InvalidMaxIterations(self.max_iterations));
        }
        if !(self.separation_bound > 0.0 && self.separation_bound.is_finite()) {
            return Err(OptionsError::InvalidSeparationBound(self.separation_bound));
        }
        if !(self.rank_tolerance >= 0.0) {
            return Err(OptionsError::InvalidRankTolerance(self.rank_tolerance));
        }
        Ok(())
    }
}

/// Builder for `EstimationOptions`.
#[derive(Debug, Clone, Default)]
pub struct EstimationOptionsBuilder {
    options: EstimationOptions,
}

impl From<EstimationOptions> for EstimationOptionsBuilder {
    fn from(options: EstimationOptions) -> Self {
        Self { options }
    }
}

impl EstimationOptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to include an intercept term.
    pub fn with_intercept(mut self, include: bool) -> Self {
        self.options.with_intercept = include;
        self
    }

    /// Set the confidence level for confidence intervals.
    pub fn confidence_level(mut self, level: f64) -> Self {
        self.options.confidence_level = level;
        self
    }

    /// Set the maximum iterations for iterative solvers.
    pub fn max_iterations(mut self, max_iter: usize) -> Self {
        self.options.max_iterations = max_iter;
        self
    }

    /// Set the convergence tolerance.
    pub fn tolerance(mut self, tol: f64) -> Self {
        self.options.tolerance = tol;
        self
    }

    /// Set the coefficient magnitude that signals separation.
    pub fn separation_bound(mut self, bound: f64) -> Self {
        self.options.separation_bound = bound;
        self
    }

    /// Set the relative pivot tolerance for matrix inversion.
    pub fn rank_tolerance(mut self, tol: f64) -> Self {
        self.options.rank_tolerance = tol;
        self
    }

    /// Set the iteration cap of the dispersion update.
    pub fn dispersion_max_iterations(mut self, max_iter: usize) -> Self {
        self.options.dispersion_max_iterations = max_iter;
        self
    }

    /// Set the maximum number of step halvings per iteration.
    pub fn max_step_halvings(mut self, halvings: usize) -> Self {
        self.options.max_step_halvings = halvings;
        self
    }

    /// Build the options, validating them first.
    pub fn build(self) -> Result<EstimationOptions, OptionsError> {
        self.options.validate()?;
        Ok(self.options)
    }

    /// Build the options without validation.
    pub fn build_unchecked(self) -> EstimationOptions {
        self.options
    }
}
