//! Core traits and errors for survey-weighted estimators.

use crate::core::{ColumnSpec, EstimationOptions, FittedModel, ModelFamily};
use crate::data::{ModelEncoding, ModelFrame, SurveyDesign};
use crate::utils::with_intercept_column;
use faer::{Col, Mat};
use thiserror::Error;

/// Why a record cannot take part in design-based estimation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DesignIssue {
    #[error("missing stratum id ({0})")]
    MissingStratum(String),
    #[error("missing cluster id ({0})")]
    MissingCluster(String),
    #[error("missing weight ({0})")]
    MissingWeight(String),
    #[error("non-positive or non-finite weight {value} ({variable})")]
    NonPositiveWeight { variable: String, value: f64 },
}

/// Errors that can occur during estimation.
#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("design error at record {record_id}: {issue}")]
    Design { record_id: String, issue: DesignIssue },

    #[error(
        "singular design: all {n_strata} strata have a single cluster, no variance is estimable"
    )]
    SingularDesign { n_strata: usize },

    #[error("separation detected after {iterations} iterations: |{column}| = {magnitude:e}")]
    Separation {
        iterations: usize,
        column: String,
        magnitude: f64,
    },

    #[error("optimization failed: {0}")]
    Optimization(String),

    #[error("invalid cell `{cell}`: {reason}")]
    InvalidCell { cell: String, reason: String },

    #[error("invalid formula: {0}")]
    InvalidFormula(String),

    #[error("record {record_id} has no level for factor `{factor}`")]
    MissingCovariate { record_id: String, factor: String },

    #[error("dimension mismatch: X has {x_rows} rows but y has {y_len} elements")]
    DimensionMismatch { x_rows: usize, y_len: usize },

    #[error("insufficient observations: need at least {needed}, got {got}")]
    InsufficientObservations { needed: usize, got: usize },

    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    #[error("invalid outcome at row {row}: {value} ({expected})")]
    InvalidOutcome {
        row: usize,
        value: f64,
        expected: &'static str,
    },

    #[error("matrix is singular or nearly singular")]
    SingularMatrix,

    #[error("numerical error: {0}")]
    NumericalError(String),

    #[error("invalid options: {0}")]
    InvalidOptions(#[from] crate::core::OptionsError),

    #[error("analytic sample is empty")]
    EmptySample,
}

/// A survey-weighted estimator.
///
/// Every fit consumes immutable inputs and returns a fresh [`FittedModel`]
/// whose covariance is the linearized design-based sandwich.
pub trait SurveyEstimator {
    /// Family of the models this estimator produces.
    fn family(&self) -> ModelFamily;

    /// Options used by the estimator.
    fn options(&self) -> &EstimationOptions;

    /// Fit on a complete design matrix.
    ///
    /// `columns` names every column of `x`; `encoding` is stored on the model
    /// so margins can re-encode records later.
    fn fit_design(
        &self,
        x: &Mat<f64>,
        y: &Col<f64>,
        design: &SurveyDesign,
        columns: Vec<ColumnSpec>,
        encoding: Option<ModelEncoding>,
    ) -> Result<FittedModel, EstimationError>;

    /// Fit on a raw numeric matrix, prepending an intercept when configured.
    ///
    /// Columns are named `x0`, `x1`, ... in order.
    fn fit(
        &self,
        x: &Mat<f64>,
        y: &Col<f64>,
        design: &SurveyDesign,
    ) -> Result<FittedModel, EstimationError> {
        let mut columns: Vec<ColumnSpec> = (0..x.ncols())
            .map(|j| ColumnSpec::continuous(format!("x{j}")))
            .collect();

        if self.options().with_intercept {
            columns.insert(0, ColumnSpec::intercept());
            let x_design = with_intercept_column(x);
            self.fit_design(&x_design, y, design, columns, None)
        } else {
            self.fit_design(x, y, design, columns, None)
        }
    }

    /// Fit on an encoded model frame.
    fn fit_frame(&self, frame: &ModelFrame) -> Result<FittedModel, EstimationError> {
        self.fit_design(
            &frame.x,
            &frame.y,
            &frame.design,
            frame.encoding.columns().to_vec(),
            Some(frame.encoding.clone()),
        )
    }
}

/// Shared input validation: dimensions, sample size and finite values.
pub(crate) fn validate_inputs(
    x: &Mat<f64>,
    y: &Col<f64>,
    design: &SurveyDesign,
    columns: &[ColumnSpec],
) -> Result<(), EstimationError> {
    let n_samples = x.nrows();
    let n_params = x.ncols();

    if n_samples != y.nrows() {
        return Err(EstimationError::DimensionMismatch {
            x_rows: n_samples,
            y_len: y.nrows(),
        });
    }
    if design.n_records() != n_samples {
        return Err(EstimationError::DimensionMismatch {
            x_rows: n_samples,
            y_len: design.n_records(),
        });
    }
    if columns.len() != n_params {
        return Err(EstimationError::InvalidFormula(format!(
            "{} column names for {} design columns",
            columns.len(),
            n_params
        )));
    }
    if n_samples == 0 {
        return Err(EstimationError::EmptySample);
    }
    if n_samples < n_params.max(2) {
        return Err(EstimationError::InsufficientObservations {
            needed: n_params.max(2),
            got: n_samples,
        });
    }
    for i in 0..n_samples {
        for j in 0..n_params {
            if !x[(i, j)].is_finite() {
                return Err(EstimationError::NumericalError(format!(
                    "non-finite design value at row {i}, column {}",
                    columns[j].name
                )));
            }
        }
    }
    Ok(())
}
