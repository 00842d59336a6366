//! Survey-weighted estimators.

mod binomial;
mod glm;
mod negative_binomial;
mod tobit;
mod traits;

pub use binomial::{BinomialRegressor, BinomialRegressorBuilder};
pub use negative_binomial::{NegativeBinomialRegressor, NegativeBinomialRegressorBuilder};
pub use tobit::{TobitRegressor, TobitRegressorBuilder};
pub use traits::{DesignIssue, EstimationError, SurveyEstimator};

use crate::core::{ColumnSpec, EstimationOptions, FittedModel, ModelFamily};
use crate::data::SurveyDesign;
use faer::{Col, Mat};

/// Fit a weighted GLM of the given family on a complete design matrix.
///
/// The censored family has no GLM form and is rejected; use [`fit_tobit`].
pub fn fit_glm(
    family: ModelFamily,
    x: &Mat<f64>,
    y: &Col<f64>,
    design: &SurveyDesign,
    columns: Vec<ColumnSpec>,
    options: &EstimationOptions,
) -> Result<FittedModel, EstimationError> {
    match family {
        ModelFamily::BinomialLogit => {
            BinomialRegressor::new(options.clone()).fit_design(x, y, design, columns, None)
        }
        ModelFamily::NegativeBinomialLog => NegativeBinomialRegressor::new(options.clone())
            .fit_design(x, y, design, columns, None),
        ModelFamily::TwoSidedCensored => Err(EstimationError::InvalidFormula(
            "the two-sided censored family is not a GLM".to_string(),
        )),
    }
}

/// Fit a two-sided Tobit model on a complete design matrix.
pub fn fit_tobit(
    x: &Mat<f64>,
    y: &Col<f64>,
    design: &SurveyDesign,
    columns: Vec<ColumnSpec>,
    lower: f64,
    upper: f64,
    options: &EstimationOptions,
) -> Result<FittedModel, EstimationError> {
    TobitRegressor::new(options.clone(), lower, upper).fit_design(x, y, design, columns, None)
}
