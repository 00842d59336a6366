//! Survey-weighted regression with design-based inference.
//!
//! This library fits regression models to person-year records collected under
//! a complex survey design (stratification, clustering, weighting) and
//! reports linearized (Taylor-series) standard errors:
//!
//! - weighted binomial-logit models,
//! - weighted negative binomial models with an estimated dispersion,
//! - two-sided censored (Tobit) models for bounded proportions,
//! - predictive margins with delta-method standard errors,
//! - two-factor interaction (trend) models.
//!
//! # Example
//!
//! ```rust,ignore
//! use survey_regress::prelude::*;
//!
//! let sample = AnalyticSample::build(&records, &DesignSpec::default(), SampleRestriction::Full)?;
//! let formula = Formula::new(Outcome::AnyVisit).factor("poverty").factor("year");
//! let frame = ModelFrame::build(&sample, &formula)?;
//!
//! let model = BinomialRegressor::logistic().build().fit_frame(&frame)?;
//! let table = CoefficientTable::from_model(&model, 0.95);
//!
//! let cells = CellSpec::grid(&[("poverty", vec!["High", "Poor"])]);
//! let margins = predict_margins(&model, &frame, &cells, None)?;
//! ```

pub mod core;
pub mod data;
pub mod inference;
pub mod margins;
pub mod pipeline;
pub mod solvers;
pub mod utils;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        CellSpec, ColumnKind, ColumnSpec, EstimationOptions, EstimationOptionsBuilder,
        FamilyExtras, FitWarning, FittedModel, MarginEstimate, MarginResult, ModelFamily,
    };
    pub use crate::data::{
        AnalyticRecord, AnalyticSample, DesignSpec, FactorSpec, Formula, ModelEncoding,
        ModelFrame, Outcome, SampleRestriction, SurveyDesign,
    };
    pub use crate::inference::{estimate_variance, weighted_mean, CoefficientTable, WeightedMean};
    pub use crate::margins::{predict_margins, InteractionFit, InteractionModel, PredictiveMargins};
    pub use crate::pipeline::{fit_models, ModelKind, ModelRun, ModelSpec};
    pub use crate::solvers::{
        fit_glm, fit_tobit, BinomialRegressor, EstimationError, NegativeBinomialRegressor,
        SurveyEstimator, TobitRegressor,
    };
}

pub use crate::core::{
    CellSpec, EstimationOptions, FitWarning, FittedModel, MarginResult, ModelFamily,
};
pub use crate::data::{AnalyticRecord, DesignSpec, SurveyDesign};
pub use crate::solvers::{
    BinomialRegressor, EstimationError, NegativeBinomialRegressor, SurveyEstimator,
    TobitRegressor,
};
