//! Core types: families, links, options, fitted models and margins.

mod binomial;
mod censored;
mod family;
mod link;
mod negative_binomial;
mod options;
mod prediction;
mod result;

pub use binomial::BinomialFamily;
pub use censored::{
    censored_expectation, censored_expectation_at, inverse_mills_ratio, log_std_normal_cdf,
    std_normal_cdf, std_normal_pdf, tobit_contribution, CensoredExpectation, CensoringBranch,
    TobitContribution,
};
pub use family::{GlmFamily, ModelFamily};
pub use link::{expit, log1pexp, LinkFunction};
pub use negative_binomial::{
    estimate_theta_ml, estimate_theta_moments, theta_log_likelihood, trigamma,
    NegativeBinomialFamily, THETA_MAX, THETA_MIN,
};
pub use options::{EstimationOptions, EstimationOptionsBuilder, OptionsError};
pub use prediction::{CellSpec, MarginEstimate, MarginResult};
pub use result::{
    CensoringSummary, ColumnKind, ColumnSpec, FamilyExtras, FitWarning, FittedModel, LN_SIGMA,
};
