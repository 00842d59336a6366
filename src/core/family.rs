//! Model family definitions.
//!
//! [`ModelFamily`] is the tag stored on every fitted model; [`GlmFamily`] is
//! the interface the weighted GLM solvers use to evaluate link, likelihood
//! and deviance contributions.

use super::link::LinkFunction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Family tag of a fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Binary outcome, canonical logit link.
    BinomialLogit,
    /// Non-negative integer outcome, log link, estimated dispersion (NB2).
    NegativeBinomialLog,
    /// Continuous outcome censored at both a floor and a ceiling (Tobit).
    TwoSidedCensored,
}

impl ModelFamily {
    /// Link function of the family's linear predictor.
    ///
    /// The censored model has no link: its latent index is on the outcome
    /// scale and predictions go through the censored expectation.
    pub fn link(&self) -> Option<LinkFunction> {
        match self {
            ModelFamily::BinomialLogit => Some(LinkFunction::Logit),
            ModelFamily::NegativeBinomialLog => Some(LinkFunction::Log),
            ModelFamily::TwoSidedCensored => None,
        }
    }

    /// Whether exponentiated coefficients have a ratio interpretation
    /// (odds ratios for logit, incidence-rate ratios for log-link counts).
    pub fn has_ratio_scale(&self) -> bool {
        !matches!(self, ModelFamily::TwoSidedCensored)
    }

    /// Label of the exponentiated coefficient scale.
    pub fn ratio_label(&self) -> Option<&'static str> {
        match self {
            ModelFamily::BinomialLogit => Some("odds ratio"),
            ModelFamily::NegativeBinomialLog => Some("IRR"),
            ModelFamily::TwoSidedCensored => None,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelFamily::BinomialLogit => "binomial-logit",
            ModelFamily::NegativeBinomialLog => "negative-binomial-log",
            ModelFamily::TwoSidedCensored => "two-sided-censored",
        };
        f.write_str(name)
    }
}

/// Interface shared by the GLM families fitted with weighted IRLS.
pub trait GlmFamily {
    /// The link function.
    fn link_function(&self) -> LinkFunction;

    /// Compute the link g(μ).
    fn link(&self, mu: f64) -> f64 {
        self.link_function().link(mu)
    }

    /// Compute the inverse link g⁻¹(η).
    fn link_inverse(&self, eta: f64) -> f64 {
        self.link_function().link_inverse(eta)
    }

    /// Log-likelihood contribution of one observation at linear predictor η.
    fn log_likelihood(&self, y: f64, eta: f64) -> f64;

    /// Score of η for one observation: ∂ℓ/∂η.
    fn score_eta(&self, y: f64, eta: f64) -> f64;

    /// Expected information of η for one observation: E[-∂²ℓ/∂η²].
    fn info_eta(&self, eta: f64) -> f64;

    /// Unit deviance d(y, μ).
    fn unit_deviance(&self, y: f64, mu: f64) -> f64;

    /// Weighted total deviance: Σ wᵢ d(yᵢ, μᵢ).
    fn deviance(&self, y: &[f64], mu: &[f64], weights: &[f64]) -> f64 {
        y.iter()
            .zip(mu.iter())
            .zip(weights.iter())
            .map(|((&yi, &mui), &wi)| wi * self.unit_deviance(yi, mui))
            .sum()
    }

    /// Weighted deviance of the intercept-only model.
    fn null_deviance(&self, y: &[f64], weights: &[f64]) -> f64 {
        let sum_w: f64 = weights.iter().sum();
        let y_mean = y
            .iter()
            .zip(weights.iter())
            .map(|(&yi, &wi)| yi * wi)
            .sum::<f64>()
            / sum_w;
        y.iter()
            .zip(weights.iter())
            .map(|(&yi, &wi)| wi * self.unit_deviance(yi, y_mean))
            .sum()
    }
}
