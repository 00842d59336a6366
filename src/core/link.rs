//! Link functions for the survey GLM families.
//!
//! Provides the logit link (binomial) and the log link (negative binomial).
//! The logistic helpers are written so that `1 - μ` and `μ(1 - μ)` never
//! lose precision to cancellation, which matters when a fit drifts towards
//! separation.

use serde::{Deserialize, Serialize};

/// Link function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkFunction {
    /// Logit link (canonical for binomial): g(μ) = log(μ/(1-μ))
    #[default]
    Logit,
    /// Log link: g(μ) = log(μ)
    Log,
}

impl LinkFunction {
    /// Compute the link function g(μ).
    #[inline]
    pub fn link(&self, mu: f64) -> f64 {
        match self {
            LinkFunction::Logit => {
                let mu_clamped = mu.clamp(1e-300, 1.0 - 1e-16);
                (mu_clamped / (1.0 - mu_clamped)).ln()
            }
            LinkFunction::Log => mu.max(1e-300).ln(),
        }
    }

    /// Compute the inverse link function g⁻¹(η) = μ.
    #[inline]
    pub fn link_inverse(&self, eta: f64) -> f64 {
        match self {
            LinkFunction::Logit => expit(eta),
            LinkFunction::Log => eta.min(700.0).exp(),
        }
    }

    /// Compute derivative of inverse link function dμ/dη.
    #[inline]
    pub fn link_inverse_derivative(&self, eta: f64) -> f64 {
        match self {
            // μ(1-μ) = expit(η)·expit(-η)
            LinkFunction::Logit => expit(eta) * expit(-eta),
            LinkFunction::Log => eta.min(700.0).exp(),
        }
    }

    /// Short name used in logs and serialized output.
    pub fn name(&self) -> &'static str {
        match self {
            LinkFunction::Logit => "logit",
            LinkFunction::Log => "log",
        }
    }
}

/// Numerically stable logistic function 1 / (1 + exp(-η)).
#[inline]
pub fn expit(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

/// Numerically stable log(1 + exp(x)).
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    if x > 35.0 {
        x
    } else if x < -35.0 {
        x.exp()
    } else {
        x.exp().ln_1p()
    }
}
