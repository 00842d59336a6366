//! Binomial family for logistic regression on binary outcomes.
//!
//! # Example
//!
//! ```ignore
//! use survey_regress::BinomialFamily;
//!
//! let logistic = BinomialFamily::logistic();
//! let p = logistic.link_inverse(0.0); // 0.5
//! ```

use super::family::GlmFamily;
use super::link::{expit, log1pexp, LinkFunction};

/// Binomial family with the canonical logit link.
///
/// # Unit Deviance
///
/// d(y, μ) = 2[y·log(y/μ) + (1-y)·log((1-y)/(1-μ))]
///
/// with limit values for y = 0 or y = 1.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BinomialFamily;

impl BinomialFamily {
    /// Create the logistic regression family.
    pub fn logistic() -> Self {
        Self
    }

    /// Residual y - μ evaluated without cancellation.
    ///
    /// `1 - expit(η)` is computed as `expit(-η)` so the residual stays
    /// accurate when μ is within machine precision of 0 or 1.
    #[inline]
    pub fn residual(&self, y: f64, eta: f64) -> f64 {
        y * expit(-eta) - (1.0 - y) * expit(eta)
    }
}

impl GlmFamily for BinomialFamily {
    fn link_function(&self) -> LinkFunction {
        LinkFunction::Logit
    }

    /// ℓ = y·η - log(1 + exp(η)).
    fn log_likelihood(&self, y: f64, eta: f64) -> f64 {
        y * eta - log1pexp(eta)
    }

    fn score_eta(&self, y: f64, eta: f64) -> f64 {
        self.residual(y, eta)
    }

    fn info_eta(&self, eta: f64) -> f64 {
        expit(eta) * expit(-eta)
    }

    fn unit_deviance(&self, y: f64, mu: f64) -> f64 {
        let mu_clamped = mu.clamp(1e-300, 1.0 - 1e-16);

        let term1 = if y > 0.0 {
            y * (y / mu_clamped).ln()
        } else {
            0.0
        };

        let term2 = if y < 1.0 {
            (1.0 - y) * ((1.0 - y) / (1.0 - mu_clamped)).ln()
        } else {
            0.0
        };

        (2.0 * (term1 + term2)).max(0.0)
    }
}
