//! Negative Binomial family for overdispersed count data regression.
//!
//! Uses the NB2 parameterization with log link:
//! `E[Y] = μ = exp(η)`, `Var[Y] = μ + μ²/θ` (equivalently `μ + α·μ²` with
//! `α = 1/θ`). The dispersion θ is estimated by weighted profile maximum
//! likelihood given the current means.
//!
//! # Example
//!
//! ```ignore
//! use survey_regress::NegativeBinomialFamily;
//!
//! let nb = NegativeBinomialFamily::new(2.0);
//! // α = 1/θ = 0.5
//! let alpha = nb.alpha();
//! ```

use super::family::GlmFamily;
use super::link::LinkFunction;
use statrs::function::gamma::{digamma, ln_gamma};

/// Smallest dispersion size accepted during estimation.
pub const THETA_MIN: f64 = 1e-4;
/// Largest dispersion size; beyond this the model is numerically Poisson.
pub const THETA_MAX: f64 = 1e8;

/// Negative Binomial family for overdispersed count data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegativeBinomialFamily {
    /// The size parameter θ. Higher values mean less overdispersion.
    pub theta: f64,
}

impl Default for NegativeBinomialFamily {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl NegativeBinomialFamily {
    /// Create a new negative binomial family with the specified theta.
    ///
    /// Non-positive or non-finite values are clamped into the accepted range.
    pub fn new(theta: f64) -> Self {
        let theta = if theta.is_finite() {
            theta.clamp(THETA_MIN, THETA_MAX)
        } else {
            THETA_MAX
        };
        Self { theta }
    }

    /// Dispersion α = 1/θ as reported by most survey packages.
    pub fn alpha(&self) -> f64 {
        1.0 / self.theta
    }
}

impl GlmFamily for NegativeBinomialFamily {
    fn link_function(&self) -> LinkFunction {
        LinkFunction::Log
    }

    fn log_likelihood(&self, y: f64, eta: f64) -> f64 {
        let theta = self.theta;
        let mu = self.link_inverse(eta);
        ln_gamma(y + theta) - ln_gamma(theta) - ln_gamma(y + 1.0) + theta * theta.ln()
            + y * eta
            - (theta + y) * (theta + mu).ln()
    }

    /// ∂ℓ/∂η = (y - μ)·θ/(θ + μ).
    fn score_eta(&self, y: f64, eta: f64) -> f64 {
        let mu = self.link_inverse(eta);
        (y - mu) * self.theta / (self.theta + mu)
    }

    /// E[-∂²ℓ/∂η²] = μ·θ/(θ + μ).
    fn info_eta(&self, eta: f64) -> f64 {
        let mu = self.link_inverse(eta);
        mu * self.theta / (self.theta + mu)
    }

    /// d(y, μ) = 2[y·log(y/μ) - (y + θ)·log((y + θ)/(μ + θ))]
    fn unit_deviance(&self, y: f64, mu: f64) -> f64 {
        let mu_safe = mu.max(1e-300);
        let theta = self.theta;

        if y <= 0.0 {
            2.0 * theta * ((mu_safe + theta) / theta).ln()
        } else {
            let term1 = y * (y / mu_safe).ln();
            let term2 = (y + theta) * ((y + theta) / (mu_safe + theta)).ln();
            (2.0 * (term1 - term2)).max(0.0)
        }
    }
}

/// Weighted method-of-moments estimate of θ given fitted means.
///
/// Uses E[(y - μ)² - μ] = μ²/θ, so θ ≈ Σ wμ² / Σ w((y - μ)² - μ).
/// Data without excess variance yields [`THETA_MAX`].
pub fn estimate_theta_moments(y: &[f64], mu: &[f64], weights: &[f64]) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for ((&yi, &mui), &wi) in y.iter().zip(mu.iter()).zip(weights.iter()) {
        num += wi * mui * mui;
        den += wi * ((yi - mui).powi(2) - mui);
    }

    if den <= 0.0 || num <= 0.0 {
        THETA_MAX
    } else {
        (num / den).clamp(THETA_MIN, THETA_MAX)
    }
}

/// Weighted profile log-likelihood of θ at fixed means (terms free of θ dropped).
pub fn theta_log_likelihood(y: &[f64], mu: &[f64], weights: &[f64], theta: f64) -> f64 {
    y.iter()
        .zip(mu.iter())
        .zip(weights.iter())
        .map(|((&yi, &mui), &wi)| {
            wi * (ln_gamma(yi + theta) - ln_gamma(theta) + theta * theta.ln()
                - (theta + yi) * (theta + mui).ln())
        })
        .sum()
}

/// Score and second derivative of the weighted profile log-likelihood in θ.
fn theta_score_and_hessian(y: &[f64], mu: &[f64], weights: &[f64], theta: f64) -> (f64, f64) {
    let mut score = 0.0;
    let mut hessian = 0.0;

    for ((&yi, &mui), &wi) in y.iter().zip(mu.iter()).zip(weights.iter()) {
        let tm = theta + mui;
        score += wi
            * (digamma(yi + theta) - digamma(theta) + theta.ln() + 1.0 - tm.ln()
                - (theta + yi) / tm);
        hessian += wi
            * (trigamma(yi + theta) - trigamma(theta) + 1.0 / theta - 2.0 / tm
                + (theta + yi) / (tm * tm));
    }

    (score, hessian)
}

/// Estimate θ by weighted maximum likelihood given fitted means.
///
/// Newton-Raphson on log θ, started at `start`, with step halving so the
/// profile likelihood never decreases. Returns a value in
/// [[`THETA_MIN`], [`THETA_MAX`]].
pub fn estimate_theta_ml(
    y: &[f64],
    mu: &[f64],
    weights: &[f64],
    start: f64,
    max_iter: usize,
    tol: f64,
) -> f64 {
    let mut log_theta = start.clamp(THETA_MIN, THETA_MAX).ln();
    let mut current = theta_log_likelihood(y, mu, weights, log_theta.exp());

    for _ in 0..max_iter {
        let theta = log_theta.exp();
        let (score, hessian) = theta_score_and_hessian(y, mu, weights, theta);

        // Chain rule to φ = log θ
        let grad = theta * score;
        let curv = theta * theta * hessian + theta * score;

        let mut step = if curv < 0.0 {
            -grad / curv
        } else {
            // Not locally concave: move a fixed distance uphill
            grad.signum()
        };
        step = step.clamp(-2.0, 2.0);

        let mut accepted = false;
        for _ in 0..30 {
            let candidate = (log_theta + step).clamp(THETA_MIN.ln(), THETA_MAX.ln());
            let value = theta_log_likelihood(y, mu, weights, candidate.exp());
            if value.is_finite() && value >= current - 1e-12 * current.abs().max(1.0) {
                let change = (candidate - log_theta).abs();
                log_theta = candidate;
                current = value;
                accepted = true;
                if change < tol {
                    return log_theta.exp();
                }
                break;
            }
            step *= 0.5;
        }

        if !accepted {
            break;
        }
    }

    log_theta.exp()
}

/// Trigamma function ψ'(x) for x > 0.
///
/// Shifts the argument above 10 with ψ'(x) = ψ'(x + 1) + 1/x², then applies
/// the asymptotic expansion.
pub fn trigamma(x: f64) -> f64 {
    if x <= 0.0 || !x.is_finite() {
        return f64::NAN;
    }

    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }

    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + inv
        + inv2 / 2.0
        + inv * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha() {
        let nb = NegativeBinomialFamily::new(2.0);
        assert!((nb.alpha() - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_new_clamps_theta() {
        assert_eq!(NegativeBinomialFamily::new(-1.0).theta, THETA_MIN);
        assert_eq!(NegativeBinomialFamily::new(f64::INFINITY).theta, THETA_MAX);
    }

    #[test]
    fn test_unit_deviance_perfect_fit() {
        let nb = NegativeBinomialFamily::new(2.0);
        assert!(nb.unit_deviance(5.0, 5.0).abs() < 1e-10);
        assert!(nb.unit_deviance(0.0, 1.0) > 0.0);
    }

    #[test]
    fn test_score_matches_numeric_derivative() {
        let nb = NegativeBinomialFamily::new(1.7);
        let (y, eta, h) = (3.0, 0.8, 1e-6);
        let numeric = (nb.log_likelihood(y, eta + h) - nb.log_likelihood(y, eta - h)) / (2.0 * h);
        assert!((numeric - nb.score_eta(y, eta)).abs() < 1e-7);
    }

    #[test]
    fn test_log_likelihood_matches_pmf() {
        // θ = 1 is geometric: P(Y = y) = (1/(1+μ)) (μ/(1+μ))^y
        let nb = NegativeBinomialFamily::new(1.0);
        let mu: f64 = 2.0;
        let y = 3.0;
        let expected = (1.0 / (1.0 + mu)).ln() + y * (mu / (1.0 + mu)).ln();
        assert!((nb.log_likelihood(y, mu.ln()) - expected).abs() < 1e-10);
    }

    #[test]
    fn test_trigamma_values() {
        // ψ'(1) = π²/6, ψ'(1/2) = π²/2
        let pi2 = std::f64::consts::PI * std::f64::consts::PI;
        assert!((trigamma(1.0) - pi2 / 6.0).abs() < 1e-10);
        assert!((trigamma(0.5) - pi2 / 2.0).abs() < 1e-10);
        assert!((trigamma(10.0) - 0.105_166_335_681_685_3).abs() < 1e-10);
        assert!(trigamma(0.0).is_nan());
    }

    #[test]
    fn test_theta_moments_without_overdispersion() {
        let y = [1.0, 1.0, 1.0];
        let mu = [1.0, 1.0, 1.0];
        let w = [1.0, 1.0, 1.0];
        assert_eq!(estimate_theta_moments(&y, &mu, &w), THETA_MAX);
    }

    #[test]
    fn test_theta_ml_increases_likelihood() {
        let y = [0.0, 0.0, 1.0, 7.0, 2.0, 0.0, 12.0, 3.0, 0.0, 5.0];
        let mu = [3.0; 10];
        let w = [1.0; 10];

        let start = estimate_theta_moments(&y, &mu, &w);
        let theta = estimate_theta_ml(&y, &mu, &w, start, 50, 1e-10);

        assert!(theta > THETA_MIN && theta < THETA_MAX);
        let at_start = theta_log_likelihood(&y, &mu, &w, start);
        let at_ml = theta_log_likelihood(&y, &mu, &w, theta);
        assert!(at_ml >= at_start - 1e-10);

        // Score vanishes at the optimum
        let (score, hessian) = theta_score_and_hessian(&y, &mu, &w, theta);
        assert!(score.abs() < 1e-6);
        assert!(hessian < 0.0);
    }
}
