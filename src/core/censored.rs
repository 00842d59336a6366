//! Normal-distribution helpers for the two-sided censored (Tobit) model.
//!
//! The latent outcome is `y* = η + σε` with `ε ~ N(0, 1)`; the observed
//! outcome is `y*` clamped to `[lower, upper]`. Per-record likelihood
//! contributions are evaluated on the log scale with derivatives taken with
//! respect to `η` and `s = ln σ`.

use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// ln(√(2π))
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Below this argument the normal tail is evaluated by its asymptotic series.
const TAIL_CUTOFF: f64 = -30.0;

/// Standard normal density φ(z).
#[inline]
pub fn std_normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * PI).sqrt()
}

/// Standard normal CDF Φ(z).
#[inline]
pub fn std_normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z * FRAC_1_SQRT_2)
}

/// ln Φ(z), accurate far into the lower tail.
pub fn log_std_normal_cdf(z: f64) -> f64 {
    if z < TAIL_CUTOFF {
        // Φ(z) ≈ φ(z)/(-z) · (1 - 1/z² + 3/z⁴)
        let z2 = z * z;
        -0.5 * z2 - LN_SQRT_2PI - (-z).ln() + (1.0 - 1.0 / z2 + 3.0 / (z2 * z2)).ln()
    } else if z > 5.0 {
        // ln(1 - Φ(-z)) without cancellation
        (-0.5 * erfc(z * FRAC_1_SQRT_2)).ln_1p()
    } else {
        std_normal_cdf(z).ln()
    }
}

/// Inverse Mills ratio λ(z) = φ(z)/Φ(z).
pub fn inverse_mills_ratio(z: f64) -> f64 {
    if z < TAIL_CUTOFF {
        let z2 = z * z;
        -z / (1.0 - 1.0 / z2 + 3.0 / (z2 * z2))
    } else {
        std_normal_pdf(z) / std_normal_cdf(z)
    }
}

/// Likelihood branch of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CensoringBranch {
    /// Observation sits exactly at the lower bound.
    Lower,
    /// Observation sits exactly at the upper bound.
    Upper,
    /// Observation strictly inside the bounds.
    Uncensored,
}

impl CensoringBranch {
    /// Assign an outcome to its branch by exact comparison with the bounds.
    ///
    /// Returns `None` for outcomes outside `[lower, upper]` or non-finite values.
    pub fn classify(y: f64, lower: f64, upper: f64) -> Option<Self> {
        if !y.is_finite() || y < lower || y > upper {
            None
        } else if y == lower {
            Some(CensoringBranch::Lower)
        } else if y == upper {
            Some(CensoringBranch::Upper)
        } else {
            Some(CensoringBranch::Uncensored)
        }
    }
}

/// Log-likelihood of one record and its first and second derivatives
/// with respect to the linear index η and the log-scale s = ln σ.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TobitContribution {
    pub log_likelihood: f64,
    pub d_eta: f64,
    pub d_s: f64,
    pub d_eta_eta: f64,
    pub d_eta_s: f64,
    pub d_s_s: f64,
}

/// Evaluate one record's contribution on the given branch.
pub fn tobit_contribution(
    y: f64,
    eta: f64,
    ln_sigma: f64,
    lower: f64,
    upper: f64,
    branch: CensoringBranch,
) -> TobitContribution {
    let sigma = ln_sigma.exp();

    match branch {
        CensoringBranch::Uncensored => {
            let z = (y - eta) / sigma;
            TobitContribution {
                log_likelihood: -ln_sigma - LN_SQRT_2PI - 0.5 * z * z,
                d_eta: z / sigma,
                d_s: z * z - 1.0,
                d_eta_eta: -1.0 / (sigma * sigma),
                d_eta_s: -2.0 * z / sigma,
                d_s_s: -2.0 * z * z,
            }
        }
        CensoringBranch::Lower => {
            let a = (lower - eta) / sigma;
            let lambda = inverse_mills_ratio(a);
            let lambda_prime = -lambda * (a + lambda);
            TobitContribution {
                log_likelihood: log_std_normal_cdf(a),
                d_eta: -lambda / sigma,
                d_s: -lambda * a,
                d_eta_eta: lambda_prime / (sigma * sigma),
                d_eta_s: (lambda_prime * a + lambda) / sigma,
                d_s_s: lambda_prime * a * a + lambda * a,
            }
        }
        CensoringBranch::Upper => {
            let b = (eta - upper) / sigma;
            let lambda = inverse_mills_ratio(b);
            let lambda_prime = -lambda * (b + lambda);
            TobitContribution {
                log_likelihood: log_std_normal_cdf(b),
                d_eta: lambda / sigma,
                d_s: -lambda * b,
                d_eta_eta: lambda_prime / (sigma * sigma),
                d_eta_s: -(lambda_prime * b + lambda) / sigma,
                d_s_s: lambda_prime * b * b + lambda * b,
            }
        }
    }
}

/// Expected observed outcome under two-sided censoring and its derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CensoredExpectation {
    /// E\[y | x\] = L·Φ(a) + U·(1 - Φ(b)) + η·(Φ(b) - Φ(a)) + σ·(φ(a) - φ(b))
    pub value: f64,
    /// ∂E/∂η = Φ(b) - Φ(a)
    pub d_eta: f64,
    /// ∂E/∂(ln σ) = σ·(φ(a) - φ(b))
    pub d_ln_sigma: f64,
}

/// E\[y | η\] for the clamped outcome, with a = (L - η)/σ and b = (U - η)/σ.
pub fn censored_expectation_at(
    eta: f64,
    sigma: f64,
    lower: f64,
    upper: f64,
) -> CensoredExpectation {
    let a = (lower - eta) / sigma;
    let b = (upper - eta) / sigma;
    let (cdf_a, cdf_b) = (std_normal_cdf(a), std_normal_cdf(b));
    let (pdf_a, pdf_b) = (std_normal_pdf(a), std_normal_pdf(b));
    // 1 - Φ(b) through the complement keeps precision in the upper tail
    let survival_b = std_normal_cdf(-b);

    let value =
        lower * cdf_a + upper * survival_b + eta * (cdf_b - cdf_a) + sigma * (pdf_a - pdf_b);

    CensoredExpectation {
        value: value.clamp(lower, upper),
        d_eta: cdf_b - cdf_a,
        d_ln_sigma: sigma * (pdf_a - pdf_b),
    }
}

/// E\[y | x\] from coefficients, scale and a design row alone.
///
/// `coefficients` holds the index coefficients (without ln σ) and must have
/// the same length as `row`.
pub fn censored_expectation(
    coefficients: &[f64],
    sigma: f64,
    row: &[f64],
    lower: f64,
    upper: f64,
) -> f64 {
    let eta: f64 = coefficients.iter().zip(row.iter()).map(|(b, x)| b * x).sum();
    censored_expectation_at(eta, sigma, lower, upper).value
}
