//! Fitted model structures.

use super::censored::CensoringBranch;
use super::family::ModelFamily;
use crate::data::encoding::ModelEncoding;
use faer::{Col, Mat};
use serde::{Deserialize, Serialize};

/// Name of the ancillary log-scale parameter of the censored model.
pub const LN_SIGMA: &str = "lnsigma";

/// What a parameter column represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// The constant column.
    Intercept,
    /// Indicator of one non-reference level of a factor.
    Level { factor: String, level: String },
    /// Product of two level indicators.
    Interaction {
        first: (String, String),
        second: (String, String),
    },
    /// A raw numeric column supplied by the caller.
    Continuous,
    /// A distribution parameter that is not part of the linear index.
    Ancillary,
}

/// One parameter: its display name and its covariate mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn intercept() -> Self {
        Self {
            name: "(Intercept)".to_string(),
            kind: ColumnKind::Intercept,
        }
    }

    pub fn level(factor: &str, level: &str) -> Self {
        Self {
            name: format!("{factor}[{level}]"),
            kind: ColumnKind::Level {
                factor: factor.to_string(),
                level: level.to_string(),
            },
        }
    }

    pub fn interaction(first: (&str, &str), second: (&str, &str)) -> Self {
        Self {
            name: format!("{}[{}]:{}[{}]", first.0, first.1, second.0, second.1),
            kind: ColumnKind::Interaction {
                first: (first.0.to_string(), first.1.to_string()),
                second: (second.0.to_string(), second.1.to_string()),
            },
        }
    }

    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Continuous,
        }
    }

    pub fn ancillary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Ancillary,
        }
    }

    /// Whether the column enters the linear index.
    pub fn is_index(&self) -> bool {
        !matches!(self.kind, ColumnKind::Ancillary)
    }
}

/// Non-fatal conditions recorded on a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitWarning {
    /// The iteration cap was reached before the convergence criterion held.
    /// The model carries the last iterate.
    NonConvergence { iterations: usize, max_change: f64 },
    /// Some strata have a single cluster and contribute no variance.
    SingletonStrata { count: usize },
    /// The estimated dispersion sits at the edge of its admissible range.
    DispersionAtBound { theta: f64 },
}

/// Counts of records on each censored-likelihood branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CensoringSummary {
    pub n_lower: usize,
    pub n_upper: usize,
    pub n_uncensored: usize,
    /// Weighted share of records at the lower bound.
    pub weighted_fraction_lower: f64,
    /// Weighted share of records at the upper bound.
    pub weighted_fraction_upper: f64,
}

impl CensoringSummary {
    /// Tally branches with their survey weights.
    pub fn from_branches(branches: &[CensoringBranch], weights: &[f64]) -> Self {
        let mut summary = Self::default();
        let (mut w_lower, mut w_upper, mut w_total) = (0.0, 0.0, 0.0);
        for (branch, &w) in branches.iter().zip(weights.iter()) {
            w_total += w;
            match branch {
                CensoringBranch::Lower => {
                    summary.n_lower += 1;
                    w_lower += w;
                }
                CensoringBranch::Upper => {
                    summary.n_upper += 1;
                    w_upper += w;
                }
                CensoringBranch::Uncensored => summary.n_uncensored += 1,
            }
        }
        if w_total > 0.0 {
            summary.weighted_fraction_lower = w_lower / w_total;
            summary.weighted_fraction_upper = w_upper / w_total;
        }
        summary
    }

    pub fn n_total(&self) -> usize {
        self.n_lower + self.n_upper + self.n_uncensored
    }

    /// Unweighted share of records at the lower bound.
    pub fn fraction_lower(&self) -> f64 {
        self.n_lower as f64 / self.n_total().max(1) as f64
    }

    /// Unweighted share of records at the upper bound.
    pub fn fraction_upper(&self) -> f64 {
        self.n_upper as f64 / self.n_total().max(1) as f64
    }
}

/// Family-specific quantities estimated alongside the coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FamilyExtras {
    None,
    NegativeBinomial {
        /// Size parameter θ.
        theta: f64,
        /// Dispersion α = 1/θ, Var = μ + αμ².
        alpha: f64,
    },
    Censored {
        lower: f64,
        upper: f64,
        sigma: f64,
        censoring: CensoringSummary,
    },
}

/// A survey-weighted model fit.
///
/// Coefficients are on the link (or latent index) scale. The covariance is
/// the linearized design-based sandwich; for the censored model both cover
/// the trailing `lnsigma` parameter. Values are never modified after a
/// solver returns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub family: ModelFamily,
    pub columns: Vec<ColumnSpec>,
    pub coefficients: Vec<f64>,
    /// Row-major square covariance matrix.
    pub covariance: Vec<Vec<f64>>,
    /// Weighted log pseudo-likelihood at the estimate.
    pub log_pseudo_likelihood: f64,
    pub converged: bool,
    pub iterations: usize,
    pub warnings: Vec<FitWarning>,
    pub n_observations: usize,
    pub n_strata: usize,
    pub n_clusters: usize,
    /// Design degrees of freedom: clusters minus strata.
    pub design_df: usize,
    pub sum_weights: f64,
    /// Weighted deviance at the estimate (GLM families only).
    #[serde(default)]
    pub deviance: Option<f64>,
    /// Weighted deviance of the intercept-only model (GLM families only).
    #[serde(default)]
    pub null_deviance: Option<f64>,
    pub extras: FamilyExtras,
    /// Factor encoding used to build the design matrix, when fit from a model frame.
    pub encoding: Option<ModelEncoding>,
}

impl FittedModel {
    pub fn n_parameters(&self) -> usize {
        self.coefficients.len()
    }

    /// Number of parameters entering the linear index.
    pub fn n_index_parameters(&self) -> usize {
        self.columns.iter().filter(|c| c.is_index()).count()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Position of a named parameter.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Coefficient by parameter name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.column_index(name).map(|j| self.coefficients[j])
    }

    /// Index coefficients, excluding ancillary parameters.
    pub fn index_coefficients(&self) -> &[f64] {
        &self.coefficients[..self.n_index_parameters()]
    }

    /// Linearized standard errors.
    pub fn std_errors(&self) -> Vec<f64> {
        (0..self.n_parameters())
            .map(|j| self.covariance[j][j].max(0.0).sqrt())
            .collect()
    }

    /// Standard error by parameter name.
    pub fn std_error(&self, name: &str) -> Option<f64> {
        self.column_index(name)
            .map(|j| self.covariance[j][j].max(0.0).sqrt())
    }

    pub fn coefficients_col(&self) -> Col<f64> {
        Col::from_fn(self.coefficients.len(), |j| self.coefficients[j])
    }

    pub fn covariance_mat(&self) -> Mat<f64> {
        let p = self.coefficients.len();
        Mat::from_fn(p, p, |i, j| self.covariance[i][j])
    }

    /// Linear index x'β for a design row of index columns.
    pub fn linear_predictor(&self, row: &[f64]) -> f64 {
        self.index_coefficients()
            .iter()
            .zip(row.iter())
            .map(|(b, x)| b * x)
            .sum()
    }

    /// Negative binomial size parameter θ.
    pub fn theta(&self) -> Option<f64> {
        match self.extras {
            FamilyExtras::NegativeBinomial { theta, .. } => Some(theta),
            _ => None,
        }
    }

    /// Negative binomial dispersion α = 1/θ.
    pub fn alpha(&self) -> Option<f64> {
        match self.extras {
            FamilyExtras::NegativeBinomial { alpha, .. } => Some(alpha),
            _ => None,
        }
    }

    /// Scale σ of the censored model.
    pub fn sigma(&self) -> Option<f64> {
        match self.extras {
            FamilyExtras::Censored { sigma, .. } => Some(sigma),
            _ => None,
        }
    }

    /// Censoring bounds of the censored model.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self.extras {
            FamilyExtras::Censored { lower, upper, .. } => Some((lower, upper)),
            _ => None,
        }
    }

    pub fn censoring(&self) -> Option<&CensoringSummary> {
        match &self.extras {
            FamilyExtras::Censored { censoring, .. } => Some(censoring),
            _ => None,
        }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_model() -> FittedModel {
        FittedModel {
            family: ModelFamily::TwoSidedCensored,
            columns: vec![
                ColumnSpec::intercept(),
                ColumnSpec::level("poverty", "Poor"),
                ColumnSpec::ancillary(LN_SIGMA),
            ],
            coefficients: vec![0.2, -0.1, (0.3_f64).ln()],
            covariance: vec![
                vec![0.04, 0.0, 0.0],
                vec![0.0, 0.09, 0.0],
                vec![0.0, 0.0, 0.01],
            ],
            log_pseudo_likelihood: -12.0,
            converged: true,
            iterations: 6,
            warnings: vec![],
            n_observations: 40,
            n_strata: 2,
            n_clusters: 4,
            design_df: 2,
            sum_weights: 40.0,
            deviance: None,
            null_deviance: None,
            extras: FamilyExtras::Censored {
                lower: 0.0,
                upper: 1.0,
                sigma: 0.3,
                censoring: CensoringSummary::default(),
            },
            encoding: None,
        }
    }

    #[test]
    fn test_column_names() {
        assert_eq!(ColumnSpec::level("year", "2021").name, "year[2021]");
        assert_eq!(
            ColumnSpec::interaction(("poverty", "Poor"), ("year", "2021")).name,
            "poverty[Poor]:year[2021]"
        );
        assert!(!ColumnSpec::ancillary(LN_SIGMA).is_index());
    }

    #[test]
    fn test_accessors() {
        let model = toy_model();
        assert_eq!(model.n_parameters(), 3);
        assert_eq!(model.n_index_parameters(), 2);
        assert_eq!(model.coefficient("poverty[Poor]"), Some(-0.1));
        assert!((model.std_error("(Intercept)").unwrap() - 0.2).abs() < 1e-12);
        assert_eq!(model.sigma(), Some(0.3));
        assert_eq!(model.bounds(), Some((0.0, 1.0)));
        assert_eq!(model.theta(), None);
        assert!((model.linear_predictor(&[1.0, 1.0]) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_matrix_views() {
        let model = toy_model();
        let cov = model.covariance_mat();
        assert_eq!(cov.nrows(), 3);
        assert_eq!(cov[(1, 1)], 0.09);
        assert_eq!(model.coefficients_col()[0], 0.2);
    }

    #[test]
    fn test_censoring_summary() {
        let branches = [
            CensoringBranch::Lower,
            CensoringBranch::Lower,
            CensoringBranch::Uncensored,
            CensoringBranch::Upper,
        ];
        let summary = CensoringSummary::from_branches(&branches, &[1.0, 1.0, 1.0, 5.0]);
        assert_eq!(summary.n_lower, 2);
        assert_eq!(summary.n_upper, 1);
        assert_eq!(summary.n_total(), 4);
        assert!((summary.fraction_lower() - 0.5).abs() < 1e-12);
        assert!((summary.weighted_fraction_upper - 0.625).abs() < 1e-12);
    }
}
