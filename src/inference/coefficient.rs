//! Coefficient inference with design degrees of freedom.

use crate::core::{FittedModel, ModelFamily};
use faer::Col;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Computes inference statistics for survey regression coefficients.
///
/// Reference distribution is Student t with the design degrees of freedom
/// (clusters minus strata); zero degrees of freedom yields NaN.
pub struct CoefficientInference;

impl CoefficientInference {
    /// Two-sided critical value t_{1-α/2, df}.
    pub fn critical_value(df: f64, confidence_level: f64) -> f64 {
        if !(df > 0.0) {
            return f64::NAN;
        }
        match StudentsT::new(0.0, 1.0, df) {
            Ok(t_dist) => t_dist.inverse_cdf(1.0 - (1.0 - confidence_level) / 2.0),
            Err(_) => f64::NAN,
        }
    }

    /// Compute t-statistics for coefficients.
    ///
    /// t_j = β_j / SE(β_j)
    pub fn t_statistics(coefficients: &Col<f64>, std_errors: &Col<f64>) -> Col<f64> {
        Col::from_fn(coefficients.nrows(), |j| {
            if std_errors[j].is_nan() || std_errors[j] == 0.0 {
                f64::NAN
            } else {
                coefficients[j] / std_errors[j]
            }
        })
    }

    /// Compute p-values from t-statistics.
    ///
    /// p_j = 2 * P(|T| > |t_j|) where T ~ t(df)
    pub fn p_values(t_statistics: &Col<f64>, df: f64) -> Col<f64> {
        let n = t_statistics.nrows();
        let t_dist = if df > 0.0 {
            StudentsT::new(0.0, 1.0, df).ok()
        } else {
            None
        };

        match t_dist {
            None => Col::from_fn(n, |_| f64::NAN),
            Some(t_dist) => Col::from_fn(n, |j| {
                if t_statistics[j].is_nan() {
                    f64::NAN
                } else {
                    2.0 * (1.0 - t_dist.cdf(t_statistics[j].abs()))
                }
            }),
        }
    }

    /// Compute confidence intervals for coefficients.
    ///
    /// CI_j = β_j ± t_{α/2, df} * SE(β_j)
    pub fn confidence_intervals(
        coefficients: &Col<f64>,
        std_errors: &Col<f64>,
        df: f64,
        confidence_level: f64,
    ) -> (Col<f64>, Col<f64>) {
        let n = coefficients.nrows();
        let t_crit = Self::critical_value(df, confidence_level);

        let lower = Col::from_fn(n, |j| coefficients[j] - t_crit * std_errors[j]);
        let upper = Col::from_fn(n, |j| coefficients[j] + t_crit * std_errors[j]);
        (lower, upper)
    }
}

/// One row of a coefficient table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    /// exp(estimate) and its interval, for odds ratios and incidence-rate ratios.
    pub ratio: Option<RatioScale>,
}

/// Exponentiated coefficient with its interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioScale {
    pub estimate: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

/// Presentation view of a fitted model's coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientTable {
    pub family: ModelFamily,
    pub df: usize,
    pub confidence_level: f64,
    /// "odds ratio", "IRR" or none.
    pub ratio_label: Option<String>,
    pub rows: Vec<CoefficientRow>,
}

impl CoefficientTable {
    /// Build the table from a fitted model.
    ///
    /// Exponentiated values are attached to index coefficients of log-odds and
    /// log-rate models; the intercept and ancillary parameters get none.
    pub fn from_model(model: &FittedModel, confidence_level: f64) -> Self {
        let p = model.n_parameters();
        let coefficients = model.coefficients_col();
        let se_vec = model.std_errors();
        let std_errors = Col::from_fn(p, |j| se_vec[j]);
        let df = model.design_df as f64;

        let t_stats = CoefficientInference::t_statistics(&coefficients, &std_errors);
        let p_vals = CoefficientInference::p_values(&t_stats, df);
        let (lower, upper) = CoefficientInference::confidence_intervals(
            &coefficients,
            &std_errors,
            df,
            confidence_level,
        );

        let rows = model
            .columns
            .iter()
            .enumerate()
            .map(|(j, column)| {
                let ratio = (model.family.has_ratio_scale()
                    && column.is_index()
                    && column.kind != crate::core::ColumnKind::Intercept)
                    .then(|| RatioScale {
                        estimate: coefficients[j].exp(),
                        ci_low: lower[j].exp(),
                        ci_high: upper[j].exp(),
                    });
                CoefficientRow {
                    name: column.name.clone(),
                    estimate: coefficients[j],
                    std_error: std_errors[j],
                    t_statistic: t_stats[j],
                    p_value: p_vals[j],
                    ci_low: lower[j],
                    ci_high: upper[j],
                    ratio,
                }
            })
            .collect();

        Self {
            family: model.family,
            df: model.design_df,
            confidence_level,
            ratio_label: model.family.ratio_label().map(str::to_string),
            rows,
        }
    }

    pub fn row(&self, name: &str) -> Option<&CoefficientRow> {
        self.rows.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnSpec, FamilyExtras};

    #[test]
    fn test_t_statistics() {
        let coefficients = Col::from_fn(3, |i| (i + 1) as f64);
        let std_errors = Col::from_fn(3, |_| 0.5);

        let t_stats = CoefficientInference::t_statistics(&coefficients, &std_errors);

        assert!((t_stats[0] - 2.0).abs() < 1e-10);
        assert!((t_stats[1] - 4.0).abs() < 1e-10);
        assert!((t_stats[2] - 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_p_values_bounds() {
        let t_stats = Col::from_fn(3, |i| (i + 1) as f64);
        let p_vals = CoefficientInference::p_values(&t_stats, 10.0);

        for p in p_vals.iter() {
            assert!(*p >= 0.0 && *p <= 1.0);
        }
    }

    #[test]
    fn test_zero_df_gives_nan() {
        let t_stats = Col::from_fn(2, |_| 1.0);
        assert!(CoefficientInference::p_values(&t_stats, 0.0)[0].is_nan());
        assert!(CoefficientInference::critical_value(0.0, 0.95).is_nan());
    }

    #[test]
    fn test_critical_value_matches_table() {
        // t_{0.975, 10} = 2.228139
        let t = CoefficientInference::critical_value(10.0, 0.95);
        assert!((t - 2.228_138_851_986_274).abs() < 1e-6);
    }

    #[test]
    fn test_table_ratio_scale() {
        let model = FittedModel {
            family: ModelFamily::BinomialLogit,
            columns: vec![ColumnSpec::intercept(), ColumnSpec::level("sex", "Male")],
            coefficients: vec![-0.5, 0.7],
            covariance: vec![vec![0.01, 0.0], vec![0.0, 0.04]],
            log_pseudo_likelihood: -50.0,
            converged: true,
            iterations: 5,
            warnings: vec![],
            n_observations: 100,
            n_strata: 10,
            n_clusters: 20,
            design_df: 10,
            sum_weights: 100.0,
            deviance: Some(120.0),
            null_deviance: Some(131.0),
            extras: FamilyExtras::None,
            encoding: None,
        };

        let table = CoefficientTable::from_model(&model, 0.95);
        assert_eq!(table.ratio_label.as_deref(), Some("odds ratio"));
        assert!(table.row("(Intercept)").unwrap().ratio.is_none());

        let row = table.row("sex[Male]").unwrap();
        assert!((row.std_error - 0.2).abs() < 1e-12);
        assert!((row.t_statistic - 3.5).abs() < 1e-12);
        let ratio = row.ratio.unwrap();
        assert!((ratio.estimate - 0.7_f64.exp()).abs() < 1e-12);
        assert!(ratio.ci_low < ratio.estimate && ratio.estimate < ratio.ci_high);
        assert!((row.ci_high - row.ci_low - 2.0 * 2.228_138_851_986_274 * 0.2).abs() < 1e-5);
    }
}
