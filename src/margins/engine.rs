//! Predictive margins with delta-method standard errors.
//!
//! For each cell every record keeps its observed covariates except the
//! factors fixed by the cell (and by the `at` override). The record's
//! design row is re-encoded, the family's response function applied, and the
//! survey-weighted average taken. The gradient of that average with respect
//! to the full parameter vector is propagated through the model covariance.

use crate::core::{censored_expectation_at, CellSpec, FittedModel, MarginEstimate, MarginResult};
use crate::data::ModelFrame;
use crate::inference::CoefficientInference;
use crate::solvers::EstimationError;
use crate::utils::quadratic_form;
use faer::Mat;
use tracing::debug;

/// Predicted response of one design row with its gradient.
struct Prediction {
    value: f64,
    /// ∂value/∂η
    d_eta: f64,
    /// ∂value/∂(ln σ), censored model only.
    d_ln_sigma: f64,
}

/// Margins request bound to a fitted model and the frame it was fit on.
#[derive(Debug, Clone)]
pub struct PredictiveMargins<'a> {
    model: &'a FittedModel,
    frame: &'a ModelFrame,
    confidence_level: f64,
    at: Option<CellSpec>,
}

impl<'a> PredictiveMargins<'a> {
    pub fn new(model: &'a FittedModel, frame: &'a ModelFrame) -> Self {
        Self {
            model,
            frame,
            confidence_level: 0.95,
            at: None,
        }
    }

    pub fn confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = level;
        self
    }

    /// Levels fixed for every cell; a cell's own levels take precedence.
    pub fn at(mut self, at: CellSpec) -> Self {
        self.at = Some(at);
        self
    }

    fn check_compatible(&self) -> Result<(), EstimationError> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            let level = self.confidence_level;
            return Err(crate::core::OptionsError::InvalidConfidenceLevel(level).into());
        }
        match &self.model.encoding {
            Some(encoding) if *encoding == self.frame.encoding => {}
            Some(_) => {
                return Err(EstimationError::InvalidFormula(
                    "model frame was encoded differently from the fitted model".to_string(),
                ))
            }
            None => {
                return Err(EstimationError::InvalidFormula(
                    "fitted model carries no factor encoding".to_string(),
                ))
            }
        }
        if self.model.n_index_parameters() != self.frame.encoding.n_columns() {
            return Err(EstimationError::DimensionMismatch {
                x_rows: self.frame.encoding.n_columns(),
                y_len: self.model.n_index_parameters(),
            });
        }
        if self.frame.n_records() == 0 {
            return Err(EstimationError::EmptySample);
        }
        Ok(())
    }

    fn predict(&self, eta: f64) -> Prediction {
        if let Some(link) = self.model.family.link() {
            return Prediction {
                value: link.link_inverse(eta),
                d_eta: link.link_inverse_derivative(eta),
                d_ln_sigma: 0.0,
            };
        }
        let (lower, upper) = self.model.bounds().unwrap_or((0.0, 1.0));
        let sigma = self.model.sigma().unwrap_or(1.0);
        let e = censored_expectation_at(eta, sigma, lower, upper);
        Prediction {
            value: e.value,
            d_eta: e.d_eta,
            d_ln_sigma: e.d_ln_sigma,
        }
    }

    /// Margin of one cell given the covariance of the full parameter vector.
    fn margin(
        &self,
        cell: &CellSpec,
        covariance: &Mat<f64>,
        t_crit: f64,
    ) -> Result<MarginEstimate, EstimationError> {
        let frame = self.frame;
        let mut overrides = frame.override_positions(cell)?;
        if let Some(at) = &self.at {
            let fixed = frame.override_positions(at)?;
            for (slot, at_level) in overrides.iter_mut().zip(fixed) {
                if slot.is_none() {
                    *slot = at_level;
                }
            }
        }

        let n_params = self.model.n_parameters();
        let n_index = self.model.n_index_parameters();
        let coefficients = self.model.index_coefficients();
        let weights = frame.weights();
        let sum_w: f64 = weights.iter().sum();

        let mut estimate = 0.0;
        let mut gradient = vec![0.0; n_params];
        for i in 0..frame.n_records() {
            let row = frame.counterfactual_row(i, &overrides);
            let eta: f64 = coefficients.iter().zip(row.iter()).map(|(b, x)| b * x).sum();
            let p = self.predict(eta);
            let share = weights[i] / sum_w;

            estimate += share * p.value;
            for j in 0..n_index {
                gradient[j] += share * p.d_eta * row[j];
            }
            if n_params > n_index {
                gradient[n_index] += share * p.d_ln_sigma;
            }
        }

        let std_error = quadratic_form(covariance, &gradient).max(0.0).sqrt();
        Ok(MarginEstimate {
            label: cell.label(),
            cell: cell.clone(),
            estimate,
            std_error,
            ci_low: estimate - t_crit * std_error,
            ci_high: estimate + t_crit * std_error,
        })
    }

    /// Compute the margins of `cells` in order.
    pub fn compute(&self, cells: &[CellSpec]) -> Result<MarginResult, EstimationError> {
        self.check_compatible()?;
        if let Some(at) = &self.at {
            self.frame.encoding.validate_cell(at)?;
        }

        let covariance = self.model.covariance_mat();
        let df = self.model.design_df as f64;
        let t_crit = CoefficientInference::critical_value(df, self.confidence_level);

        let margins = cells
            .iter()
            .map(|cell| self.margin(cell, &covariance, t_crit))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            family = %self.model.family,
            cells = margins.len(),
            df = self.model.design_df,
            "predictive margins"
        );

        Ok(MarginResult {
            family: self.model.family,
            confidence_level: self.confidence_level,
            df: self.model.design_df,
            at: self.at.clone(),
            margins,
        })
    }
}

/// Predictive margins of `cells` at 95% confidence.
pub fn predict_margins(
    model: &FittedModel,
    frame: &ModelFrame,
    cells: &[CellSpec],
    at: Option<&CellSpec>,
) -> Result<MarginResult, EstimationError> {
    let request = PredictiveMargins::new(model, frame);
    match at {
        Some(at) => request.at(at.clone()).compute(cells),
        None => request.compute(cells),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        AnalyticRecord, AnalyticSample, DesignSpec, Formula, Outcome, SampleRestriction,
    };
    use crate::solvers::{BinomialRegressor, SurveyEstimator};
    use approx::assert_relative_eq;

    fn records() -> Vec<AnalyticRecord> {
        // Two strata with two clusters each; group A has 2 of 4 with a visit,
        // group B 1 of 4.
        let rows = [
            ("1", "A", "1", "a", true),
            ("2", "A", "1", "b", false),
            ("3", "B", "1", "a", false),
            ("4", "B", "1", "b", true),
            ("5", "A", "2", "a", true),
            ("6", "A", "2", "b", false),
            ("7", "B", "2", "a", false),
            ("8", "B", "2", "b", false),
        ];
        rows.iter()
            .map(|&(id, group, s, c, visit)| {
                AnalyticRecord::new(id, 2020)
                    .with_design(1.0, s, c)
                    .with_covariate("group", group)
                    .with_visits(u32::from(visit), 0)
            })
            .collect()
    }

    #[test]
    fn test_saturated_margins_reproduce_proportions() {
        let recs = records();
        let sample =
            AnalyticSample::build(&recs, &DesignSpec::default(), SampleRestriction::Full).unwrap();
        let formula = Formula::new(Outcome::AnyVisit).factor("group");
        let frame = ModelFrame::build(&sample, &formula).unwrap();
        let model = BinomialRegressor::logistic().build().fit_frame(&frame).unwrap();

        let cells = CellSpec::grid(&[("group", vec!["A", "B"])]);
        let margins = predict_margins(&model, &frame, &cells, None).unwrap();
        assert_eq!(margins.labels(), vec!["group=A", "group=B"]);
        assert_relative_eq!(margins.get("group=A").unwrap().estimate, 0.5, epsilon = 1e-8);
        assert_relative_eq!(margins.get("group=B").unwrap().estimate, 0.25, epsilon = 1e-8);
        assert_eq!(margins.df, 2);
    }

    #[test]
    fn test_unknown_level_is_invalid_cell() {
        let recs = records();
        let sample =
            AnalyticSample::build(&recs, &DesignSpec::default(), SampleRestriction::Full).unwrap();
        let formula = Formula::new(Outcome::AnyVisit).factor("group");
        let frame = ModelFrame::build(&sample, &formula).unwrap();
        let model = BinomialRegressor::logistic().build().fit_frame(&frame).unwrap();

        let cells = vec![CellSpec::new().with("group", "C")];
        assert!(matches!(
            predict_margins(&model, &frame, &cells, None),
            Err(EstimationError::InvalidCell { .. })
        ));
        let cells = vec![CellSpec::new().with("region", "West")];
        assert!(matches!(
            predict_margins(&model, &frame, &cells, None),
            Err(EstimationError::InvalidCell { .. })
        ));
    }

    #[test]
    fn test_model_without_encoding_is_rejected() {
        let recs = records();
        let sample =
            AnalyticSample::build(&recs, &DesignSpec::default(), SampleRestriction::Full).unwrap();
        let formula = Formula::new(Outcome::AnyVisit).factor("group");
        let frame = ModelFrame::build(&sample, &formula).unwrap();
        let mut model = BinomialRegressor::logistic().build().fit_frame(&frame).unwrap();
        model.encoding = None;
        assert!(matches!(
            predict_margins(&model, &frame, &[CellSpec::new()], None),
            Err(EstimationError::InvalidFormula(_))
        ));
    }
}
