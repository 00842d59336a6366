//! Interaction (trend) models: two factors, their product terms and the
//! predictive margins of every combination of their levels.

use super::engine::PredictiveMargins;
use crate::core::{CellSpec, ColumnKind, EstimationOptions, FittedModel, MarginResult, ModelFamily};
use crate::data::{AnalyticSample, FactorSpec, Formula, ModelFrame, Outcome};
use crate::solvers::{
    BinomialRegressor, EstimationError, NegativeBinomialRegressor, SurveyEstimator,
};
use tracing::info;

/// A two-factor interaction model, e.g. poverty × year.
#[derive(Debug, Clone)]
pub struct InteractionModel {
    outcome: Outcome,
    family: ModelFamily,
    first: FactorSpec,
    second: FactorSpec,
    adjustments: Vec<FactorSpec>,
    options: EstimationOptions,
}

/// Everything an interaction fit produces.
#[derive(Debug, Clone)]
pub struct InteractionFit {
    pub formula: Formula,
    pub frame: ModelFrame,
    pub model: FittedModel,
    /// One margin per combination of the two factors, first factor slowest.
    pub margins: MarginResult,
}

impl InteractionFit {
    /// Product-term coefficients by column name.
    pub fn interaction_coefficients(&self) -> Vec<(&str, f64)> {
        self.model
            .columns
            .iter()
            .zip(self.model.coefficients.iter())
            .filter(|(c, _)| matches!(c.kind, ColumnKind::Interaction { .. }))
            .map(|(c, &b)| (c.name.as_str(), b))
            .collect()
    }
}

impl InteractionModel {
    /// Interaction of `first` and `second` on `outcome` with the given family.
    pub fn new(
        outcome: Outcome,
        family: ModelFamily,
        first: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        Self {
            outcome,
            family,
            first: FactorSpec::new(first),
            second: FactorSpec::new(second),
            adjustments: Vec::new(),
            options: EstimationOptions::default(),
        }
    }

    /// Declare the level order of the first factor.
    pub fn first_levels<S: Into<String>>(mut self, levels: impl IntoIterator<Item = S>) -> Self {
        self.first = FactorSpec::ordered(self.first.name, levels);
        self
    }

    /// Declare the level order of the second factor.
    pub fn second_levels<S: Into<String>>(mut self, levels: impl IntoIterator<Item = S>) -> Self {
        self.second = FactorSpec::ordered(self.second.name, levels);
        self
    }

    /// Add an adjustment factor (main effect only).
    pub fn adjust(mut self, factor: FactorSpec) -> Self {
        self.adjustments.push(factor);
        self
    }

    pub fn options(mut self, options: EstimationOptions) -> Self {
        self.options = options;
        self
    }

    /// The model formula: both main effects, the adjustments and the product terms.
    pub fn formula(&self) -> Formula {
        let mut formula = Formula::new(self.outcome)
            .with_factor(self.first.clone())
            .with_factor(self.second.clone());
        for factor in &self.adjustments {
            formula = formula.with_factor(factor.clone());
        }
        formula.interaction(self.first.name.clone(), self.second.name.clone())
    }

    fn estimator(&self) -> Result<Box<dyn SurveyEstimator>, EstimationError> {
        match self.family {
            ModelFamily::BinomialLogit => {
                Ok(Box::new(BinomialRegressor::new(self.options.clone())))
            }
            ModelFamily::NegativeBinomialLog => {
                Ok(Box::new(NegativeBinomialRegressor::new(self.options.clone())))
            }
            ModelFamily::TwoSidedCensored => Err(EstimationError::InvalidFormula(
                "interaction models are fit with the logit or negative binomial family".to_string(),
            )),
        }
    }

    /// Fit the model on a sample and compute margins for every level combination.
    pub fn fit(&self, sample: &AnalyticSample<'_>) -> Result<InteractionFit, EstimationError> {
        let estimator = self.estimator()?;
        let formula = self.formula();
        let frame = ModelFrame::build(sample, &formula)?;
        let model = estimator.fit_frame(&frame)?;

        let levels = |name: &str| -> Result<Vec<String>, EstimationError> {
            frame
                .encoding
                .factor(name)
                .map(|f| f.levels.clone())
                .ok_or_else(|| {
                    EstimationError::InvalidFormula(format!("factor `{name}` is not encoded"))
                })
        };
        let cells = CellSpec::grid(&[
            (self.first.name.as_str(), levels(&self.first.name)?),
            (self.second.name.as_str(), levels(&self.second.name)?),
        ]);

        let margins = PredictiveMargins::new(&model, &frame)
            .confidence_level(self.options.confidence_level)
            .compute(&cells)?;

        info!(
            outcome = %self.outcome,
            family = %self.family,
            first = %self.first.name,
            second = %self.second.name,
            cells = margins.len(),
            "interaction model fit"
        );

        Ok(InteractionFit {
            formula,
            frame,
            model,
            margins,
        })
    }
}
