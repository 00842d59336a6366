//! Independent model fits over one record collection.
//!
//! Each [`ModelSpec`] names a family, a formula and a sample restriction.
//! [`fit_models`] fits every spec on its own analytic sample in parallel; a
//! failing spec never affects the others.

use crate::core::{EstimationOptions, FittedModel, ModelFamily};
use crate::data::{
    AnalyticRecord, AnalyticSample, DesignSpec, Formula, ModelFrame, SampleRestriction,
    SampleTally,
};
use crate::solvers::{
    BinomialRegressor, EstimationError, NegativeBinomialRegressor, SurveyEstimator,
    TobitRegressor,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Estimator of a model spec.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModelKind {
    Logit,
    NegativeBinomial,
    Tobit { lower: f64, upper: f64 },
}

impl ModelKind {
    pub fn family(&self) -> ModelFamily {
        match self {
            ModelKind::Logit => ModelFamily::BinomialLogit,
            ModelKind::NegativeBinomial => ModelFamily::NegativeBinomialLog,
            ModelKind::Tobit { .. } => ModelFamily::TwoSidedCensored,
        }
    }

    /// Estimator configured with `options`.
    pub fn estimator(&self, options: &EstimationOptions) -> Box<dyn SurveyEstimator> {
        match *self {
            ModelKind::Logit => Box::new(BinomialRegressor::new(options.clone())),
            ModelKind::NegativeBinomial => {
                Box::new(NegativeBinomialRegressor::new(options.clone()))
            }
            ModelKind::Tobit { lower, upper } => {
                Box::new(TobitRegressor::new(options.clone(), lower, upper))
            }
        }
    }
}

/// One model of an analysis plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub kind: ModelKind,
    pub formula: Formula,
    #[serde(default)]
    pub restriction: SampleRestriction,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, kind: ModelKind, formula: Formula) -> Self {
        Self {
            name: name.into(),
            kind,
            formula,
            restriction: SampleRestriction::Full,
        }
    }

    pub fn restriction(mut self, restriction: SampleRestriction) -> Self {
        self.restriction = restriction;
        self
    }
}

/// A fitted spec with the frame margins are computed on.
#[derive(Debug, Clone)]
pub struct FittedSpec {
    pub frame: ModelFrame,
    pub model: FittedModel,
    pub tally: SampleTally,
}

/// Outcome of one spec.
#[derive(Debug)]
pub struct ModelRun {
    pub name: String,
    pub result: Result<FittedSpec, EstimationError>,
}

/// Fit one spec on its analytic sample.
pub fn fit_model(
    spec: &ModelSpec,
    records: &[AnalyticRecord],
    design: &DesignSpec,
    options: &EstimationOptions,
) -> Result<FittedSpec, EstimationError> {
    let sample = AnalyticSample::build(records, design, spec.restriction)?;
    let frame = ModelFrame::build(&sample, &spec.formula)?;
    let model = spec.kind.estimator(options).fit_frame(&frame)?;
    Ok(FittedSpec {
        frame,
        model,
        tally: *sample.tally(),
    })
}

/// Fit every spec in parallel, results in spec order.
pub fn fit_models(
    specs: &[ModelSpec],
    records: &[AnalyticRecord],
    design: &DesignSpec,
    options: &EstimationOptions,
) -> Vec<ModelRun> {
    let runs: Vec<ModelRun> = specs
        .par_iter()
        .map(|spec| {
            let result = fit_model(spec, records, design, options);
            if let Err(e) = &result {
                warn!(model = %spec.name, error = %e, "model fit failed");
            }
            ModelRun {
                name: spec.name.clone(),
                result,
            }
        })
        .collect();

    info!(
        models = runs.len(),
        failed = runs.iter().filter(|r| r.result.is_err()).count(),
        "model plan complete"
    );
    runs
}
