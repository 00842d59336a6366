//! Factor encoding and model frames.
//!
//! Every factor contributes one indicator per non-reference level; the
//! reference is the first level in canonical order (the declared order when
//! one is given, otherwise ascending order of the observed labels).
//! An interaction of two factors contributes one indicator per
//! non-reference × non-reference combination.
//!
//! Column names: `(Intercept)`, `factor[level]`, `a[la]:b[lb]`.

use super::design::SurveyDesign;
use super::record::{AnalyticRecord, Outcome};
use super::sample::AnalyticSample;
use crate::core::{CellSpec, ColumnSpec};
use crate::solvers::EstimationError;
use faer::{Col, Mat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A factor in a formula, optionally with a declared level order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorSpec {
    pub name: String,
    #[serde(default)]
    pub levels: Option<Vec<String>>,
}

impl FactorSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            levels: None,
        }
    }

    /// Factor with a declared order; the first level is the reference.
    pub fn ordered<S: Into<String>>(
        name: impl Into<String>,
        levels: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            levels: Some(levels.into_iter().map(Into::into).collect()),
        }
    }
}

/// Outcome, main-effect factors and two-way interactions of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    pub outcome: Outcome,
    #[serde(default)]
    pub factors: Vec<FactorSpec>,
    #[serde(default)]
    pub interactions: Vec<(String, String)>,
}

impl Formula {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            factors: Vec::new(),
            interactions: Vec::new(),
        }
    }

    pub fn factor(mut self, name: impl Into<String>) -> Self {
        self.factors.push(FactorSpec::new(name));
        self
    }

    pub fn ordered_factor<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        levels: impl IntoIterator<Item = S>,
    ) -> Self {
        self.factors.push(FactorSpec::ordered(name, levels));
        self
    }

    pub fn with_factor(mut self, factor: FactorSpec) -> Self {
        self.factors.push(factor);
        self
    }

    pub fn interaction(mut self, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.interactions.push((first.into(), second.into()));
        self
    }

    fn validate(&self) -> Result<(), EstimationError> {
        let mut seen = BTreeSet::new();
        for factor in &self.factors {
            if !seen.insert(factor.name.as_str()) {
                return Err(EstimationError::InvalidFormula(format!(
                    "factor `{}` listed twice",
                    factor.name
                )));
            }
        }
        for (a, b) in &self.interactions {
            if a == b {
                return Err(EstimationError::InvalidFormula(format!(
                    "factor `{a}` interacted with itself"
                )));
            }
            for f in [a, b] {
                if !seen.contains(f.as_str()) {
                    return Err(EstimationError::InvalidFormula(format!(
                        "interaction term `{f}` has no main effect"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A factor with its canonical level order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedFactor {
    pub name: String,
    pub levels: Vec<String>,
}

impl EncodedFactor {
    pub fn reference(&self) -> &str {
        &self.levels[0]
    }

    fn position(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }
}

/// Mapping from factor levels to design-matrix columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEncoding {
    outcome: Outcome,
    factors: Vec<EncodedFactor>,
    /// Pairs of positions into `factors`.
    interactions: Vec<(usize, usize)>,
    columns: Vec<ColumnSpec>,
}

impl ModelEncoding {
    /// Derive the encoding of a formula from the records it will be fit on.
    pub fn from_records<'a, I>(formula: &Formula, records: I) -> Result<Self, EstimationError>
    where
        I: IntoIterator<Item = &'a AnalyticRecord>,
    {
        formula.validate()?;
        let records: Vec<&AnalyticRecord> = records.into_iter().collect();

        let mut factors = Vec::with_capacity(formula.factors.len());
        for spec in &formula.factors {
            let mut observed = BTreeSet::new();
            for record in &records {
                let level = record.level(&spec.name).ok_or_else(|| {
                    EstimationError::MissingCovariate {
                        record_id: record.person_id.clone(),
                        factor: spec.name.clone(),
                    }
                })?;
                observed.insert(level.into_owned());
            }

            let levels = match &spec.levels {
                Some(declared) => {
                    if let Some(unknown) = observed.iter().find(|l| !declared.contains(l)) {
                        return Err(EstimationError::InvalidFormula(format!(
                            "level `{unknown}` of `{}` is not in its declared order",
                            spec.name
                        )));
                    }
                    declared.clone()
                }
                None => observed.into_iter().collect(),
            };
            if levels.is_empty() {
                return Err(EstimationError::InvalidFormula(format!(
                    "factor `{}` has no levels",
                    spec.name
                )));
            }

            factors.push(EncodedFactor {
                name: spec.name.clone(),
                levels,
            });
        }

        Self::from_factors(formula.outcome, factors, &formula.interactions)
    }

    /// Build an encoding from factors in canonical order.
    pub fn from_factors(
        outcome: Outcome,
        factors: Vec<EncodedFactor>,
        interactions: &[(String, String)],
    ) -> Result<Self, EstimationError> {
        if let Some(empty) = factors.iter().find(|f| f.levels.is_empty()) {
            return Err(EstimationError::InvalidFormula(format!(
                "factor `{}` has no levels",
                empty.name
            )));
        }
        let find = |name: &str| {
            factors.iter().position(|f| f.name == name).ok_or_else(|| {
                let message = format!("interaction term `{name}` has no main effect");
                EstimationError::InvalidFormula(message)
            })
        };
        let interactions = interactions
            .iter()
            .map(|(a, b)| Ok((find(a)?, find(b)?)))
            .collect::<Result<Vec<_>, EstimationError>>()?;

        let mut columns = vec![ColumnSpec::intercept()];
        for factor in &factors {
            for level in &factor.levels[1..] {
                columns.push(ColumnSpec::level(&factor.name, level));
            }
        }
        for &(a, b) in &interactions {
            let (fa, fb) = (&factors[a], &factors[b]);
            for la in &fa.levels[1..] {
                for lb in &fb.levels[1..] {
                    columns.push(ColumnSpec::interaction((&fa.name, la), (&fb.name, lb)));
                }
            }
        }

        Ok(Self {
            outcome,
            factors,
            interactions,
            columns,
        })
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn factors(&self) -> &[EncodedFactor] {
        &self.factors
    }

    pub fn factor(&self, name: &str) -> Option<&EncodedFactor> {
        self.factors.iter().find(|f| f.name == name)
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Check that every assignment of a cell names an encoded factor and level.
    pub fn validate_cell(&self, cell: &CellSpec) -> Result<(), EstimationError> {
        for (factor, level) in cell.assignments() {
            let encoded = self.factor(factor).ok_or_else(|| EstimationError::InvalidCell {
                cell: cell.label(),
                reason: format!("factor `{factor}` is not in the model"),
            })?;
            if encoded.position(level).is_none() {
                return Err(EstimationError::InvalidCell {
                    cell: cell.label(),
                    reason: format!("level `{level}` of `{factor}` is not in the model encoding"),
                });
            }
        }
        Ok(())
    }

    /// Design row for a record whose levels are given by `level_of`.
    ///
    /// `level_of` maps a factor name to its level; unknown levels are reported
    /// as invalid cells against `context`.
    pub fn encode_row<'s, F>(&self, level_of: F, context: &str) -> Result<Vec<f64>, EstimationError>
    where
        F: Fn(&str) -> Option<&'s str>,
    {
        let mut positions = Vec::with_capacity(self.factors.len());
        for factor in &self.factors {
            let level = level_of(&factor.name).ok_or_else(|| EstimationError::InvalidCell {
                cell: context.to_string(),
                reason: format!("no level for factor `{}`", factor.name),
            })?;
            let position = factor
                .position(level)
                .ok_or_else(|| EstimationError::InvalidCell {
                    cell: context.to_string(),
                    reason: format!(
                        "level `{level}` of `{}` is not in the model encoding",
                        factor.name
                    ),
                })?;
            positions.push(position);
        }
        Ok(self.row_from_positions(&positions))
    }

    /// Design row from level positions, one per factor.
    pub(crate) fn row_from_positions(&self, positions: &[usize]) -> Vec<f64> {
        let mut row = vec![0.0; self.columns.len()];
        row[0] = 1.0;

        let mut offset = 1;
        for (factor, &position) in self.factors.iter().zip(positions.iter()) {
            if position > 0 {
                row[offset + position - 1] = 1.0;
            }
            offset += factor.levels.len() - 1;
        }
        for &(a, b) in &self.interactions {
            let width_b = self.factors[b].levels.len() - 1;
            let (pa, pb) = (positions[a], positions[b]);
            if pa > 0 && pb > 0 {
                row[offset + (pa - 1) * width_b + (pb - 1)] = 1.0;
            }
            offset += (self.factors[a].levels.len() - 1) * width_b;
        }
        row
    }

    /// Level positions of one record, one per factor.
    fn positions_of(&self, record: &AnalyticRecord) -> Result<Vec<usize>, EstimationError> {
        self.factors
            .iter()
            .map(|factor| {
                let level = record.level(&factor.name).ok_or_else(|| {
                    EstimationError::MissingCovariate {
                        record_id: record.person_id.clone(),
                        factor: factor.name.clone(),
                    }
                })?;
                factor
                    .position(&level)
                    .ok_or_else(|| EstimationError::InvalidCell {
                        cell: format!("{}={}", factor.name, level),
                        reason: format!(
                            "record {} has a level outside the encoding",
                            record.person_id
                        ),
                    })
            })
            .collect()
    }
}

/// Encoded data of one model: design matrix, outcome, per-record levels and design.
#[derive(Debug, Clone)]
pub struct ModelFrame {
    pub encoding: ModelEncoding,
    pub x: Mat<f64>,
    pub y: Col<f64>,
    pub design: SurveyDesign,
    /// Level position of every factor, per record.
    pub(crate) positions: Vec<Vec<usize>>,
}

impl ModelFrame {
    /// Encode an analytic sample with a formula.
    pub fn build(sample: &AnalyticSample<'_>, formula: &Formula) -> Result<Self, EstimationError> {
        let encoding = ModelEncoding::from_records(formula, sample.records().iter().copied())?;
        Self::with_encoding(sample, encoding)
    }

    /// Encode an analytic sample with an existing encoding.
    pub fn with_encoding(
        sample: &AnalyticSample<'_>,
        encoding: ModelEncoding,
    ) -> Result<Self, EstimationError> {
        let records = sample.records();
        let positions = records
            .iter()
            .map(|r| encoding.positions_of(r))
            .collect::<Result<Vec<_>, _>>()?;

        let n = records.len();
        let p = encoding.n_columns();
        let mut x = Mat::zeros(n, p);
        for (i, pos) in positions.iter().enumerate() {
            let row = encoding.row_from_positions(pos);
            for j in 0..p {
                x[(i, j)] = row[j];
            }
        }
        let outcome = encoding.outcome();
        let y = Col::from_fn(n, |i| outcome.value(records[i]));

        Ok(Self {
            encoding,
            x,
            y,
            design: sample.design().clone(),
            positions,
        })
    }

    pub fn n_records(&self) -> usize {
        self.x.nrows()
    }

    pub fn weights(&self) -> &[f64] {
        self.design.weights()
    }

    /// Observed level of a factor on record `i`.
    pub fn level(&self, i: usize, factor: &str) -> Option<&str> {
        let k = self.encoding.factors.iter().position(|f| f.name == factor)?;
        Some(self.encoding.factors[k].levels[self.positions[i][k]].as_str())
    }

    /// Design row of record `i` after fixing the levels of `overrides`.
    pub(crate) fn counterfactual_row(&self, i: usize, overrides: &[Option<usize>]) -> Vec<f64> {
        let positions: Vec<usize> = self.positions[i]
            .iter()
            .zip(overrides.iter())
            .map(|(&observed, fixed)| fixed.unwrap_or(observed))
            .collect();
        self.encoding.row_from_positions(&positions)
    }

    /// Level positions implied by a cell, one slot per factor.
    pub(crate) fn override_positions(
        &self,
        cell: &CellSpec,
    ) -> Result<Vec<Option<usize>>, EstimationError> {
        self.encoding.validate_cell(cell)?;
        Ok(self
            .encoding
            .factors
            .iter()
            .map(|f| cell.get(&f.name).and_then(|level| f.position(level)))
            .collect())
    }
}
