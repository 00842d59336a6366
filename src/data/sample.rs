//! Analytic samples: the records that enter design-based estimation.

use super::design::{DesignSpec, SurveyDesign};
use super::record::{AnalyticRecord, Outcome};
use crate::inference::{weighted_mean, WeightedMean};
use crate::solvers::EstimationError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Which records of the kept population a model uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleRestriction {
    /// Every kept record, including people without visits.
    #[default]
    Full,
    /// Sensitivity mode: only records with at least one visit.
    NonzeroVisits,
}

/// Why records of the input collection were left out of a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleTally {
    pub n_input: usize,
    pub n_not_kept: usize,
    pub n_missing_weight: usize,
    pub n_non_positive_weight: usize,
    pub n_zero_visits: usize,
    pub n_retained: usize,
}

/// Kept, positively weighted records with their indexed design.
#[derive(Debug, Clone)]
pub struct AnalyticSample<'a> {
    records: Vec<&'a AnalyticRecord>,
    design: SurveyDesign,
    restriction: SampleRestriction,
    tally: SampleTally,
}

impl<'a> AnalyticSample<'a> {
    /// Select the analytic sample from a record collection.
    ///
    /// Records that are not `keep_child` or lack a positive weight stay out;
    /// the remaining records must carry a stratum and cluster.
    pub fn build(
        records: &'a [AnalyticRecord],
        spec: &DesignSpec,
        restriction: SampleRestriction,
    ) -> Result<Self, EstimationError> {
        let mut tally = SampleTally {
            n_input: records.len(),
            ..SampleTally::default()
        };

        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if !record.keep_child {
                tally.n_not_kept += 1;
                continue;
            }
            match record.weight {
                None => {
                    tally.n_missing_weight += 1;
                    continue;
                }
                Some(_) if !record.has_positive_weight() => {
                    tally.n_non_positive_weight += 1;
                    continue;
                }
                Some(_) => {}
            }
            if restriction == SampleRestriction::NonzeroVisits && !record.keep_nonzero() {
                tally.n_zero_visits += 1;
                continue;
            }
            kept.push(record);
        }
        tally.n_retained = kept.len();

        if kept.is_empty() {
            return Err(EstimationError::EmptySample);
        }

        let design = SurveyDesign::from_records(kept.iter().copied(), spec)?;
        if design.singleton_strata() > 0 {
            warn!(
                singleton_strata = design.singleton_strata(),
                "strata with a single cluster contribute no variance"
            );
        }
        info!(
            n_input = tally.n_input,
            n_retained = tally.n_retained,
            n_strata = design.n_strata(),
            n_clusters = design.n_clusters(),
            restriction = ?restriction,
            "analytic sample built"
        );

        Ok(Self {
            records: kept,
            design,
            restriction,
            tally,
        })
    }

    pub fn records(&self) -> &[&'a AnalyticRecord] {
        &self.records
    }

    pub fn design(&self) -> &SurveyDesign {
        &self.design
    }

    pub fn restriction(&self) -> SampleRestriction {
        self.restriction
    }

    pub fn tally(&self) -> &SampleTally {
        &self.tally
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Outcome values in sample order.
    pub fn outcome(&self, outcome: Outcome) -> Vec<f64> {
        self.records.iter().map(|r| outcome.value(r)).collect()
    }

    /// Design-weighted mean of an outcome with its linearized standard error.
    pub fn weighted_mean(&self, outcome: Outcome) -> Result<WeightedMean, EstimationError> {
        weighted_mean(&self.outcome(outcome), &self.design)
    }
}
