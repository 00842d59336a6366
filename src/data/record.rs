//! Person-year analytic records.
//!
//! Records arrive already recoded from the extraction stage. They are never
//! deleted: exclusions are flags, and only `keep_child` records with a
//! positive weight enter design-based estimation.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Factor name under which the survey year is exposed.
pub const YEAR: &str = "year";

/// Why a record is flagged out of the analytic sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExclusionReason {
    /// Age outside the study range.
    AgeOutOfRange,
    /// No usable survey weight.
    MissingWeight,
    /// A key covariate is missing.
    MissingCovariate,
    /// No visits of either kind. Diagnostic only, never removes a record.
    ZeroVisits,
}

impl ExclusionReason {
    /// Numeric code used by the exclusion table.
    pub fn code(&self) -> u8 {
        match self {
            ExclusionReason::AgeOutOfRange => 1,
            ExclusionReason::MissingWeight => 2,
            ExclusionReason::MissingCovariate => 3,
            ExclusionReason::ZeroVisits => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ExclusionReason::AgeOutOfRange),
            2 => Some(ExclusionReason::MissingWeight),
            3 => Some(ExclusionReason::MissingCovariate),
            4 => Some(ExclusionReason::ZeroVisits),
            _ => None,
        }
    }

    /// Whether the reason removes a record from the analytic sample.
    pub fn removes_from_sample(&self) -> bool {
        !matches!(self, ExclusionReason::ZeroVisits)
    }
}

/// Outcome variables available on every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// 1 when the person had at least one visit in the year.
    AnyVisit,
    InPersonVisits,
    TelehealthVisits,
    TotalVisits,
    /// Telehealth visits over all visits, 0 when there were none.
    TelehealthShare,
}

impl Outcome {
    pub fn name(&self) -> &'static str {
        match self {
            Outcome::AnyVisit => "any_visit",
            Outcome::InPersonVisits => "in_person_visits",
            Outcome::TelehealthVisits => "telehealth_visits",
            Outcome::TotalVisits => "total_visits",
            Outcome::TelehealthShare => "telehealth_share",
        }
    }

    /// Value of this outcome on a record.
    pub fn value(&self, record: &AnalyticRecord) -> f64 {
        match self {
            Outcome::AnyVisit => {
                if record.any_visit() {
                    1.0
                } else {
                    0.0
                }
            }
            Outcome::InPersonVisits => record.in_person_visits as f64,
            Outcome::TelehealthVisits => record.telehealth_visits as f64,
            Outcome::TotalVisits => record.total_visits() as f64,
            Outcome::TelehealthShare => record.telehealth_share(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One person in one survey year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticRecord {
    pub person_id: String,
    pub year: u16,
    pub weight: Option<f64>,
    pub stratum: Option<String>,
    pub cluster: Option<String>,
    /// Categorical covariates by factor name (poverty, insurance, age group, ...).
    pub covariates: BTreeMap<String, String>,
    pub in_person_visits: u32,
    pub telehealth_visits: u32,
    /// Any reported visit. Supplied with the record; the counts may be
    /// incomplete where the indicator is not.
    #[serde(default)]
    pub any_visit: bool,
    /// Enters design-based estimation.
    pub keep_child: bool,
    pub exclusion: Option<ExclusionReason>,
}

impl AnalyticRecord {
    /// A kept record with no design information, covariates or visits yet.
    pub fn new(person_id: impl Into<String>, year: u16) -> Self {
        Self {
            person_id: person_id.into(),
            year,
            weight: None,
            stratum: None,
            cluster: None,
            covariates: BTreeMap::new(),
            in_person_visits: 0,
            telehealth_visits: 0,
            any_visit: false,
            keep_child: true,
            exclusion: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_stratum(mut self, stratum: impl Into<String>) -> Self {
        self.stratum = Some(stratum.into());
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Set weight, stratum and cluster at once.
    pub fn with_design(
        self,
        weight: f64,
        stratum: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        self.with_weight(weight)
            .with_stratum(stratum)
            .with_cluster(cluster)
    }

    pub fn with_covariate(mut self, factor: impl Into<String>, level: impl Into<String>) -> Self {
        self.covariates.insert(factor.into(), level.into());
        self
    }

    /// Set both visit counts; the indicator follows their total.
    pub fn with_visits(mut self, in_person: u32, telehealth: u32) -> Self {
        self.in_person_visits = in_person;
        self.telehealth_visits = telehealth;
        self.any_visit = in_person + telehealth > 0;
        self
    }

    /// Override the visit indicator after the counts are set.
    pub fn with_any_visit(mut self, any_visit: bool) -> Self {
        self.any_visit = any_visit;
        self
    }

    /// Flag the record. Reasons other than zero visits also clear `keep_child`.
    pub fn with_exclusion(mut self, reason: ExclusionReason) -> Self {
        if reason.removes_from_sample() {
            self.keep_child = false;
        }
        self.exclusion = Some(reason);
        self
    }

    pub fn total_visits(&self) -> u32 {
        self.in_person_visits + self.telehealth_visits
    }

    pub fn any_visit(&self) -> bool {
        self.any_visit
    }

    /// Diagnostic flag: the record has at least one visit.
    pub fn keep_nonzero(&self) -> bool {
        self.total_visits() > 0
    }

    /// telehealth / (telehealth + in-person), exactly 0.0 without visits.
    pub fn telehealth_share(&self) -> f64 {
        let total = self.total_visits();
        if total > 0 {
            self.telehealth_visits as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Level of a factor on this record; `year` is always available.
    pub fn level(&self, factor: &str) -> Option<Cow<'_, str>> {
        match self.covariates.get(factor) {
            Some(level) => Some(Cow::Borrowed(level.as_str())),
            None if factor == YEAR => Some(Cow::Owned(self.year.to_string())),
            None => None,
        }
    }

    /// Whether the record has a usable survey weight.
    pub fn has_positive_weight(&self) -> bool {
        matches!(self.weight, Some(w) if w > 0.0 && w.is_finite())
    }

    /// Whether the record enters design-based estimation.
    pub fn in_analytic_sample(&self) -> bool {
        self.keep_child && self.has_positive_weight()
    }
}
