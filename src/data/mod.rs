//! Analytic records, survey design and model frames.

pub mod design;
pub mod encoding;
pub mod record;
pub mod sample;

pub use design::{DesignSpec, DesignUnit, SurveyDesign};
pub use encoding::{EncodedFactor, FactorSpec, Formula, ModelEncoding, ModelFrame};
pub use record::{AnalyticRecord, ExclusionReason, Outcome, YEAR};
pub use sample::{AnalyticSample, SampleRestriction, SampleTally};
