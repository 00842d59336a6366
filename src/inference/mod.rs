//! Design-based inference: linearized variance and coefficient tables.

mod coefficient;
mod linearized;

pub use coefficient::{CoefficientInference, CoefficientRow, CoefficientTable, RatioScale};
pub use linearized::{cluster_totals, estimate_variance, sandwich, weighted_mean, WeightedMean};
