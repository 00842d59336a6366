//! Predictive margins and interaction (trend) models.

mod engine;
mod interaction;

pub use engine::{predict_margins, PredictiveMargins};
pub use interaction::{InteractionFit, InteractionModel};
