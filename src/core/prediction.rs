//! Margin cells and margin results.

use super::family::ModelFamily;
use serde::{Deserialize, Serialize};

/// A combination of factor levels, e.g. `poverty=Poor, year=2021`.
///
/// Assignments keep the order in which they were added; the label follows
/// that order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellSpec {
    assignments: Vec<(String, String)>,
}

impl CellSpec {
    /// The empty cell: every record keeps its observed levels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix `factor` at `level`, replacing an earlier assignment of the same factor.
    pub fn with(mut self, factor: impl Into<String>, level: impl Into<String>) -> Self {
        let factor = factor.into();
        let level = level.into();
        match self.assignments.iter_mut().find(|(f, _)| *f == factor) {
            Some(slot) => slot.1 = level,
            None => self.assignments.push((factor, level)),
        }
        self
    }

    pub fn assignments(&self) -> &[(String, String)] {
        &self.assignments
    }

    /// Level assigned to a factor, if any.
    pub fn get(&self, factor: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|(f, _)| f == factor)
            .map(|(_, l)| l.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Display label `factor=level, factor=level`; `(all)` for the empty cell.
    pub fn label(&self) -> String {
        if self.assignments.is_empty() {
            return "(all)".to_string();
        }
        self.assignments
            .iter()
            .map(|(f, l)| format!("{f}={l}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Cross product of factor levels, the first factor varying slowest.
    pub fn grid<F, L>(factors: &[(F, Vec<L>)]) -> Vec<CellSpec>
    where
        F: AsRef<str>,
        L: AsRef<str>,
    {
        let mut cells = vec![CellSpec::new()];
        for (factor, levels) in factors {
            let mut next = Vec::with_capacity(cells.len() * levels.len());
            for cell in &cells {
                for level in levels {
                    next.push(cell.clone().with(factor.as_ref(), level.as_ref()));
                }
            }
            cells = next;
        }
        cells
    }
}

/// Predictive margin of one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginEstimate {
    pub cell: CellSpec,
    pub label: String,
    pub estimate: f64,
    pub std_error: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

/// Ordered collection of predictive margins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginResult {
    pub family: ModelFamily,
    pub confidence_level: f64,
    /// Degrees of freedom of the reference t distribution.
    pub df: usize,
    /// Levels fixed for every cell, if any.
    pub at: Option<CellSpec>,
    pub margins: Vec<MarginEstimate>,
}

impl MarginResult {
    /// Look up a margin by its cell label.
    pub fn get(&self, label: &str) -> Option<&MarginEstimate> {
        self.margins.iter().find(|m| m.label == label)
    }

    /// Look up a margin by cell.
    pub fn cell(&self, cell: &CellSpec) -> Option<&MarginEstimate> {
        self.margins.iter().find(|m| &m.cell == cell)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.margins.iter().map(|m| m.label.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarginEstimate> {
        self.margins.iter()
    }

    pub fn len(&self) -> usize {
        self.margins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.margins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_label_keeps_insertion_order() {
        let cell = CellSpec::new().with("year", "2021").with("poverty", "Poor");
        assert_eq!(cell.label(), "year=2021, poverty=Poor");
        assert_eq!(cell.get("poverty"), Some("Poor"));
        assert_eq!(CellSpec::new().label(), "(all)");
    }

    #[test]
    fn test_with_replaces_existing_factor() {
        let cell = CellSpec::new().with("year", "2019").with("year", "2020");
        assert_eq!(cell.assignments().len(), 1);
        assert_eq!(cell.get("year"), Some("2020"));
    }

    #[test]
    fn test_grid() {
        let cells = CellSpec::grid(&[
            ("poverty", vec!["Poor", "High"]),
            ("year", vec!["2019", "2020", "2021"]),
        ]);
        assert_eq!(cells.len(), 6);
        assert_eq!(cells[0].label(), "poverty=Poor, year=2019");
        assert_eq!(cells[5].label(), "poverty=High, year=2021");
    }
}
