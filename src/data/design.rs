//! Survey design descriptor.
//!
//! [`DesignSpec`] names the design variables; [`SurveyDesign`] is the indexed
//! form used by the variance estimator. Strata and clusters are sorted by id
//! so every reduction over them happens in the same order on every run.

use super::record::AnalyticRecord;
use crate::solvers::{DesignIssue, EstimationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Names of the design variables bound to a record collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignSpec {
    pub stratum: String,
    pub cluster: String,
    pub weight: String,
    /// Cluster ids are only unique within their stratum.
    pub nest_clusters: bool,
}

impl Default for DesignSpec {
    fn default() -> Self {
        Self {
            stratum: "stratum".to_string(),
            cluster: "cluster".to_string(),
            weight: "weight".to_string(),
            nest_clusters: true,
        }
    }
}

impl DesignSpec {
    pub fn new(
        stratum: impl Into<String>,
        cluster: impl Into<String>,
        weight: impl Into<String>,
    ) -> Self {
        Self {
            stratum: stratum.into(),
            cluster: cluster.into(),
            weight: weight.into(),
            nest_clusters: true,
        }
    }

    pub fn nest_clusters(mut self, nest: bool) -> Self {
        self.nest_clusters = nest;
        self
    }
}

/// Design information of one record before indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignUnit {
    pub id: String,
    pub weight: Option<f64>,
    pub stratum: Option<String>,
    pub cluster: Option<String>,
}

/// Indexed survey design over an ordered set of records.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyDesign {
    record_ids: Vec<String>,
    weights: Vec<f64>,
    stratum_index: Vec<usize>,
    cluster_index: Vec<usize>,
    strata: Vec<String>,
    /// (stratum index, cluster id) per cluster, sorted.
    clusters: Vec<(usize, String)>,
    clusters_per_stratum: Vec<usize>,
}

impl SurveyDesign {
    /// Index a collection of design units.
    ///
    /// Fails with a design error naming the first record that lacks a
    /// stratum, a cluster or a positive weight.
    pub fn from_units<I>(units: I, spec: &DesignSpec) -> Result<Self, EstimationError>
    where
        I: IntoIterator<Item = DesignUnit>,
    {
        let mut record_ids = Vec::new();
        let mut weights = Vec::new();
        let mut keys: Vec<(String, String)> = Vec::new();

        for unit in units {
            let stratum = unit.stratum.ok_or_else(|| EstimationError::Design {
                record_id: unit.id.clone(),
                issue: DesignIssue::MissingStratum(spec.stratum.clone()),
            })?;
            let cluster = unit.cluster.ok_or_else(|| EstimationError::Design {
                record_id: unit.id.clone(),
                issue: DesignIssue::MissingCluster(spec.cluster.clone()),
            })?;
            let weight = match unit.weight {
                None => {
                    return Err(EstimationError::Design {
                        record_id: unit.id,
                        issue: DesignIssue::MissingWeight(spec.weight.clone()),
                    })
                }
                Some(w) if !(w > 0.0 && w.is_finite()) => {
                    return Err(EstimationError::Design {
                        record_id: unit.id,
                        issue: DesignIssue::NonPositiveWeight {
                            variable: spec.weight.clone(),
                            value: w,
                        },
                    })
                }
                Some(w) => w,
            };

            record_ids.push(unit.id);
            weights.push(weight);
            keys.push((stratum, cluster));
        }

        Ok(Self::index(record_ids, weights, keys, spec.nest_clusters))
    }

    /// Index analytic records with the given design variable names.
    pub fn from_records<'a, I>(records: I, spec: &DesignSpec) -> Result<Self, EstimationError>
    where
        I: IntoIterator<Item = &'a AnalyticRecord>,
    {
        Self::from_units(
            records.into_iter().map(|r| DesignUnit {
                id: r.person_id.clone(),
                weight: r.weight,
                stratum: r.stratum.clone(),
                cluster: r.cluster.clone(),
            }),
            spec,
        )
    }

    /// Stratified cluster design from parallel columns; record ids are row numbers.
    pub fn from_columns<S: AsRef<str>>(
        weights: &[f64],
        strata: &[S],
        clusters: &[S],
    ) -> Result<Self, EstimationError> {
        if strata.len() != weights.len() || clusters.len() != weights.len() {
            return Err(EstimationError::DimensionMismatch {
                x_rows: weights.len(),
                y_len: strata.len().min(clusters.len()),
            });
        }
        Self::from_units(
            weights.iter().enumerate().map(|(i, &w)| DesignUnit {
                id: i.to_string(),
                weight: Some(w),
                stratum: Some(strata[i].as_ref().to_string()),
                cluster: Some(clusters[i].as_ref().to_string()),
            }),
            &DesignSpec::default(),
        )
    }

    /// Single stratum where every record is its own cluster.
    pub fn unclustered(weights: &[f64]) -> Result<Self, EstimationError> {
        Self::from_units(
            weights.iter().enumerate().map(|(i, &w)| DesignUnit {
                id: i.to_string(),
                weight: Some(w),
                stratum: Some("1".to_string()),
                cluster: Some(i.to_string()),
            }),
            &DesignSpec::default(),
        )
    }

    fn index(
        record_ids: Vec<String>,
        weights: Vec<f64>,
        keys: Vec<(String, String)>,
        nest_clusters: bool,
    ) -> Self {
        let mut strata_ids: BTreeMap<&str, usize> = BTreeMap::new();
        for (stratum, _) in &keys {
            strata_ids.insert(stratum.as_str(), 0);
        }
        for (position, slot) in strata_ids.values_mut().enumerate() {
            *slot = position;
        }
        let strata: Vec<String> = strata_ids.keys().map(|s| s.to_string()).collect();

        // Without nesting a cluster id names the same cluster in every stratum;
        // it is keyed under the stratum where it first appears in sorted order.
        let mut cluster_ids: BTreeMap<(usize, &str), usize> = BTreeMap::new();
        let mut global_owner: BTreeMap<&str, usize> = BTreeMap::new();
        if !nest_clusters {
            for (stratum, cluster) in &keys {
                let h = strata_ids[stratum.as_str()];
                global_owner
                    .entry(cluster.as_str())
                    .and_modify(|owner| *owner = (*owner).min(h))
                    .or_insert(h);
            }
        }
        let owner_of = |h: usize, cluster: &str| -> usize {
            if nest_clusters {
                h
            } else {
                global_owner.get(cluster).copied().unwrap_or(h)
            }
        };

        for (stratum, cluster) in &keys {
            let h = owner_of(strata_ids[stratum.as_str()], cluster);
            cluster_ids.insert((h, cluster.as_str()), 0);
        }
        for (position, slot) in cluster_ids.values_mut().enumerate() {
            *slot = position;
        }
        let clusters: Vec<(usize, String)> = cluster_ids
            .keys()
            .map(|(h, c)| (*h, c.to_string()))
            .collect();

        let mut clusters_per_stratum = vec![0; strata.len()];
        for (h, _) in &clusters {
            clusters_per_stratum[*h] += 1;
        }

        let mut stratum_index = Vec::with_capacity(keys.len());
        let mut cluster_index = Vec::with_capacity(keys.len());
        for (stratum, cluster) in &keys {
            let h = owner_of(strata_ids[stratum.as_str()], cluster);
            stratum_index.push(h);
            cluster_index.push(cluster_ids[&(h, cluster.as_str())]);
        }

        Self {
            record_ids,
            weights,
            stratum_index,
            cluster_index,
            strata,
            clusters,
            clusters_per_stratum,
        }
    }

    pub fn n_records(&self) -> usize {
        self.weights.len()
    }

    pub fn n_strata(&self) -> usize {
        self.strata.len()
    }

    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Design degrees of freedom: clusters minus strata.
    pub fn degrees_of_freedom(&self) -> usize {
        self.n_clusters().saturating_sub(self.n_strata())
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn sum_weights(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn record_id(&self, i: usize) -> &str {
        &self.record_ids[i]
    }

    pub fn record_ids(&self) -> &[String] {
        &self.record_ids
    }

    /// Sorted stratum index of record `i`.
    pub fn stratum_of(&self, i: usize) -> usize {
        self.stratum_index[i]
    }

    /// Sorted cluster index of record `i`.
    pub fn cluster_of(&self, i: usize) -> usize {
        self.cluster_index[i]
    }

    /// Stratum index of cluster `c`.
    pub fn stratum_of_cluster(&self, c: usize) -> usize {
        self.clusters[c].0
    }

    pub fn stratum_label(&self, h: usize) -> &str {
        &self.strata[h]
    }

    pub fn clusters_in_stratum(&self, h: usize) -> usize {
        self.clusters_per_stratum[h]
    }

    /// Number of strata with exactly one cluster.
    pub fn singleton_strata(&self) -> usize {
        self.clusters_per_stratum.iter().filter(|&&n| n == 1).count()
    }

    /// True when no stratum has two or more clusters.
    pub fn is_singular(&self) -> bool {
        self.clusters_per_stratum.iter().all(|&n| n < 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, stratum: &str, cluster: &str) -> AnalyticRecord {
        AnalyticRecord::new(id, 2020).with_design(1.0, stratum, cluster)
    }

    #[test]
    fn test_counts_and_df() {
        let records = vec![
            record("a", "2", "1"),
            record("b", "2", "2"),
            record("c", "1", "1"),
            record("d", "1", "2"),
            record("e", "1", "2"),
        ];
        let design = SurveyDesign::from_records(&records, &DesignSpec::default()).unwrap();
        assert_eq!(design.n_records(), 5);
        assert_eq!(design.n_strata(), 2);
        assert_eq!(design.n_clusters(), 4);
        assert_eq!(design.degrees_of_freedom(), 2);
        // Sorted: stratum "1" comes first
        assert_eq!(design.stratum_of(2), 0);
        assert_eq!(design.stratum_label(0), "1");
        assert_eq!(design.cluster_of(3), design.cluster_of(4));
        assert_eq!(design.singleton_strata(), 0);
    }

    #[test]
    fn test_missing_stratum_names_record() {
        let records = vec![
            record("a", "1", "1"),
            AnalyticRecord::new("b", 2020).with_weight(1.0).with_cluster("1"),
        ];
        let err = SurveyDesign::from_records(&records, &DesignSpec::default()).unwrap_err();
        match err {
            EstimationError::Design { record_id, issue } => {
                assert_eq!(record_id, "b");
                assert!(matches!(issue, DesignIssue::MissingStratum(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_positive_weight_rejected() {
        let records = vec![AnalyticRecord::new("z", 2020).with_design(0.0, "1", "1")];
        let err = SurveyDesign::from_records(&records, &DesignSpec::default()).unwrap_err();
        assert!(matches!(
            err,
            EstimationError::Design {
                issue: DesignIssue::NonPositiveWeight { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_nested_versus_global_clusters() {
        let strata = ["1", "1", "2", "2"];
        let clusters = ["1", "2", "1", "2"];
        let nested = SurveyDesign::from_columns(&[1.0; 4], &strata, &clusters).unwrap();
        assert_eq!(nested.n_clusters(), 4);

        let units = (0..4).map(|i| DesignUnit {
            id: i.to_string(),
            weight: Some(1.0),
            stratum: Some(strata[i].to_string()),
            cluster: Some(clusters[i].to_string()),
        });
        let global =
            SurveyDesign::from_units(units, &DesignSpec::default().nest_clusters(false)).unwrap();
        assert_eq!(global.n_clusters(), 2);
    }

    #[test]
    fn test_unclustered() {
        let design = SurveyDesign::unclustered(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(design.n_strata(), 1);
        assert_eq!(design.n_clusters(), 3);
        assert_eq!(design.degrees_of_freedom(), 2);
        assert_eq!(design.sum_weights(), 6.0);
    }

    #[test]
    fn test_singular_design_detection() {
        let design =
            SurveyDesign::from_columns(&[1.0; 4], &["1", "1", "2", "2"], &["a", "a", "b", "b"])
                .unwrap();
        assert!(design.is_singular());
        assert_eq!(design.singleton_strata(), 2);
    }
}
