//! Common test utilities and data generators.
#![allow(dead_code)]

use faer::{Col, Mat};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma, Normal, Poisson};
use survey_regress::core::expit;
use survey_regress::data::{AnalyticRecord, ExclusionReason, SurveyDesign};

/// Stratum and cluster labels: `n_strata` strata with `clusters_per_stratum`
/// clusters each, records assigned round robin.
pub fn design_labels(
    n_samples: usize,
    n_strata: usize,
    clusters_per_stratum: usize,
) -> (Vec<String>, Vec<String>) {
    let strata = (0..n_samples).map(|i| format!("s{}", i % n_strata)).collect();
    let clusters = (0..n_samples)
        .map(|i| format!("c{}", (i / n_strata) % clusters_per_stratum))
        .collect();
    (strata, clusters)
}

/// Stratified cluster design with the given weights.
pub fn stratified_design(
    weights: &[f64],
    n_strata: usize,
    clusters_per_stratum: usize,
) -> SurveyDesign {
    let (strata, clusters) = design_labels(weights.len(), n_strata, clusters_per_stratum);
    SurveyDesign::from_columns(weights, &strata, &clusters).expect("design should build")
}

/// Survey weights drawn uniformly from [0.5, 3).
pub fn random_weights(n_samples: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_samples).map(|_| rng.gen_range(0.5..3.0)).collect()
}

/// Standard normal features.
pub fn normal_features(n_samples: usize, n_features: usize, rng: &mut StdRng) -> Mat<f64> {
    let normal = Normal::new(0.0, 1.0).expect("valid normal");
    let mut x = Mat::zeros(n_samples, n_features);
    for i in 0..n_samples {
        for j in 0..n_features {
            x[(i, j)] = normal.sample(rng);
        }
    }
    x
}

fn index(x: &Mat<f64>, i: usize, beta: &[f64]) -> f64 {
    beta[0] + (0..x.ncols()).map(|j| x[(i, j)] * beta[j + 1]).sum::<f64>()
}

/// Binary outcomes from a logit model; `beta[0]` is the intercept.
pub fn generate_logit_data(n_samples: usize, beta: &[f64], seed: u64) -> (Mat<f64>, Col<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = normal_features(n_samples, beta.len() - 1, &mut rng);
    let mut y = Col::zeros(n_samples);
    for i in 0..n_samples {
        let p = expit(index(&x, i, beta));
        y[i] = if rng.gen_bool(p) { 1.0 } else { 0.0 };
    }
    (x, y)
}

/// Counts from an NB2 model through its gamma-Poisson mixture.
pub fn generate_nb_data(
    n_samples: usize,
    beta: &[f64],
    theta: f64,
    seed: u64,
) -> (Mat<f64>, Col<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = normal_features(n_samples, beta.len() - 1, &mut rng);
    let mut y = Col::zeros(n_samples);
    for i in 0..n_samples {
        let mu = index(&x, i, beta).exp();
        let lambda = Gamma::new(theta, mu / theta)
            .expect("valid gamma")
            .sample(&mut rng);
        y[i] = if lambda > 0.0 {
            Poisson::new(lambda).expect("valid poisson").sample(&mut rng)
        } else {
            0.0
        };
    }
    (x, y)
}

/// Latent normal outcomes clamped to `[lower, upper]`.
pub fn generate_tobit_data(
    n_samples: usize,
    beta: &[f64],
    sigma: f64,
    lower: f64,
    upper: f64,
    seed: u64,
) -> (Mat<f64>, Col<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = normal_features(n_samples, beta.len() - 1, &mut rng);
    let noise = Normal::new(0.0, sigma).expect("valid normal");
    let mut y = Col::zeros(n_samples);
    for i in 0..n_samples {
        let latent = index(&x, i, beta) + noise.sample(&mut rng);
        y[i] = latent.clamp(lower, upper);
    }
    (x, y)
}

pub const POVERTY: [&str; 3] = ["High", "Middle", "Poor"];
pub const YEARS: [u16; 3] = [2019, 2020, 2021];

/// Person-year records under 10 strata × 4 clusters.
///
/// Visit probability rises for `Poor` and in 2021; telehealth takes a larger
/// share of visits after 2019. Every 40th record is out of the age range.
pub fn generate_records(n_records: usize, seed: u64) -> Vec<AnalyticRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_records)
        .map(|i| {
            let poverty = POVERTY[rng.gen_range(0..POVERTY.len())];
            let year_index = rng.gen_range(0..YEARS.len());
            let sex = if rng.gen_bool(0.5) { "Female" } else { "Male" };

            let eta = -0.2
                + if poverty == "Poor" { 0.5 } else { 0.0 }
                + if year_index == 2 { 0.3 } else { 0.0 };
            let (in_person, telehealth) = if rng.gen_bool(expit(eta)) {
                let total = 1 + Poisson::new(2.0).expect("valid poisson").sample(&mut rng) as u32;
                let tele_p = [0.05, 0.3, 0.2][year_index];
                let tele = (0..total).filter(|_| rng.gen_bool(tele_p)).count() as u32;
                (total - tele, tele)
            } else {
                (0, 0)
            };

            let mut record = AnalyticRecord::new(format!("p{i}"), YEARS[year_index])
                .with_design(
                    rng.gen_range(0.5..3.0),
                    format!("s{}", i % 10),
                    format!("c{}", (i / 10) % 4),
                )
                .with_covariate("poverty", poverty)
                .with_covariate("sex", sex)
                .with_visits(in_person, telehealth);
            if i % 40 == 39 {
                record = record.with_exclusion(ExclusionReason::AgeOutOfRange);
            }
            record
        })
        .collect()
}

/// Six kept records under 2 strata × 2 clusters: group A has 2 records with
/// one visit, group B 4 records with one visit.
pub fn six_record_scenario() -> Vec<AnalyticRecord> {
    let rows = [
        ("1", "A", "1", "a", 1),
        ("2", "B", "1", "a", 0),
        ("3", "A", "1", "b", 0),
        ("4", "B", "1", "b", 1),
        ("5", "B", "2", "a", 0),
        ("6", "B", "2", "b", 0),
    ];
    rows.iter()
        .map(|&(id, group, stratum, cluster, visits)| {
            AnalyticRecord::new(id, 2020)
                .with_design(1.0, stratum, cluster)
                .with_covariate("group", group)
                .with_visits(visits, 0)
        })
        .collect()
}
