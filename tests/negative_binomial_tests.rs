//! Survey-weighted negative binomial regression tests.

mod common;

use approx::assert_relative_eq;
use faer::{Col, Mat};
use survey_regress::core::{FamilyExtras, ModelFamily};
use survey_regress::inference::CoefficientTable;
use survey_regress::solvers::{NegativeBinomialRegressor, SurveyEstimator};

#[test]
fn test_nb_recovers_coefficients_and_dispersion() {
    let beta = [0.5, 0.4];
    let theta = 2.0;
    let n = 3000;
    let (x, y) = common::generate_nb_data(n, &beta, theta, 17);
    let weights = common::random_weights(n, 18);
    let design = common::stratified_design(&weights, 15, 8);

    let model = NegativeBinomialRegressor::builder()
        .build()
        .fit(&x, &y, &design)
        .expect("fit should succeed");

    assert!(model.converged);
    assert_eq!(model.family, ModelFamily::NegativeBinomialLog);
    assert!((model.coefficients[0] - beta[0]).abs() < 0.15);
    assert!((model.coefficients[1] - beta[1]).abs() < 0.15);

    let estimated = model.theta().expect("theta");
    assert!(estimated > 1.2 && estimated < 3.5, "theta = {estimated}");
    match model.extras {
        FamilyExtras::NegativeBinomial { theta, alpha } => {
            assert_relative_eq!(alpha * theta, 1.0, epsilon = 1e-12)
        }
        ref other => panic!("unexpected extras {other:?}"),
    }
    // β only
    assert_eq!(model.covariance.len(), 2);
}

#[test]
fn test_irr_table() {
    let (x, y) = common::generate_nb_data(1000, &[0.2, -0.3], 1.5, 4);
    let design = common::stratified_design(&vec![1.0; 1000], 10, 5);
    let model = NegativeBinomialRegressor::builder()
        .build()
        .fit(&x, &y, &design)
        .expect("fit should succeed");

    let table = CoefficientTable::from_model(&model, 0.95);
    assert_eq!(table.ratio_label.as_deref(), Some("IRR"));
    let ratio = table.row("x0").and_then(|r| r.ratio).expect("IRR");
    assert!(ratio.estimate < 1.0);
    assert!(ratio.ci_low < ratio.estimate && ratio.estimate < ratio.ci_high);
}

#[test]
fn test_weights_change_estimates() {
    // Upweighting high-count records moves the intercept upwards
    let n = 40;
    let x = Mat::zeros(n, 0);
    let y = Col::from_fn(n, |i| (i % 5) as f64);
    let flat = common::stratified_design(&vec![1.0; n], 4, 2);
    let tilted_weights: Vec<f64> = (0..n).map(|i| 1.0 + (i % 5) as f64).collect();
    let tilted = common::stratified_design(&tilted_weights, 4, 2);

    let regressor = NegativeBinomialRegressor::builder().build();
    let a = regressor.fit(&x, &y, &flat).expect("fit should succeed");
    let b = regressor.fit(&x, &y, &tilted).expect("fit should succeed");

    assert_relative_eq!(a.coefficients[0], 2.0_f64.ln(), epsilon = 1e-7);
    // Σ w y / Σ w = (0 + 2 + 6 + 12 + 20) / 15
    assert_relative_eq!(b.coefficients[0], (40.0_f64 / 15.0).ln(), epsilon = 1e-7);
}
