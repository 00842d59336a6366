//! Two-sided censored regression tests.

mod common;

use approx::assert_relative_eq;
use faer::{Col, Mat};
use survey_regress::core::{ColumnSpec, EstimationOptions, ModelFamily};
use survey_regress::solvers::{fit_tobit, EstimationError, SurveyEstimator, TobitRegressor};

// ============================================================================
// Recovery
// ============================================================================

#[test]
fn test_tobit_recovers_latent_parameters() {
    let beta = [0.3, 0.25];
    let sigma = 0.3;
    let n = 3000;
    let (x, y) = common::generate_tobit_data(n, &beta, sigma, 0.0, 1.0, 23);
    let weights = common::random_weights(n, 24);
    let design = common::stratified_design(&weights, 15, 6);

    let model = TobitRegressor::builder()
        .build()
        .fit(&x, &y, &design)
        .expect("fit should succeed");

    assert!(model.converged);
    assert_eq!(model.family, ModelFamily::TwoSidedCensored);
    assert_eq!(model.column_names(), vec!["(Intercept)", "x0", "lnsigma"]);
    assert!((model.coefficients[0] - beta[0]).abs() < 0.05);
    assert!((model.coefficients[1] - beta[1]).abs() < 0.05);

    let estimated = model.sigma().expect("sigma");
    assert!((estimated - sigma).abs() < 0.05, "sigma = {estimated}");
    assert_relative_eq!(model.coefficients[2], estimated.ln(), epsilon = 1e-12);
    assert_eq!(model.n_index_parameters(), 2);
    assert_eq!(model.covariance.len(), 3);
    assert!(model.deviance.is_none());
}

#[test]
fn test_branch_attribution() {
    let (x, y) = common::generate_tobit_data(1000, &[0.5, 0.6], 0.4, 0.0, 1.0, 8);
    let design = common::stratified_design(&vec![1.0; 1000], 10, 4);
    let model = TobitRegressor::builder()
        .build()
        .fit(&x, &y, &design)
        .expect("fit should succeed");

    let at_lower = y.iter().filter(|&&v| v <= 0.0).count();
    let at_upper = y.iter().filter(|&&v| v >= 1.0).count();
    let censoring = model.censoring().expect("censoring summary");
    assert_eq!(censoring.n_lower, at_lower);
    assert_eq!(censoring.n_upper, at_upper);
    assert_eq!(censoring.n_total(), 1000);
    assert!(censoring.n_lower > 0 && censoring.n_upper > 0);
    assert_relative_eq!(
        censoring.weighted_fraction_lower,
        at_lower as f64 / 1000.0,
        epsilon = 1e-12
    );
}

#[test]
fn test_fit_tobit_with_explicit_columns() {
    let (x, y) = common::generate_tobit_data(400, &[0.4, 0.2], 0.25, 0.0, 1.0, 3);
    let design = common::stratified_design(&vec![1.0; 400], 8, 3);
    let x_design = Mat::from_fn(400, 2, |i, j| if j == 0 { 1.0 } else { x[(i, 0)] });
    let columns = vec![ColumnSpec::intercept(), ColumnSpec::continuous("x")];

    let direct = TobitRegressor::builder()
        .build()
        .fit(&x, &y, &design)
        .expect("fit should succeed");
    let options = EstimationOptions::default();
    let explicit = fit_tobit(&x_design, &y, &design, columns, 0.0, 1.0, &options)
        .expect("fit should succeed");

    assert_eq!(explicit.column_names(), vec!["(Intercept)", "x", "lnsigma"]);
    for j in 0..3 {
        assert_relative_eq!(direct.coefficients[j], explicit.coefficients[j], epsilon = 1e-10);
    }
    assert_eq!(explicit.bounds(), Some((0.0, 1.0)));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_outcome_outside_bounds() {
    let x = Mat::from_fn(20, 1, |i, _| i as f64);
    let y = Col::from_fn(20, |i| if i == 7 { -0.1 } else { 0.5 });
    let design = common::stratified_design(&[1.0; 20], 2, 2);
    assert!(matches!(
        TobitRegressor::builder().build().fit(&x, &y, &design),
        Err(EstimationError::InvalidOutcome { row: 7, .. })
    ));
}

#[test]
fn test_all_censored_outcomes_fail() {
    let x = Mat::from_fn(40, 1, |i, _| (i % 5) as f64 - 2.0);
    let design = common::stratified_design(&[1.0; 40], 4, 2);

    let at_floor = Col::from_fn(40, |_| 0.0);
    let result = TobitRegressor::builder().build().fit(&x, &at_floor, &design);
    assert!(matches!(result, Err(EstimationError::Optimization(_))), "{result:?}");

    let at_bounds = Col::from_fn(40, |i| if i % 2 == 0 { 0.0 } else { 1.0 });
    let result = TobitRegressor::builder().build().fit(&x, &at_bounds, &design);
    assert!(matches!(result, Err(EstimationError::Optimization(_))), "{result:?}");
}

#[test]
fn test_custom_bounds() {
    let (x, y) = common::generate_tobit_data(600, &[2.0, 1.0], 1.0, 0.0, 4.0, 41);
    let design = common::stratified_design(&vec![1.0; 600], 6, 4);
    let model = TobitRegressor::builder()
        .lower(0.0)
        .upper(4.0)
        .build()
        .fit(&x, &y, &design)
        .expect("fit should succeed");
    assert_eq!(model.bounds(), Some((0.0, 4.0)));
    assert!((model.coefficients[1] - 1.0).abs() < 0.2);
}
