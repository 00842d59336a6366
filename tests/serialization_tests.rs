//! JSON persistence of fitted models, margins and coefficient tables.

mod common;

use approx::assert_relative_eq;
use survey_regress::core::{CellSpec, FittedModel, MarginResult};
use survey_regress::data::{
    AnalyticSample, DesignSpec, Formula, ModelFrame, Outcome, SampleRestriction,
};
use survey_regress::inference::CoefficientTable;
use survey_regress::margins::predict_margins;
use survey_regress::solvers::{NegativeBinomialRegressor, SurveyEstimator};

fn assert_slices_close(a: &[f64], b: &[f64]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_relative_eq!(*x, *y, max_relative = 1e-14);
    }
}

#[test]
fn test_fitted_model_round_trip_keeps_encoding() {
    let records = common::generate_records(1200, 31);
    let sample = AnalyticSample::build(&records, &DesignSpec::default(), SampleRestriction::Full)
        .expect("sample should build");
    let frame = ModelFrame::build(&sample, &Formula::new(Outcome::TotalVisits).factor("poverty"))
        .expect("frame should build");
    let model = NegativeBinomialRegressor::builder()
        .build()
        .fit_frame(&frame)
        .expect("fit should succeed");

    let json = serde_json::to_string(&model).expect("serialize");
    let restored: FittedModel = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(restored.family, model.family);
    assert_eq!(restored.columns, model.columns);
    assert_eq!(restored.encoding, model.encoding);
    assert_eq!(restored.design_df, model.design_df);
    assert_slices_close(&restored.coefficients, &model.coefficients);
    for (a, b) in restored.covariance.iter().zip(model.covariance.iter()) {
        assert_slices_close(a, b);
    }
    assert_relative_eq!(
        restored.theta().expect("theta"),
        model.theta().expect("theta"),
        max_relative = 1e-14
    );

    // A restored model still computes margins on the original frame
    let cells = CellSpec::grid(&[("poverty", common::POVERTY.to_vec())]);
    let original =
        predict_margins(&model, &frame, &cells, None).expect("margins should compute");
    let reloaded =
        predict_margins(&restored, &frame, &cells, None).expect("margins should compute");
    for (a, b) in original.iter().zip(reloaded.iter()) {
        assert_relative_eq!(a.estimate, b.estimate, max_relative = 1e-12);
        assert_relative_eq!(a.std_error, b.std_error, max_relative = 1e-10);
    }

    let json = serde_json::to_string(&original).expect("serialize");
    let margins: MarginResult = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(margins.labels(), original.labels());
    assert_eq!(margins.df, original.df);
}

#[test]
fn test_coefficient_table_serializes() {
    let records = common::generate_records(800, 32);
    let sample = AnalyticSample::build(&records, &DesignSpec::default(), SampleRestriction::Full)
        .expect("sample should build");
    let frame = ModelFrame::build(&sample, &Formula::new(Outcome::TotalVisits).factor("sex"))
        .expect("frame should build");
    let model = NegativeBinomialRegressor::builder()
        .build()
        .fit_frame(&frame)
        .expect("fit should succeed");

    let table = CoefficientTable::from_model(&model, 0.95);
    let value = serde_json::to_value(&table).expect("serialize");
    assert_eq!(value["ratio_label"], "IRR");
    assert_eq!(value["rows"].as_array().map(Vec::len), Some(model.n_parameters()));

    let restored: CoefficientTable = serde_json::from_value(value).expect("deserialize");
    assert_eq!(restored.rows.len(), table.rows.len());
    for (a, b) in restored.rows.iter().zip(table.rows.iter()) {
        assert_eq!(a.name, b.name);
        assert_relative_eq!(a.estimate, b.estimate, max_relative = 1e-14);
        assert_relative_eq!(a.p_value, b.p_value, max_relative = 1e-12);
    }
}
