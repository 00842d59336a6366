//! Utility functions.

mod matrix;

pub use matrix::{
    is_positive_definite, linear_predictor, mat_vec, max_relative_change, quadratic_form,
    symmetric_inverse, symmetrize, to_rows, weighted_cross_product, with_intercept_column,
};
