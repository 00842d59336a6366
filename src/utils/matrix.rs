//! Matrix utility functions.

use crate::solvers::EstimationError;
use faer::{Col, Mat};

/// Prepend a column of ones to a matrix.
pub fn with_intercept_column(x: &Mat<f64>) -> Mat<f64> {
    Mat::from_fn(x.nrows(), x.ncols() + 1, |i, j| {
        if j == 0 {
            1.0
        } else {
            x[(i, j - 1)]
        }
    })
}

/// Weighted cross product Xᵀ diag(w) X.
pub fn weighted_cross_product(x: &Mat<f64>, w: &[f64]) -> Mat<f64> {
    let n_samples = x.nrows();
    let n_params = x.ncols();

    let mut xtwx: Mat<f64> = Mat::zeros(n_params, n_params);
    for i in 0..n_samples {
        let wi = w[i];
        if wi == 0.0 {
            continue;
        }
        for j in 0..n_params {
            let xij = wi * x[(i, j)];
            for k in j..n_params {
                xtwx[(j, k)] += xij * x[(i, k)];
            }
        }
    }
    for j in 0..n_params {
        for k in 0..j {
            xtwx[(j, k)] = xtwx[(k, j)];
        }
    }

    xtwx
}

/// Linear predictor Xβ.
pub fn linear_predictor(x: &Mat<f64>, beta: &Col<f64>) -> Vec<f64> {
    (0..x.nrows())
        .map(|i| (0..x.ncols()).map(|j| x[(i, j)] * beta[j]).sum())
        .collect()
}

/// Inverse of a symmetric matrix through a column-pivoted QR decomposition.
///
/// Fails with [`EstimationError::SingularMatrix`] when a pivot of R falls
/// below `rank_tolerance` times the largest pivot.
pub fn symmetric_inverse(a: &Mat<f64>, rank_tolerance: f64) -> Result<Mat<f64>, EstimationError> {
    let n = a.nrows();
    if n == 0 {
        return Ok(Mat::zeros(0, 0));
    }
    if a.ncols() != n {
        return Err(EstimationError::DimensionMismatch {
            x_rows: n,
            y_len: a.ncols(),
        });
    }
    if (0..n).any(|i| (0..n).any(|j| !a[(i, j)].is_finite())) {
        return Err(EstimationError::NumericalError(
            "matrix to invert has non-finite entries".to_string(),
        ));
    }

    let qr = a.col_piv_qr();
    let q = qr.compute_Q();
    let r = qr.R();
    let perm = qr.P();
    let perm_arr = perm.arrays().0;

    let max_pivot = (0..n).map(|i| r[(i, i)].abs()).fold(0.0_f64, f64::max);
    if max_pivot == 0.0 || (0..n).any(|i| r[(i, i)].abs() <= rank_tolerance * max_pivot) {
        return Err(EstimationError::SingularMatrix);
    }

    let mut inverse: Mat<f64> = Mat::zeros(n, n);
    for col in 0..n {
        let mut e = Col::zeros(n);
        e[col] = 1.0;
        let qte = q.transpose() * e;

        let mut sol_perm = Col::zeros(n);
        for i in (0..n).rev() {
            let mut sum = qte[i];
            for j in (i + 1)..n {
                sum -= r[(i, j)] * sol_perm[j];
            }
            sol_perm[i] = sum / r[(i, i)];
        }

        for i in 0..n {
            inverse[(perm_arr[i], col)] = sol_perm[i];
        }
    }

    symmetrize(&mut inverse);
    Ok(inverse)
}

/// Replace a square matrix by (A + Aᵀ)/2.
pub fn symmetrize(a: &mut Mat<f64>) {
    let n = a.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (a[(i, j)] + a[(j, i)]);
            a[(i, j)] = avg;
            a[(j, i)] = avg;
        }
    }
}

/// Matrix-vector product for small dense systems.
pub fn mat_vec(a: &Mat<f64>, v: &[f64]) -> Vec<f64> {
    (0..a.nrows())
        .map(|i| (0..a.ncols()).map(|j| a[(i, j)] * v[j]).sum())
        .collect()
}

/// Quadratic form gᵀ A g.
pub fn quadratic_form(a: &Mat<f64>, g: &[f64]) -> f64 {
    let n = g.len();
    let mut total = 0.0;
    for i in 0..n {
        if g[i] == 0.0 {
            continue;
        }
        for j in 0..n {
            total += g[i] * a[(i, j)] * g[j];
        }
    }
    total
}

/// Whether a symmetric matrix is positive definite (Cholesky succeeds).
pub fn is_positive_definite(a: &Mat<f64>) -> bool {
    let n = a.nrows();
    let mut l: Mat<f64> = Mat::zeros(n, n);
    for j in 0..n {
        let mut diag = a[(j, j)];
        for k in 0..j {
            diag -= l[(j, k)] * l[(j, k)];
        }
        if !(diag > 0.0) {
            return false;
        }
        let ljj = diag.sqrt();
        l[(j, j)] = ljj;
        for i in (j + 1)..n {
            let mut s = a[(i, j)];
            for k in 0..j {
                s -= l[(i, k)] * l[(j, k)];
            }
            l[(i, j)] = s / ljj;
        }
    }
    true
}

/// Maximum relative coefficient change |Δβ_j| / (1 + |β_j|).
pub fn max_relative_change(step: &[f64], previous: &[f64]) -> f64 {
    step.iter()
        .zip(previous.iter())
        .map(|(&d, &b)| d.abs() / (1.0 + b.abs()))
        .fold(0.0_f64, f64::max)
}

/// Row-major copy of a matrix.
pub fn to_rows(a: &Mat<f64>) -> Vec<Vec<f64>> {
    (0..a.nrows())
        .map(|i| (0..a.ncols()).map(|j| a[(i, j)]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_with_intercept_column() {
        let x = Mat::from_fn(3, 1, |i, _| i as f64);
        let aug = with_intercept_column(&x);
        assert_eq!(aug.ncols(), 2);
        assert_eq!(aug[(2, 0)], 1.0);
        assert_eq!(aug[(2, 1)], 2.0);
    }

    #[test]
    fn test_weighted_cross_product() {
        let x = Mat::from_fn(3, 2, |i, j| if j == 0 { 1.0 } else { i as f64 });
        let xtwx = weighted_cross_product(&x, &[1.0, 2.0, 3.0]);
        // Σw = 6, Σw·x = 0 + 2 + 6 = 8, Σw·x² = 0 + 2 + 12 = 14
        assert_eq!(xtwx[(0, 0)], 6.0);
        assert_eq!(xtwx[(0, 1)], 8.0);
        assert_eq!(xtwx[(1, 0)], 8.0);
        assert_eq!(xtwx[(1, 1)], 14.0);
    }

    #[test]
    fn test_symmetric_inverse() {
        let a = Mat::from_fn(3, 3, |i, j| match (i, j) {
            (0, 0) => 4.0,
            (1, 1) => 3.0,
            (2, 2) => 2.0,
            (0, 1) | (1, 0) => 1.0,
            (1, 2) | (2, 1) => 0.5,
            _ => 0.0,
        });
        let inv = symmetric_inverse(&a, 1e-12).unwrap();
        let prod = &a * &inv;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(prod[(i, j)], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_symmetric_inverse_with_pivoting() {
        // Column scales grow with j so pivoting reorders the columns
        let b = Mat::from_fn(7, 5, |i, j| {
            ((i * 3 + j * 5) % 7) as f64 * (1.0 + j as f64 * j as f64) - 2.0
        });
        let a = Mat::from_fn(5, 5, |i, j| {
            let cross: f64 = (0..7).map(|k| b[(k, i)] * b[(k, j)]).sum();
            if i == j {
                cross + 1.0
            } else {
                cross
            }
        });
        let inv = symmetric_inverse(&a, 1e-12).unwrap();
        let prod = &a * &inv;
        for i in 0..5 {
            for j in 0..5 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (prod[(i, j)] - expected).abs() < 1e-8,
                    "A·inv[{i},{j}] = {}",
                    prod[(i, j)]
                );
            }
        }
    }

    #[test]
    fn test_symmetric_inverse_singular() {
        let a = Mat::from_fn(2, 2, |_, _| 1.0);
        assert!(matches!(
            symmetric_inverse(&a, 1e-12),
            Err(EstimationError::SingularMatrix)
        ));
    }

    #[test]
    fn test_positive_definite() {
        let pd = Mat::from_fn(2, 2, |i, j| if i == j { 2.0 } else { 0.5 });
        assert!(is_positive_definite(&pd));
        let indefinite = Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 2.0 });
        assert!(!is_positive_definite(&indefinite));
    }

    #[test]
    fn test_quadratic_form_and_relative_change() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { 2.0 } else { 1.0 });
        assert_eq!(quadratic_form(&a, &[1.0, 1.0]), 6.0);
        assert_eq!(mat_vec(&a, &[1.0, 0.0]), vec![2.0, 1.0]);
        assert_relative_eq!(max_relative_change(&[0.5, -2.0], &[0.0, 3.0]), 0.5);
    }
}
