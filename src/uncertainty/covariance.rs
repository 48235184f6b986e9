//! # Covariance Matrix Calculations
//!
//! This module provides functions for calculating and manipulating covariance
//! matrices from Jacobian matrices in nonlinear least-squares optimization.

use faer::Mat;
use ndarray::{Array1, Array2};

use crate::error::{MuFitError, Result};
use crate::lm::algorithm::{cholesky_factor, cholesky_solve};
use crate::utils::matrix_convert::{faer_to_ndarray, ndarray_to_faer};

/// Calculate covariance matrix from Jacobian matrix.
///
/// The covariance matrix is estimated as
///   covar = scale * inv(J^T * J)
///
/// With residuals already divided by their errors `scale` is 1; pass the
/// reduced chi-square to rescale errors to the observed scatter.
pub fn calculate_covariance(jacobian: &Array2<f64>, scale: f64) -> Result<Array2<f64>> {
    let j = ndarray_to_faer(jacobian);
    let jtj: Mat<f64> = j.transpose() * &j;
    let jtj = faer_to_ndarray(&jtj);

    let n = jtj.nrows();
    let l = cholesky_factor(&jtj).ok_or(MuFitError::SingularMatrix)?;

    // Invert column by column
    let mut covar = Array2::zeros((n, n));
    for k in 0..n {
        let mut e = Array1::zeros(n);
        e[k] = 1.0;
        let column = cholesky_solve(&l, &e);
        covar.column_mut(k).assign(&column);
    }
    if covar.iter().any(|v| !v.is_finite()) {
        return Err(MuFitError::SingularMatrix);
    }

    covar.mapv_inplace(|v| v * scale);
    Ok(covar)
}

/// Calculate correlation matrix from covariance matrix.
///
///   correl[i,j] = covar[i,j] / sqrt(covar[i,i] * covar[j,j])
pub fn calculate_correlation(covar: &Array2<f64>) -> Array2<f64> {
    let n = covar.nrows();
    let mut correl = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..n {
            if i == j {
                correl[[i, j]] = 1.0;
            } else {
                let denom = (covar[[i, i]] * covar[[j, j]]).sqrt();
                if denom > 0.0 {
                    correl[[i, j]] = covar[[i, j]] / denom;
                }
            }
        }
    }

    correl
}

/// Extract standard errors from the covariance matrix.
///
/// Standard errors are the square roots of the diagonal elements
/// of the covariance matrix.
pub fn standard_errors_from_covariance(covar: &Array2<f64>) -> Array1<f64> {
    covar
        .diag()
        .mapv(|v| if v > 0.0 { v.sqrt() } else { 0.0 })
}
