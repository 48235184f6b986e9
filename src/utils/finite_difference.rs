//! Finite difference derivatives.
//!
//! The optimizer differentiates the residual vector with forward differences;
//! error propagation through formulas uses central differences of a scalar
//! function. Steps are relative to the parameter magnitude.

use crate::error::{MuFitError, Result};
use crate::problem::Problem;
use ndarray::{Array1, Array2};

/// Default relative step for finite differences.
const DEFAULT_EPSILON: f64 = 1e-8;

fn step(value: f64, eps: f64) -> f64 {
    if value.abs() > eps {
        value.abs() * eps
    } else {
        eps
    }
}

/// Jacobian `J[i,j] = ∂r_i/∂p_j` by forward differences.
///
/// `residuals` may carry the residuals already evaluated at `params`, saving
/// one evaluation.
pub fn jacobian(
    problem: &dyn Problem,
    params: &Array1<f64>,
    residuals: Option<&Array1<f64>>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);
    let n_residuals = problem.residual_count();

    let evaluated;
    let r0 = match residuals {
        Some(r) => r,
        None => {
            evaluated = problem.eval(params)?;
            &evaluated
        }
    };
    if r0.len() != n_residuals {
        return Err(MuFitError::DimensionMismatch(format!(
            "Expected {} residuals, got {}",
            n_residuals,
            r0.len()
        )));
    }

    let mut jac = Array2::zeros((n_residuals, params.len()));
    let mut perturbed = params.clone();
    for j in 0..params.len() {
        let h = step(params[j], eps);
        perturbed[j] = params[j] + h;
        let r1 = problem.eval(&perturbed)?;
        perturbed[j] = params[j];

        jac.column_mut(j)
            .iter_mut()
            .zip(r1.iter().zip(r0.iter()))
            .for_each(|(d, (a, b))| *d = (a - b) / h);
    }

    Ok(jac)
}

/// Gradient of a scalar function by central differences.
pub fn gradient<F>(f: F, params: &Array1<f64>, epsilon: Option<f64>) -> Result<Array1<f64>>
where
    F: Fn(&Array1<f64>) -> Result<f64>,
{
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);
    let mut grad = Array1::zeros(params.len());
    let mut perturbed = params.clone();

    for j in 0..params.len() {
        let h = step(params[j], eps);
        perturbed[j] = params[j] + h;
        let forward = f(&perturbed)?;
        perturbed[j] = params[j] - h;
        let backward = f(&perturbed)?;
        perturbed[j] = params[j];

        grad[j] = (forward - backward) / (2.0 * h);
    }

    Ok(grad)
}
