//! Problem definition trait.
//!
//! This module defines the `Problem` trait, a nonlinear least squares problem
//! in unconstrained coordinates, as seen by the Levenberg-Marquardt algorithm.

use crate::error::Result;
use ndarray::{Array1, Array2};

/// A nonlinear least squares problem.
///
/// The optimizer minimizes the sum of squared residuals returned by `eval`.
pub trait Problem {
    /// Evaluate the residuals at the given parameters.
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Get the number of parameters in the problem.
    fn parameter_count(&self) -> usize;

    /// Get the number of residuals in the problem.
    fn residual_count(&self) -> usize;

    /// Evaluate the Jacobian matrix at the given parameters.
    ///
    /// `residuals`, when given, are the residuals at `params`. The default
    /// implementation uses forward finite differences.
    fn jacobian(&self, params: &Array1<f64>, residuals: Option<&Array1<f64>>) -> Result<Array2<f64>>
    where
        Self: Sized,
    {
        crate::utils::finite_difference::jacobian(self, params, residuals, None)
    }

    /// Evaluate the sum of squared residuals at the given parameters.
    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(residuals.iter().map(|r| r.powi(2)).sum())
    }
}
