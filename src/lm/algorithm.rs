//! Implementation of the Levenberg-Marquardt algorithm.
//!
//! This module contains the core implementation of the Levenberg-Marquardt
//! algorithm for nonlinear least-squares optimization.

use faer::{Col, Mat};
use ndarray::{Array1, Array2};
use std::fmt;

use crate::error::{MuFitError, Result};
use crate::problem::Problem;
use crate::utils::matrix_convert::{faer_to_ndarray, ndarray_to_faer, ndarray_vec_to_faer};

use super::config::{DecompositionMethod, LmConfig};

/// Result of the Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Optimized parameter values
    pub params: Array1<f64>,

    /// Residuals at the solution
    pub residuals: Array1<f64>,

    /// Sum of squared residuals
    pub cost: f64,

    /// Number of iterations performed
    pub iterations: usize,

    /// Number of function evaluations
    pub func_evals: usize,

    /// Whether the optimization succeeded
    pub success: bool,

    /// A message describing the result
    pub message: String,

    /// The Jacobian matrix at the solution (if requested)
    pub jacobian: Option<Array2<f64>>,
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// Status of the iteration.
enum IterationStatus {
    /// Continue iteration
    Continue,

    /// Converged successfully
    Converged(String),

    /// Failed to converge
    Failed(String),
}

/// Lower-triangular Cholesky factor of a symmetric matrix, `None` unless it
/// is positive definite.
pub(crate) fn cholesky_factor(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = a.clone();
    for k in 0..n {
        for j in 0..k {
            l[[k, k]] -= l[[k, j]] * l[[k, j]];
        }
        if !(l[[k, k]] > 0.0) {
            return None;
        }
        let akk_sqrt = l[[k, k]].sqrt();
        l[[k, k]] = akk_sqrt;

        for i in k + 1..n {
            for j in 0..k {
                l[[i, k]] -= l[[i, j]] * l[[k, j]];
            }
            l[[i, k]] /= akk_sqrt;
        }
    }
    for i in 0..n {
        for j in i + 1..n {
            l[[i, j]] = 0.0;
        }
    }
    Some(l)
}

/// Solve `L Lᵀ x = b` given the Cholesky factor `L`.
pub(crate) fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = b.clone();

    // Forward substitution (L * y = b)
    for i in 0..n {
        for j in 0..i {
            y[i] -= l[[i, j]] * y[j];
        }
        y[i] /= l[[i, i]];
    }

    // Backward substitution (L^T * x = y)
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = y[i];
        for j in (i + 1)..n {
            x[i] -= l[[j, i]] * x[j];
        }
        x[i] /= l[[i, i]];
    }
    x
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    /// Configuration options
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt optimizer with default configuration.
    pub fn new() -> Self {
        Self {
            config: LmConfig::default(),
        }
    }

    /// Create a new Levenberg-Marquardt optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the tolerance for relative change in cost.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.config.ftol = ftol;
        self
    }

    /// Set the tolerance for change in parameter values.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.config.xtol = xtol;
        self
    }

    /// Set the tolerance for gradient norm.
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.config.gtol = gtol;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.initial_lambda = lambda;
        self
    }

    /// Set the method used for solving the linear system.
    pub fn with_decomposition_method(mut self, method: DecompositionMethod) -> Self {
        self.config.decomposition_method = method;
        self
    }

    /// Set whether to calculate and return the Jacobian at the solution.
    pub fn with_calc_jacobian(mut self, calc_jacobian: bool) -> Self {
        self.config.calc_jacobian = calc_jacobian;
        self
    }

    /// Minimize the sum of squared residuals for the given problem.
    ///
    /// Failing to converge is not an error: the result carries
    /// `success == false` and a message. Errors are reserved for problems that
    /// cannot be evaluated at all.
    pub fn minimize<P: Problem>(&self, problem: &P, initial_params: Array1<f64>) -> Result<LmResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(MuFitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }

        let mut params = initial_params;
        let mut lambda = self.config.initial_lambda;

        let mut residuals = problem.eval(&params)?;
        let mut func_evals = 1;
        let mut cost: f64 = residuals.iter().map(|r| r.powi(2)).sum();
        if !cost.is_finite() {
            return Err(MuFitError::Numerical(
                "cost is not finite at the starting point".to_string(),
            ));
        }

        let mut iterations = 0;
        let (success, message) = if n_params == 0 {
            (true, "No parameters to vary".to_string())
        } else {
            'outer: loop {
                let jac = problem.jacobian(&params, Some(&residuals))?;
                func_evals += n_params;
                let j = ndarray_to_faer(&jac);
                let r = ndarray_vec_to_faer(&residuals);

                // Compute gradient g = J^T * r
                let g: Col<f64> = j.transpose() * &r;
                let gradient_norm = g.norm_l2();
                if gradient_norm < self.config.gtol {
                    break (
                        true,
                        format!(
                            "Gradient convergence: ||g|| = {:.2e} < {:.2e}",
                            gradient_norm, self.config.gtol
                        ),
                    );
                }
                if iterations >= self.config.max_iterations {
                    break (
                        false,
                        format!("Maximum iterations ({}) reached", self.config.max_iterations),
                    );
                }

                let jtj: Mat<f64> = j.transpose() * &j;
                let jtj = faer_to_ndarray(&jtj);
                let jtr = jac.t().dot(&residuals);

                let status = loop {
                    let step = match self.calculate_step(&jac, &residuals, &jtj, &jtr, lambda) {
                        Some(s) => s,
                        None => {
                            // If step calculation failed, increase lambda and try again
                            lambda = (lambda * self.config.lambda_up_factor)
                                .min(self.config.max_lambda);
                            if lambda >= self.config.max_lambda {
                                break IterationStatus::Failed(
                                    "Failed to calculate step, and lambda reached maximum"
                                        .to_string(),
                                );
                            }
                            continue;
                        }
                    };

                    let new_params = &params + &step;
                    let new_residuals = problem.eval(&new_params)?;
                    func_evals += 1;
                    let new_cost: f64 = new_residuals.iter().map(|r| r.powi(2)).sum();

                    if new_cost.is_finite() && new_cost < cost {
                        let param_change = step.iter().map(|x| x * x).sum::<f64>().sqrt()
                            / (params.iter().map(|x| x * x).sum::<f64>().sqrt() + self.config.xtol);
                        let cost_change = (cost - new_cost) / cost.max(1e-10);

                        params = new_params;
                        residuals = new_residuals;
                        cost = new_cost;
                        lambda = (lambda * self.config.lambda_down_factor).max(self.config.min_lambda);
                        iterations += 1;

                        break if param_change < self.config.xtol {
                            IterationStatus::Converged(format!(
                                "Parameter convergence: |dx|/|x| = {:.2e} < {:.2e}",
                                param_change, self.config.xtol
                            ))
                        } else if cost_change < self.config.ftol {
                            IterationStatus::Converged(format!(
                                "Cost convergence: |df|/|f| = {:.2e} < {:.2e}",
                                cost_change, self.config.ftol
                            ))
                        } else {
                            IterationStatus::Continue
                        };
                    }

                    // Step rejected - increase lambda and try again
                    lambda = (lambda * self.config.lambda_up_factor).min(self.config.max_lambda);
                    if lambda >= self.config.max_lambda {
                        break IterationStatus::Failed(
                            "Failed to decrease cost, and lambda reached maximum".to_string(),
                        );
                    }
                };

                match status {
                    IterationStatus::Continue => continue 'outer,
                    IterationStatus::Converged(message) => break (true, message),
                    IterationStatus::Failed(message) => break (false, message),
                }
            }
        };

        let jacobian = if self.config.calc_jacobian {
            func_evals += n_params;
            Some(problem.jacobian(&params, Some(&residuals))?)
        } else {
            None
        };

        Ok(LmResult {
            params,
            residuals,
            cost,
            iterations,
            func_evals,
            success,
            message,
            jacobian,
        })
    }

    /// Calculate the Levenberg-Marquardt step.
    ///
    /// Solves `(JᵀJ + λI) δ = Jᵀr` and returns `-δ`, or `None` if the system
    /// is singular.
    fn calculate_step(
        &self,
        jac: &Array2<f64>,
        residuals: &Array1<f64>,
        jtj: &Array2<f64>,
        jtr: &Array1<f64>,
        lambda: f64,
    ) -> Option<Array1<f64>> {
        let n = jtj.nrows();
        let cholesky = || {
            let mut a = jtj.clone();
            for i in 0..n {
                a[[i, i]] += lambda;
            }
            cholesky_factor(&a).map(|l| cholesky_solve(&l, jtr))
        };

        let delta = match self.config.decomposition_method {
            DecompositionMethod::Cholesky => cholesky()?,
            DecompositionMethod::QR => solve_qr(jac, residuals, lambda)?,
            DecompositionMethod::Auto => match cholesky() {
                Some(delta) => delta,
                None => solve_qr(jac, residuals, lambda)?,
            },
        };

        if delta.iter().all(|d| d.is_finite()) {
            Some(-delta)
        } else {
            None
        }
    }
}

/// Least-squares solution of `[J; √λ I] δ = [r; 0]` by modified Gram-Schmidt.
fn solve_qr(j: &Array2<f64>, r: &Array1<f64>, lambda: f64) -> Option<Array1<f64>> {
    let m = j.nrows();
    let n = j.ncols();
    let rows = m + n;

    let mut q = Array2::zeros((rows, n));
    q.slice_mut(ndarray::s![..m, ..]).assign(j);
    for k in 0..n {
        q[[m + k, k]] = lambda.sqrt();
    }
    let mut b = Array1::zeros(rows);
    b.slice_mut(ndarray::s![..m]).assign(r);

    let mut upper = Array2::zeros((n, n));
    for k in 0..n {
        let norm = q.column(k).dot(&q.column(k)).sqrt();
        if norm < 1e-12 {
            return None;
        }
        upper[[k, k]] = norm;
        q.column_mut(k).mapv_inplace(|v| v / norm);
        for c in k + 1..n {
            let dot = q.column(k).dot(&q.column(c));
            upper[[k, c]] = dot;
            let qk = q.column(k).to_owned();
            q.column_mut(c).scaled_add(-dot, &qk);
        }
    }

    let qtb = q.t().dot(&b);
    let mut x = Array1::zeros(n);
    for k in (0..n).rev() {
        x[k] = qtb[k];
        for c in (k + 1)..n {
            x[k] -= upper[[k, c]] * x[c];
        }
        x[k] /= upper[[k, k]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// A simple linear model for testing: f(x) = a * x + b
    struct LinearModel {
        x_data: Array1<f64>,
        y_data: Array1<f64>,
    }

    impl Problem for LinearModel {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(self
                .x_data
                .iter()
                .zip(self.y_data.iter())
                .map(|(x, y)| params[0] * x + params[1] - y)
                .collect())
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            self.x_data.len()
        }
    }

    /// Exponential decay: f(t) = a exp(-k t)
    struct Decay {
        t: Array1<f64>,
        y: Array1<f64>,
    }

    impl Problem for Decay {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(self
                .t
                .iter()
                .zip(self.y.iter())
                .map(|(t, y)| params[0] * (-params[1] * t).exp() - y)
                .collect())
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            self.t.len()
        }
    }

    #[test]
    fn test_linear_fit() {
        let model = LinearModel {
            x_data: array![1.0, 2.0, 3.0, 4.0, 5.0],
            y_data: array![5.1, 7.0, 8.9, 11.2, 13.0],
        };

        let lm = LevenbergMarquardt::new();
        let result = lm.minimize(&model, array![1.0, 1.0]).unwrap();

        assert!(result.success, "{}", result.message);
        // least-squares line through the data
        assert_relative_eq!(result.params[0], 1.99, epsilon = 1e-4);
        assert_relative_eq!(result.params[1], 3.05, epsilon = 1e-3);
        assert!(result.cost < 0.1);
    }

    #[test]
    fn test_decay_fit_with_each_solver() {
        let t = Array1::<f64>::linspace(0.0, 4.0, 30);
        let y = t.mapv(|t| 2.5 * (-0.7 * t).exp());
        let model = Decay { t, y };

        for method in [
            DecompositionMethod::Cholesky,
            DecompositionMethod::QR,
            DecompositionMethod::Auto,
        ] {
            let lm = LevenbergMarquardt::new()
                .with_decomposition_method(method)
                .with_calc_jacobian(true);
            let result = lm.minimize(&model, array![1.0, 0.2]).unwrap();
            assert!(result.success, "{:?}: {}", method, result.message);
            assert_relative_eq!(result.params[0], 2.5, epsilon = 1e-5);
            assert_relative_eq!(result.params[1], 0.7, epsilon = 1e-5);
            assert_eq!(result.jacobian.unwrap().shape(), &[30, 2]);
        }
    }

    #[test]
    fn test_iteration_limit_is_reported() {
        let t = Array1::<f64>::linspace(0.0, 4.0, 30);
        let y = t.mapv(|t| 2.5 * (-0.7 * t).exp());
        let model = Decay { t, y };

        let result = LevenbergMarquardt::new()
            .with_max_iterations(1)
            .minimize(&model, array![0.1, 3.0])
            .unwrap();
        assert!(!result.success);
        assert!(result.message.contains("Maximum iterations"));
    }

    #[test]
    fn test_cholesky_solve() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky_factor(&a).unwrap();
        let x = cholesky_solve(&l, &array![2.0, 1.0]);
        let back = a.dot(&x);
        assert_relative_eq!(back[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(back[1], 1.0, epsilon = 1e-12);
        assert!(cholesky_factor(&array![[1.0, 2.0], [2.0, 1.0]]).is_none());
    }

    #[test]
    fn test_dimension_mismatch() {
        let model = LinearModel {
            x_data: array![1.0, 2.0],
            y_data: array![1.0, 2.0],
        };
        assert!(LevenbergMarquardt::new().minimize(&model, array![1.0]).is_err());
    }
}
