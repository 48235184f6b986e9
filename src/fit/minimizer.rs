//! The optimizer contract and its Levenberg-Marquardt implementation
//!
//! A [`Minimizer`] receives the [`FreeParameterVector`] of a resolved
//! dashboard (starting values, steps, fixed flags and limits by slot) and an
//! [`Objective`], and returns best-fit values and errors by slot.

use crate::error::{MuFitError, Result};
use crate::fit::objective::Objective;
use crate::lm::{LevenbergMarquardt, LmConfig};
use crate::parameters::bounds::BoundsTransform;
use crate::parameters::resolver::FreeParameterVector;
use crate::problem::Problem;
use crate::uncertainty::{calculate_covariance, standard_errors_from_covariance};
use crate::utils::finite_difference;
use ndarray::Array1;
use std::f64::consts::FRAC_PI_2;

/// Internal start used for a parameter sitting exactly on one of its limits.
const LIMIT_NUDGE: f64 = 0.1;

/// Best fit returned by a [`Minimizer`], indexed by slot.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizerOutcome {
    pub values: Vec<f64>,

    /// Parameter errors; FIXED slots keep their input step
    pub errors: Vec<f64>,

    pub chi_square: f64,

    /// Whether a valid minimum with a usable covariance was reached
    pub valid: bool,

    pub message: String,
    pub iterations: usize,
    pub evaluations: usize,
}

/// A least-squares minimizer.
pub trait Minimizer: Send + Sync {
    fn minimize(
        &self,
        objective: &dyn Objective,
        start: &FreeParameterVector,
    ) -> Result<MinimizerOutcome>;
}

/// Free slots of an objective in unbounded internal coordinates.
struct BoundedProblem<'a> {
    objective: &'a dyn Objective,
    base: Vec<f64>,
    free: Vec<usize>,
    transforms: Vec<BoundsTransform>,
}

impl BoundedProblem<'_> {
    fn external(&self, internal: &Array1<f64>) -> Vec<f64> {
        let mut x = self.base.clone();
        for (k, &m) in self.free.iter().enumerate() {
            x[m] = self.transforms[k].to_external(internal[k]);
        }
        x
    }
}

impl Problem for BoundedProblem<'_> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.objective.residuals(&self.external(params))
    }

    fn parameter_count(&self) -> usize {
        self.free.len()
    }

    fn residual_count(&self) -> usize {
        self.objective.bins()
    }
}

/// Free slots of an objective in external coordinates, for the covariance.
struct ExternalProblem<'a> {
    objective: &'a dyn Objective,
    base: Vec<f64>,
    free: Vec<usize>,
}

impl Problem for ExternalProblem<'_> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let mut x = self.base.clone();
        for (k, &m) in self.free.iter().enumerate() {
            x[m] = params[k];
        }
        self.objective.residuals(&x)
    }

    fn parameter_count(&self) -> usize {
        self.free.len()
    }

    fn residual_count(&self) -> usize {
        self.objective.bins()
    }
}

/// [`Minimizer`] backed by [`LevenbergMarquardt`].
///
/// Limits are enforced through [`BoundsTransform`]. Errors are
/// `sqrt(diag((JᵀJ)⁻¹))` with the Jacobian taken in external coordinates at
/// the minimum.
#[derive(Debug, Clone, Default)]
pub struct LmMinimizer {
    optimizer: LevenbergMarquardt,
}

impl LmMinimizer {
    pub fn new(config: LmConfig) -> Self {
        Self {
            optimizer: LevenbergMarquardt::with_config(config),
        }
    }

    pub fn optimizer(&self) -> &LevenbergMarquardt {
        &self.optimizer
    }
}

impl Minimizer for LmMinimizer {
    fn minimize(
        &self,
        objective: &dyn Objective,
        start: &FreeParameterVector,
    ) -> Result<MinimizerOutcome> {
        let free = start.free_slots();
        let transforms: Vec<BoundsTransform> = free
            .iter()
            .map(|&m| BoundsTransform::new(start.limits[m]))
            .collect();

        let mut initial = Array1::zeros(free.len());
        for (k, &m) in free.iter().enumerate() {
            let mut u = transforms[k].to_internal(&start.names[m], start.values[m])?;
            if transforms[k].derivative(u).abs() < 1e-12 {
                u = if u.abs() >= FRAC_PI_2 - 1e-12 {
                    u - LIMIT_NUDGE * u.signum()
                } else {
                    LIMIT_NUDGE
                };
                log::debug!("'{}' starts on a limit, moved inside", start.names[m]);
            }
            initial[k] = u;
        }

        let problem = BoundedProblem {
            objective,
            base: start.values.clone(),
            free: free.clone(),
            transforms,
        };
        let result = self.optimizer.minimize(&problem, initial)?;
        let values = problem.external(&result.params);

        let mut errors = start.errors.clone();
        let mut valid = result.success;
        let mut message = result.message;
        if !free.is_empty() {
            let external = ExternalProblem {
                objective,
                base: values.clone(),
                free: free.clone(),
            };
            let point = Array1::from_iter(free.iter().map(|&m| values[m]));
            let jacobian = finite_difference::jacobian(&external, &point, None, None)?;
            match calculate_covariance(&jacobian, 1.0) {
                Ok(covariance) => {
                    let sigma = standard_errors_from_covariance(&covariance);
                    for (k, &m) in free.iter().enumerate() {
                        errors[m] = sigma[k];
                    }
                }
                Err(MuFitError::SingularMatrix) => {
                    valid = false;
                    message = format!("{}; covariance matrix is singular", message);
                    for &m in &free {
                        errors[m] = 0.0;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Ok(MinimizerOutcome {
            values,
            errors,
            chi_square: result.cost,
            valid,
            message,
            iterations: result.iterations,
            evaluations: result.func_evals,
        })
    }
}
