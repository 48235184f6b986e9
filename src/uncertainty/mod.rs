//! # Uncertainty Calculation
//!
//! Parameter uncertainties from the Jacobian at the optimum: covariance,
//! correlation and standard errors.

mod covariance;

pub use covariance::{calculate_correlation, calculate_covariance, standard_errors_from_covariance};
