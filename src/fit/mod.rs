//! # Fitting
//!
//! The objective a minimizer sees, the minimizer contract with its
//! Levenberg-Marquardt implementation, the [`FitSession`] that sequences
//! resolve, load, minimize and report over a suite, and the reports.

pub mod minimizer;
pub mod objective;
pub mod report;
pub mod session;

pub use minimizer::{LmMinimizer, Minimizer, MinimizerOutcome};
pub use objective::{AsymmetryObjective, FitData, GlobalObjective, Objective};
pub use report::{format_value_error, FitReport, ParameterLine};
pub use session::{FitOptions, FitSession, RunFit, SessionState};
