//! # mufit-rs
//!
//! `mufit-rs` turns raw muSR detector histograms into decay-corrected
//! asymmetries and fits them with a declarative model of named parameters.
//!
//! The library provides:
//! - An asymmetry engine for single runs, run suites, several detector groups
//!   or both, with background-corrected counting errors
//! - A dashboard of named parameters, each FREE, FIXED or COMPUTED from a
//!   formula over earlier parameters
//! - A resolver mapping the dashboard to and from the flat vector a
//!   least-squares minimizer works on
//! - A registry of muSR lineshapes and a Levenberg-Marquardt minimizer
//! - A fit session that sequences resolve, load, minimize and report
//!
//! ## Basic Usage
//!
//! ```
//! use mufit_rs::asymmetry::{AsymmetryEngine, DetectorGroup, MemorySource, RunHistograms, RunIdentity};
//! use mufit_rs::fit::{FitSession, LmMinimizer};
//! use mufit_rs::models::{Registry, TAU_MU_US};
//! use mufit_rs::parameters::{Dashboard, Flag};
//! use mufit_rs::suite::Suite;
//! use ndarray::Array2;
//!
//! // Two counters with a 20 % asymmetry relaxing at 0.5 /μs
//! let counts = Array2::from_shape_fn((2, 400), |(c, i)| {
//!     let t = i as f64 * 0.01;
//!     let a = 0.2 * (-0.5 * t).exp();
//!     let sign = if c == 0 { 1.0 } else { -1.0 };
//!     (1.0e5 * (-t / TAU_MU_US).exp() * (1.0 + sign * a)).round() as u32
//! });
//! let run = RunHistograms::new(RunIdentity::new(1, 2, 400, 10.0), counts, &[0.0, 0.0]).unwrap();
//! let source: MemorySource = std::iter::once(run).collect();
//!
//! let mut suite = Suite::new();
//! assert!(suite.load(&source, "1").unwrap().is_empty());
//!
//! let registry = Registry::builtin();
//! let mut dashboard = Dashboard::from_model("bl", &registry).unwrap();
//! dashboard.set("Aa", 0.1, Flag::Free).unwrap();
//! dashboard.set("λa", 1.0, Flag::Free).unwrap();
//!
//! let mut session = FitSession::new(dashboard, registry);
//! session.resolve().unwrap();
//! let group = DetectorGroup::parse("1", "2", 1.0).unwrap();
//! session.load_suite(&suite, &AsymmetryEngine::new(0), &[group]).unwrap();
//! session.minimize(&LmMinimizer::default()).unwrap();
//!
//! let reports = session.report().unwrap();
//! let lambda = reports[0].parameter("λa").unwrap();
//! assert!((lambda.value - 0.5).abs() < 1e-3);
//! ```

// Public modules
pub mod asymmetry;
pub mod config;
pub mod error;
pub mod fit;
pub mod lm;
pub mod models;
pub mod parameters;
pub mod problem;
pub mod suite;
pub mod uncertainty;
pub mod utils;

// Re-exports for convenience
pub use error::{ErrorCategory, MuFitError, Result};
pub use fit::{FitSession, LmMinimizer, Minimizer};
pub use lm::LevenbergMarquardt;
pub use parameters::{Dashboard, ParameterResolver};
pub use problem::Problem;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
