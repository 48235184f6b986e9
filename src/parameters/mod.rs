//! # Parameter System
//!
//! The declarative side of a fit: a [`Dashboard`] of named parameters, each
//! FREE, FIXED or COMPUTED from a formula over earlier parameters, and the
//! [`ParameterResolver`] that maps it to and from the flat vector an optimizer
//! works on.
//!
//! ## Core Components
//!
//! - [`Parameter`] and [`Flag`]: one named entry with value, error, limits and flag
//! - [`Bounds`] and [`BoundsTransform`]: limits and their unconstrained mapping
//! - [`Expression`]: parse and evaluate the formula mini-language
//! - [`Dashboard`]: ordered components with frozen internal indices
//! - [`ParameterResolver`]: `int2min`, `min2int` and `int2_int`, with
//!   per-group formulas and global (multi-run) slot layouts
//!
//! ## Example Usage
//!
//! ```rust
//! use mufit_rs::models::Registry;
//! use mufit_rs::parameters::{Dashboard, ErrorPropagation, ParameterResolver};
//!
//! let registry = Registry::builtin();
//! let mut dashboard = Dashboard::from_model("blbl", &registry).unwrap();
//! dashboard.set_formula("λb", "2*λa").unwrap();
//!
//! let resolver = ParameterResolver::resolve(&dashboard).unwrap();
//! let fpv = resolver.int2min(&dashboard).unwrap();
//! assert_eq!(fpv.len(), 3);
//!
//! resolver
//!     .min2int(&mut dashboard, &[0.1, 0.5, 0.2], &[0.01, 0.02, 0.01], ErrorPropagation::default())
//!     .unwrap();
//! assert_eq!(dashboard.get("λb").unwrap().value, 1.0);
//! ```

pub mod bounds;
pub mod dashboard;
pub mod expression;
pub mod parameter;
pub mod resolver;

pub use bounds::{Bounds, BoundsError, BoundsTransform};
pub use dashboard::{parse_model, Component, Dashboard, ModelSpec};
pub use expression::{EvaluationContext, Expression, ExpressionError};
pub use parameter::{Flag, Parameter, ParameterError};
pub use resolver::{
    evaluate_model, int2min, ComponentBinding, ErrorPropagation, FreeParameterVector,
    ParameterKey, ParameterResolver,
};
