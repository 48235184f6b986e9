//! Numerical helpers shared by the optimizer and the parameter resolver.

pub mod finite_difference;
pub mod matrix_convert;

pub use matrix_convert::{faer_to_ndarray, faer_vec_to_ndarray, ndarray_to_faer, ndarray_vec_to_faer};
