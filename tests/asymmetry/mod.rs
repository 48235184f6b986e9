//! Integration tests for the asymmetry engine and run suites

// Tests for single, suite and multigroup asymmetries
mod engine_tests;

// Tests for loading, summing and rejecting runs
mod suite_tests;
