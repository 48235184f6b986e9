//! Integration tests for fit sessions
//!
//! These tests run the whole chain from synthetic histograms to reports.

// Tests for single runs, suites and the session state machine
mod session_tests;

// Tests for multigroup fits and suite configurations
mod config_tests;
