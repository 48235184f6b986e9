//! Integration tests for the parameter system
//!
//! These tests verify the dashboard and resolver laws over whole models.

// Tests for int2min, min2int and formula translation
mod resolver_tests;

// Tests for dashboard construction and persistence
mod dashboard_tests;
