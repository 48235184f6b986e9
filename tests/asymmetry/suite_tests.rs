//! Tests for Suite loading against a HistogramSource

use approx::assert_relative_eq;
use mufit_rs::asymmetry::{
    AsymmetryEngine, DetectorGroup, HistogramSource, MemorySource, RunHistograms, RunIdentity,
};
use mufit_rs::models::TAU_MU_US;
use mufit_rs::suite::{ScanKind, Suite};
use mufit_rs::{ErrorCategory, MuFitError};
use ndarray::Array2;

fn decaying(run: u32, length: usize) -> RunHistograms {
    let counts = Array2::from_shape_fn((2, length), |(c, i)| {
        let base = 2000.0 * (-(i as f64) * 0.008 / TAU_MU_US).exp();
        (base * if c == 0 { 1.1 } else { 0.9 }).round() as u32
    });
    RunHistograms::new(RunIdentity::new(run, 2, length, 8.0), counts, &[0.0, 0.0]).unwrap()
}

#[test]
fn test_mismatched_length_is_rejected() {
    let source: MemorySource = vec![decaying(1, 100), decaying(2, 50), decaying(3, 100)]
        .into_iter()
        .collect();
    let mut suite = Suite::new();
    let rejected = suite.load(&source, "1:3").unwrap();

    assert_eq!(suite.run_numbers(), vec![1, 3]);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].run(), Some(2));
    assert_eq!(rejected[0].category(), ErrorCategory::Compatibility);
    assert!(rejected[0].to_string().contains('2'));
}

#[test]
fn test_first_entry_sets_the_reference() {
    let source: MemorySource = vec![decaying(1, 50), decaying(2, 100), decaying(3, 100)]
        .into_iter()
        .collect();
    let mut suite = Suite::new();
    let rejected = suite.load(&source, "1 2 3").unwrap();
    assert_eq!(suite.run_numbers(), vec![1]);
    let runs: Vec<Option<u32>> = rejected.iter().map(MuFitError::run).collect();
    assert_eq!(runs, vec![Some(2), Some(3)]);
}

#[test]
fn test_missing_run_keeps_the_rest() {
    let source: MemorySource = vec![decaying(1, 100), decaying(3, 100)].into_iter().collect();
    assert!(source.load(2).is_err());

    let mut suite = Suite::new();
    let rejected = suite.load(&source, "1:3:-1").unwrap();
    assert_eq!(suite.run_numbers(), vec![3, 1]);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].category(), ErrorCategory::Configuration);
}

#[test]
fn test_unreadable_list_fails_as_a_whole() {
    let source = MemorySource::new();
    let mut suite = Suite::new();
    assert!(suite.load(&source, "1:x").is_err());
    assert!(suite.load(&source, "").is_err());
    assert!(suite.is_empty());
}

#[test]
fn test_summed_entry() {
    let source: MemorySource = vec![
        decaying(1, 100).with_temperature(10.0, 0.1),
        decaying(2, 100).with_temperature(10.0, 0.1),
        decaying(5, 100).with_temperature(20.0, 0.1),
    ]
    .into_iter()
    .collect();
    let mut suite = Suite::new();
    assert!(suite.load(&source, "1+2, 5").unwrap().is_empty());

    assert_eq!(suite.len(), 2);
    assert_eq!(suite.runs()[0].added(), &[1, 2]);
    assert_relative_eq!(
        suite.runs()[0].total_counts(),
        2.0 * decaying(1, 100).total_counts()
    );
    let (t, e) = suite.temperature(0).unwrap();
    assert_relative_eq!(t, 10.0);
    assert_relative_eq!(e, 0.1 / 2f64.sqrt(), epsilon = 1e-12);
    assert_eq!(suite.scan(), ScanKind::Temperature);
    assert_eq!(suite.temperature(2), None);
}

#[test]
fn test_scan_kind() {
    let mut suite = Suite::new();
    suite.try_add(&[decaying(1, 100).with_field(10.0)]).unwrap();
    assert_eq!(suite.scan(), ScanKind::Single);
    suite.try_add(&[decaying(2, 100).with_field(20.0)]).unwrap();
    assert_eq!(suite.scan(), ScanKind::Field);

    let mut suite = Suite::new();
    suite.try_add(&[decaying(1, 100)]).unwrap();
    suite.try_add(&[decaying(2, 100)]).unwrap();
    assert_eq!(suite.scan(), ScanKind::Generic);

    suite.clear();
    assert!(suite.is_empty());
}

#[test]
fn test_suite_asymmetry_rows() {
    let source: MemorySource = (1..=3).map(|run| decaying(run, 200)).collect();
    let mut suite = Suite::new();
    assert!(suite.load(&source, "1:3").unwrap().is_empty());

    let group = DetectorGroup::parse("1", "2", 1.0).unwrap();
    let result = AsymmetryEngine::new(0).suite(suite.runs(), &group).unwrap();
    assert_eq!(result.asymmetry.dim(), (3, 200));
    // 1.1 against 0.9 of the same decay
    for a in result.asymmetry.iter() {
        assert_relative_eq!(*a, 0.1, epsilon = 2e-3);
    }
}
