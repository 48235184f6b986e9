//! Tests for the AsymmetryEngine on synthetic runs

use crate::test_helpers::RunShape;
use approx::assert_relative_eq;
use mufit_rs::asymmetry::{
    AsymmetryEngine, BackgroundWindow, DetectorGroup, RunHistograms, RunIdentity,
};
use mufit_rs::models::TAU_MU_US;
use mufit_rs::ErrorCategory;
use ndarray::{array, Array2};

fn signal(t: f64) -> f64 {
    0.2 * (2.0 * std::f64::consts::PI * 0.5 * t).cos() * (-0.3 * t).exp()
}

/// Four counters: two forward with half the rate each, two backward seen
/// with efficiency 1/alpha.
fn four_counter_run(run: u32, alpha: f64) -> RunHistograms {
    let bins = 600;
    let t0 = 50;
    let counts = Array2::from_shape_fn((4, bins), |(c, i)| {
        if i < t0 {
            return 0;
        }
        let t = (i - t0) as f64 * 0.008;
        let decay = 1.0e6 * (-t / TAU_MU_US).exp();
        let value = match c {
            0 | 1 => 0.25 * decay * (1.0 + signal(t)),
            _ => 0.25 * decay * (1.0 - signal(t)) / alpha,
        };
        value.round() as u32
    });
    RunHistograms::new(
        RunIdentity::new(run, 4, bins, 8.0),
        counts,
        &[t0 as f64; 4],
    )
    .unwrap()
}

#[test]
fn test_equal_counters_give_zero_asymmetry() {
    let counts = array![
        [1000, 900, 800],
        [1000, 900, 800],
        [1000, 900, 800],
        [1000, 900, 800]
    ];
    let run = RunHistograms::new(RunIdentity::new(1, 4, 3, 10.0), counts, &[0.0; 4]).unwrap();
    let engine = AsymmetryEngine::new(0);
    let groupings = [
        ("1", "2"),
        ("1,2", "3,4"),
        ("1:2", "3:4"),
        ("4", "1"),
        ("2.3", "1.4"),
    ];
    for (forward, backward) in groupings {
        let group = DetectorGroup::parse(forward, backward, 1.0).unwrap();
        let result = engine.single(&run, &group).unwrap();
        assert_eq!(result.len(), 3);
        for a in result.asymmetry.iter() {
            assert!(a.abs() < 1e-12, "{}/{}: {}", forward, backward, a);
        }
        assert!(result.error.iter().all(|e| *e > 0.0));
    }
}

#[test]
fn test_recovers_signal_from_exact_counts() {
    let shape = RunShape {
        n0: 1.0e6,
        background: 0.0,
        ..RunShape::default()
    };
    let run = shape.exact_run(1, &shape.expected(signal));
    let group = DetectorGroup::parse("1", "2", 1.0).unwrap();
    let result = AsymmetryEngine::new(0).single(&run, &group).unwrap();

    assert_eq!(result.len(), shape.bins - shape.t0);
    assert_relative_eq!(result.time[0], 0.0);
    assert_relative_eq!(result.time[1], 0.008, epsilon = 1e-12);
    for k in 0..400 {
        assert!(
            (result.asymmetry[k] - signal(result.time[k])).abs() < 2e-3,
            "bin {}",
            k
        );
    }
}

#[test]
fn test_alpha_balances_backward_efficiency() {
    let shape = RunShape {
        n0: 1.0e6,
        background: 0.0,
        alpha: 1.25,
        ..RunShape::default()
    };
    let run = shape.exact_run(1, &shape.expected(signal));
    let balanced = DetectorGroup::parse("1", "2", 1.25).unwrap();
    let unbalanced = DetectorGroup::parse("1", "2", 1.0).unwrap();
    let engine = AsymmetryEngine::new(0);

    let good = engine.single(&run, &balanced).unwrap();
    let bad = engine.single(&run, &unbalanced).unwrap();
    let mean_offset = |a: &ndarray::Array1<f64>, t: &ndarray::Array1<f64>| {
        (0..400).map(|k| a[k] - signal(t[k])).sum::<f64>() / 400.0
    };
    assert!(mean_offset(&good.asymmetry, &good.time).abs() < 1e-3);
    assert!(mean_offset(&bad.asymmetry, &bad.time) > 0.05);
}

#[test]
fn test_background_subtraction_on_poisson_run() {
    let shape = RunShape {
        n0: 4.0e4,
        background: 20.0,
        ..RunShape::default()
    };
    let run = shape.poisson_run(7, &shape.expected(signal), 2024);
    let group = DetectorGroup::parse("1", "2", 1.0).unwrap();
    let engine = AsymmetryEngine::new(0).with_background(BackgroundWindow::new(10, 90).unwrap());
    let result = engine.single(&run, &group).unwrap();

    let pulls: Vec<f64> = (0..result.len())
        .map(|k| (result.asymmetry[k] - signal(result.time[k])) / result.error[k])
        .collect();
    let chi2 = pulls.iter().map(|p| p * p).sum::<f64>() / pulls.len() as f64;
    let mean = pulls.iter().sum::<f64>() / pulls.len() as f64;
    assert!(chi2 > 0.85 && chi2 < 1.15, "reduced chi2 {}", chi2);
    assert!(mean.abs() < 0.15, "mean pull {}", mean);

    // subtraction also takes the background out of the counting error
    let raw = AsymmetryEngine::new(0).single(&run, &group).unwrap();
    assert!(raw.error.iter().zip(result.error.iter()).all(|(r, s)| r >= s));
}

#[test]
fn test_multigroup_rows_follow_their_alpha() {
    let run = four_counter_run(3, 1.1);
    let groups = [
        DetectorGroup::parse("1", "3", 1.1).unwrap(),
        DetectorGroup::parse("2", "4", 1.1).unwrap(),
    ];
    let result = AsymmetryEngine::new(2).multigroup(&run, &groups).unwrap();
    assert_eq!(result.asymmetry.dim(), (2, 548));
    assert_relative_eq!(result.time[0], 0.016, epsilon = 1e-12);
    for g in 0..2 {
        for k in 0..300 {
            assert!((result.asymmetry[[g, k]] - signal(result.time[k])).abs() < 2e-3);
        }
    }
}

#[test]
fn test_multigroup_suite_shape() {
    let runs = [four_counter_run(3, 1.0), four_counter_run(4, 1.0)];
    let groups = [
        DetectorGroup::parse("1", "3", 1.0).unwrap(),
        DetectorGroup::parse("2", "4", 1.0).unwrap(),
        DetectorGroup::parse("1:2", "3:4", 1.0).unwrap(),
    ];
    let result = AsymmetryEngine::new(0)
        .multigroup_suite(&runs, &groups)
        .unwrap();
    assert_eq!(result.asymmetry.dim(), (2, 3, 550));
    assert_eq!(result.error.dim(), (2, 3, 550));
    // identical runs give identical rows
    assert_eq!(
        result.asymmetry.index_axis(ndarray::Axis(0), 0),
        result.asymmetry.index_axis(ndarray::Axis(0), 1)
    );
}

#[test]
fn test_window_uses_latest_prompt() {
    let counts = Array2::from_shape_fn((2, 300), |(_, i)| 1000 - i as u32);
    let run = RunHistograms::new(RunIdentity::new(5, 2, 300, 8.0), counts, &[10.0, 20.0]).unwrap();
    let group = DetectorGroup::parse("1", "2", 1.0).unwrap();
    let result = AsymmetryEngine::new(5).single(&run, &group).unwrap();
    assert_eq!(result.len(), 300 - 20 - 5);

    let err = AsymmetryEngine::new(279).single(&run, &group).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_zero_variance_is_floored_once() {
    let counts = array![[50, 40, 0, 30, 20], [50, 40, 0, 30, 20]];
    let run = RunHistograms::new(RunIdentity::new(9, 2, 5, 8.0), counts, &[0.0, 0.0]).unwrap();
    let group = DetectorGroup::parse("1", "2", 1.0).unwrap();
    let engine = AsymmetryEngine::new(0);
    let first = engine.single(&run, &group).unwrap();
    let second = engine.single(&run, &group).unwrap();
    assert!(first.error.iter().all(|e| e.is_finite() && *e > 0.0));
    assert_eq!(first.error, second.error);
}
