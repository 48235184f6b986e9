//! Tests for FitSession on synthetic runs

use crate::test_helpers::RunShape;
use approx::assert_relative_eq;
use mufit_rs::asymmetry::{AsymmetryEngine, BackgroundWindow, DetectorGroup, MemorySource};
use mufit_rs::fit::{
    FitData, FitOptions, FitSession, LmMinimizer, Minimizer, MinimizerOutcome, Objective,
    SessionState,
};
use mufit_rs::models::precession::angle;
use mufit_rs::models::Registry;
use mufit_rs::parameters::resolver::FreeParameterVector;
use mufit_rs::parameters::{Dashboard, Flag};
use mufit_rs::suite::Suite;
use mufit_rs::{ErrorCategory, MuFitError, Result};
use ndarray::{Array1, Array2};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

fn pair() -> DetectorGroup {
    DetectorGroup::parse("1", "2", 1.0).unwrap()
}

fn engine() -> AsymmetryEngine {
    AsymmetryEngine::new(0).with_background(BackgroundWindow::new(10, 90).unwrap())
}

/// Three Poisson runs relaxing at 0.2, 0.3 and 0.4 /μs.
fn relaxing_suite() -> Suite {
    let shape = RunShape {
        n0: 2.0e4,
        ..RunShape::default()
    };
    let source: MemorySource = [(1, 0.2), (2, 0.3), (3, 0.4)]
        .into_iter()
        .map(|(run, rate): (u32, f64)| {
            let expected = shape.expected(|t| 0.2 * (-rate * t).exp());
            shape.poisson_run(run, &expected, u64::from(run))
        })
        .collect();
    let mut suite = Suite::new();
    assert!(suite.load(&source, "1:3").unwrap().is_empty());
    suite
}

fn relaxing_session(options: FitOptions) -> FitSession {
    let registry = Registry::builtin();
    let mut dashboard = Dashboard::from_model("bl", &registry).unwrap();
    dashboard.set("Aa", 0.1, Flag::Free).unwrap();
    dashboard.set("λa", 1.0, Flag::Free).unwrap();
    FitSession::new(dashboard, registry).with_options(options)
}

fn tiny_data(bins: usize) -> FitData {
    let time = Array1::from_iter((0..bins).map(|k| k as f64 * 0.1));
    let asymmetry = Array2::from_shape_fn((1, bins), |(_, k)| 0.2 * (-0.3 * k as f64 * 0.1).exp());
    FitData::new(vec![1], time, asymmetry, Array2::from_elem((1, bins), 0.01), vec![1.0]).unwrap()
}

#[test]
fn test_precession_fit_on_poisson_counts() {
    let _ = env_logger::builder().is_test(true).try_init();
    let shape = RunShape {
        n0: 2.0e4,
        ..RunShape::default()
    };
    let expected =
        shape.expected(|t| 0.25 * angle(t, 10.0, 0.0).cos() * (-0.3 * t).exp());
    let source: MemorySource = std::iter::once(shape.poisson_run(11, &expected, 42)).collect();
    let mut suite = Suite::new();
    assert!(suite.load(&source, "11").unwrap().is_empty());

    let registry = Registry::builtin();
    let mut dashboard = Dashboard::from_model("ml", &registry).unwrap();
    dashboard.set("Aa", 0.2, Flag::Free).unwrap();
    dashboard.set("Ba", 9.95, Flag::Free).unwrap();
    dashboard.set("φa", 5.0, Flag::Free).unwrap();
    dashboard.set("λa", 0.5, Flag::Free).unwrap();

    let mut session = FitSession::new(dashboard, registry);
    assert_eq!(session.resolve().unwrap().free_count, 4);
    assert!(session.load_suite(&suite, &engine(), &[pair()]).unwrap().is_empty());
    let fits = session.minimize(&LmMinimizer::default()).unwrap();
    assert!(fits[0].is_valid(), "{}", fits[0].outcome.message);
    assert_eq!(session.state(), SessionState::Converged);

    let reports = session.report().unwrap();
    assert_eq!(session.state(), SessionState::Reported);
    let report = &reports[0];
    assert_eq!(report.runs, vec![11]);
    assert_eq!(report.dof, 1100 - 4);
    let chi2 = report.reduced_chi_square();
    assert!(chi2 > 0.85 && chi2 < 1.15, "reduced chi2 {}", chi2);

    for (name, truth) in [("Aa", 0.25), ("Ba", 10.0), ("λa", 0.3)] {
        let p = report.parameter(name).unwrap();
        assert!(p.error > 0.0);
        assert!(
            (p.value - truth).abs() < 4.0 * p.error,
            "{} = {} ± {}",
            name,
            p.value,
            p.error
        );
    }
    // the session dashboard holds the best fit
    assert_eq!(
        session.dashboard().get("Ba").unwrap().value,
        report.parameter("Ba").unwrap().value
    );
    assert!(report.to_string().contains("Ba"));
}

#[test]
fn test_parallel_suite_matches_sequential() {
    let suite = relaxing_suite();
    let mut values = Vec::new();
    for parallel in [false, true] {
        let mut session = relaxing_session(FitOptions {
            parallel,
            ..FitOptions::default()
        });
        session.resolve().unwrap();
        session.load_suite(&suite, &engine(), &[pair()]).unwrap();
        let fits = session.minimize(&LmMinimizer::default()).unwrap();
        assert_eq!(fits.len(), 3);
        assert!(fits.iter().all(|f| f.is_valid()));
        values.push(
            fits.iter()
                .map(|f| f.outcome.values.clone())
                .collect::<Vec<_>>(),
        );
    }
    for (a, b) in values[0].iter().zip(&values[1]) {
        for (x, y) in a.iter().zip(b) {
            assert_relative_eq!(*x, *y, epsilon = 1e-8);
        }
    }
    // rates come back in suite order
    let rates: Vec<f64> = values[0].iter().map(|v| v[1]).collect();
    assert!(rates[0] < rates[1] && rates[1] < rates[2], "{:?}", rates);
}

#[test]
fn test_global_fit_shares_amplitude() {
    let suite = relaxing_suite();
    let mut session = relaxing_session(FitOptions {
        global: true,
        ..FitOptions::default()
    });
    session.dashboard_mut().set_local("λa", true).unwrap();
    session.resolve().unwrap();
    session.load_suite(&suite, &engine(), &[pair()]).unwrap();
    let start = session.resolver().unwrap().int2min(session.dashboard()).unwrap();
    assert_eq!(start.names, vec!["Aa", "λa_0", "λa_1", "λa_2"]);

    let fits = session.minimize(&LmMinimizer::default()).unwrap().to_vec();
    assert_eq!(fits.len(), 1);
    let fit = &fits[0];
    assert!(fit.is_valid(), "{}", fit.outcome.message);
    assert_eq!(fit.runs, vec![1, 2, 3]);
    let bins: usize = session.data().iter().map(FitData::bins).sum();
    assert_eq!(fit.dof, bins - 4);
    let reduced = fit.outcome.chi_square / fit.dof as f64;
    assert!(reduced > 0.85 && reduced < 1.15, "χ²/dof = {}", reduced);

    let reports = session.report().unwrap();
    assert_eq!(reports.len(), 3);
    let amplitude = reports[0].parameter("Aa").unwrap().value;
    for (k, (report, rate)) in reports.iter().zip([0.2, 0.3, 0.4]).enumerate() {
        assert_eq!(report.runs, vec![k as u32 + 1]);
        assert_eq!(report.chi_square, reports[0].chi_square);
        assert_eq!(report.parameter("Aa").unwrap().value, amplitude);
        let lambda = report.parameter("λa").unwrap();
        assert_eq!(lambda.nmin, Some(k + 1));
        assert!(
            (lambda.value - rate).abs() < 5.0 * lambda.error,
            "run {}: λ = {} ± {}",
            k + 1,
            lambda.value,
            lambda.error
        );
    }
    assert!((amplitude - 0.2).abs() < 0.01, "A = {}", amplitude);
}

#[test]
fn test_global_fit_without_local_parameters() {
    let suite = relaxing_suite();
    let mut session = relaxing_session(FitOptions {
        global: true,
        parallel: true,
        ..FitOptions::default()
    });
    session.resolve().unwrap();
    session.load_suite(&suite, &engine(), &[pair()]).unwrap();
    let fits = session.minimize(&LmMinimizer::default()).unwrap();
    assert_eq!(fits.len(), 1);
    assert_eq!(fits[0].outcome.values.len(), 2);
    // one rate for runs relaxing at 0.2, 0.3 and 0.4
    let rate = fits[0].outcome.values[1];
    assert!(rate > 0.2 && rate < 0.4, "λ = {}", rate);
}

/// Records the start vector of every call.
#[derive(Default)]
struct Recording {
    inner: LmMinimizer,
    starts: Mutex<Vec<Vec<f64>>>,
    results: Mutex<Vec<Vec<f64>>>,
}

impl Minimizer for Recording {
    fn minimize(
        &self,
        objective: &dyn Objective,
        start: &FreeParameterVector,
    ) -> Result<MinimizerOutcome> {
        self.starts.lock().unwrap().push(start.values.clone());
        let outcome = self.inner.minimize(objective, start)?;
        self.results.lock().unwrap().push(outcome.values.clone());
        Ok(outcome)
    }
}

#[test]
fn test_feed_forward_seeds_next_run() {
    let suite = relaxing_suite();
    for feed_forward in [false, true] {
        let mut session = relaxing_session(FitOptions {
            feed_forward,
            // feed-forward wins over parallel
            parallel: true,
            ..FitOptions::default()
        });
        session.resolve().unwrap();
        session.load_suite(&suite, &engine(), &[pair()]).unwrap();
        let recording = Recording::default();
        session.minimize(&recording).unwrap();

        let starts = recording.starts.lock().unwrap();
        let results = recording.results.lock().unwrap();
        assert_eq!(starts.len(), 3);
        if feed_forward {
            assert_eq!(starts[0], vec![0.1, 1.0]);
            assert_eq!(starts[1], results[0]);
            assert_eq!(starts[2], results[1]);
        } else {
            assert!(starts.iter().all(|s| s == &vec![0.1, 1.0]));
        }
    }
}

/// Fails on its second call.
#[derive(Default)]
struct FailSecond {
    inner: LmMinimizer,
    calls: AtomicUsize,
}

impl Minimizer for FailSecond {
    fn minimize(
        &self,
        objective: &dyn Objective,
        start: &FreeParameterVector,
    ) -> Result<MinimizerOutcome> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(MuFitError::Numerical("model diverged".to_string()));
        }
        self.inner.minimize(objective, start)
    }
}

#[test]
fn test_failed_run_keeps_the_suite_going() {
    let suite = relaxing_suite();
    let mut session = relaxing_session(FitOptions::default());
    session.resolve().unwrap();
    session.load_suite(&suite, &engine(), &[pair()]).unwrap();

    let fits = session.minimize(&FailSecond::default()).unwrap();
    assert_eq!(fits.len(), 3);
    assert!(fits[0].is_valid() && fits[2].is_valid());
    let err = fits[1].error().unwrap();
    assert_eq!(err.run(), Some(2));
    assert_eq!(err.category(), ErrorCategory::Optimizer);
    assert!(err.to_string().contains("model diverged"));
    assert_eq!(session.state(), SessionState::Failed);

    let reports = session.report().unwrap();
    assert!(!reports[1].valid);
    assert_eq!(reports[1].parameter("λa").unwrap().value, 1.0);
    // the dashboard keeps the last valid fit, run 3
    assert_eq!(
        session.dashboard().get("λa").unwrap().value,
        reports[2].parameter("λa").unwrap().value
    );
}

#[test]
fn test_operations_out_of_order() {
    let mut session = relaxing_session(FitOptions::default());
    let minimizer = LmMinimizer::default();
    assert_eq!(session.state(), SessionState::Built);
    assert!(matches!(
        session.load(vec![tiny_data(20)]),
        Err(MuFitError::InvalidState(_))
    ));
    assert!(matches!(
        session.minimize(&minimizer),
        Err(MuFitError::InvalidState(_))
    ));
    assert!(matches!(session.report(), Err(MuFitError::InvalidState(_))));

    session.resolve().unwrap();
    assert!(session.minimize(&minimizer).is_err());
    session.load(vec![tiny_data(20)]).unwrap();
    assert_eq!(session.state(), SessionState::Loaded);
    assert!(session.report().is_err());

    // editing drops everything
    session.dashboard_mut().set("λa", 0.5, Flag::Fixed).unwrap();
    assert_eq!(session.state(), SessionState::Built);
    assert!(session.data().is_empty());
    assert!(session.minimize(&minimizer).is_err());

    session.resolve().unwrap();
    session.load(vec![tiny_data(20)]).unwrap();
    session.minimize(&minimizer).unwrap();
    let reports = session.report().unwrap();
    assert_eq!(reports[0].parameter("λa").unwrap().value, 0.5);
    assert_eq!(reports[0].dof, 19);

    // reporting twice is allowed, resolving again starts over
    assert!(session.report().is_ok());
    session.resolve().unwrap();
    assert_eq!(session.state(), SessionState::Resolved);
    assert!(session.fits().is_empty());
}

#[test]
fn test_too_few_bins_for_free_parameters() {
    let mut session = relaxing_session(FitOptions::default());
    session.resolve().unwrap();
    let err = session.load(vec![tiny_data(2)]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(session.state(), SessionState::Resolved);

    session.set_options(FitOptions {
        first_bin: 18,
        ..FitOptions::default()
    });
    session.resolve().unwrap();
    assert!(session.load(vec![tiny_data(20)]).is_err());

    session.set_options(FitOptions {
        first_bin: 5,
        last_bin: Some(15),
        ..FitOptions::default()
    });
    session.resolve().unwrap();
    session.load(vec![tiny_data(20)]).unwrap();
    assert_eq!(session.data()[0].bins(), 10);
}
