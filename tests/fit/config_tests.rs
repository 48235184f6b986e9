//! Tests for multigroup fits and SuiteConfig-driven fits

use crate::test_helpers::RunShape;
use approx::assert_relative_eq;
use mufit_rs::asymmetry::{
    AsymmetryEngine, DetectorGroup, MemorySource, RunHistograms, RunIdentity,
};
use mufit_rs::config::SuiteConfig;
use mufit_rs::fit::{FitSession, LmMinimizer, SessionState};
use mufit_rs::models::{Registry, TAU_MU_US};
use mufit_rs::parameters::{Dashboard, Flag};
use mufit_rs::suite::Suite;
use mufit_rs::ErrorCategory;
use ndarray::Array2;

/// Counters 1 and 2 forward, 3 and 4 backward; the backward counters see
/// the rate divided by 1.0 and 1.1.
fn two_group_run(run: u32) -> RunHistograms {
    let bins = 800;
    let t0 = 40;
    let alphas = [1.0, 1.1];
    let counts = Array2::from_shape_fn((4, bins), |(c, i)| {
        if i < t0 {
            return 0;
        }
        let t = (i - t0) as f64 * 0.01;
        let decay = 5.0e5 * (-t / TAU_MU_US).exp();
        let a = 0.2 * (-0.4 * t).exp();
        let value = match c {
            0 | 1 => decay * (1.0 + a),
            _ => decay * (1.0 - a) / alphas[c - 2],
        };
        value.round() as u32
    });
    RunHistograms::new(RunIdentity::new(run, 4, bins, 10.0), counts, &[t0 as f64; 4]).unwrap()
}

fn two_groups() -> Vec<DetectorGroup> {
    vec![
        DetectorGroup::parse("1", "3", 1.0).unwrap(),
        DetectorGroup::parse("2", "4", 1.1).unwrap(),
    ]
}

#[test]
fn test_joint_fit_of_two_groups() {
    let source: MemorySource = std::iter::once(two_group_run(21)).collect();
    let mut suite = Suite::new();
    suite.load(&source, "21").unwrap();

    let registry = Registry::builtin();
    let mut dashboard = Dashboard::from_model("bl2", &registry).unwrap();
    dashboard.set("Aa", 0.1, Flag::Free).unwrap();
    dashboard.set("λa", 1.0, Flag::Free).unwrap();

    let mut session = FitSession::new(dashboard, registry);
    session.resolve().unwrap();
    session
        .load_suite(&suite, &AsymmetryEngine::new(0), &two_groups())
        .unwrap();
    assert_eq!(session.data()[0].groups(), 2);
    assert_eq!(session.data()[0].alphas, vec![1.0, 1.1]);

    session.minimize(&LmMinimizer::default()).unwrap();
    let reports = session.report().unwrap();
    assert!(reports[0].valid, "{}", reports[0].message);
    assert_eq!(reports[0].dof, 2 * 760 - 2);
    assert_relative_eq!(reports[0].parameter("Aa").unwrap().value, 0.2, epsilon = 1e-3);
    assert_relative_eq!(reports[0].parameter("λa").unwrap().value, 0.4, epsilon = 1e-3);
}

/// Group `1/3` precesses nowhere and relaxes with amplitude 0.25, group
/// `2/4` with amplitude 0.15; both at 0.4 /μs.
fn two_amplitude_run(run: u32) -> RunHistograms {
    let bins = 800;
    let t0 = 40;
    let amplitudes = [0.25, 0.15];
    let counts = Array2::from_shape_fn((4, bins), |(c, i)| {
        if i < t0 {
            return 0;
        }
        let t = (i - t0) as f64 * 0.01;
        let decay = 5.0e5 * (-t / TAU_MU_US).exp();
        let a = amplitudes[c % 2] * (-0.4 * t).exp();
        let value = if c < 2 { decay * (1.0 + a) } else { decay * (1.0 - a) };
        value.round() as u32
    });
    RunHistograms::new(RunIdentity::new(run, 4, bins, 10.0), counts, &[t0 as f64; 4]).unwrap()
}

#[test]
fn test_group_formulas_give_each_group_its_amplitude() {
    let source: MemorySource = std::iter::once(two_amplitude_run(22)).collect();
    let mut suite = Suite::new();
    suite.load(&source, "22").unwrap();

    let registry = Registry::builtin();
    let mut dashboard = Dashboard::from_model("2bl2", &registry).unwrap();
    dashboard.set("e0", 0.1, Flag::Free).unwrap();
    dashboard.set("e1", 0.1, Flag::Free).unwrap();
    dashboard.set_group_formulas("Aa", &["e0", "e1"]).unwrap();
    dashboard.set("λa", 1.0, Flag::Free).unwrap();

    let groups = vec![
        DetectorGroup::parse("1", "3", 1.0).unwrap(),
        DetectorGroup::parse("2", "4", 1.0).unwrap(),
    ];
    let mut session = FitSession::new(dashboard, registry);
    session.resolve().unwrap();
    session
        .load_suite(&suite, &AsymmetryEngine::new(0), &groups)
        .unwrap();
    session.minimize(&LmMinimizer::default()).unwrap();
    let reports = session.report().unwrap();
    let report = &reports[0];
    assert!(report.valid, "{}", report.message);
    assert_eq!(report.dof, 2 * 760 - 3);

    assert_relative_eq!(report.parameter("e0").unwrap().value, 0.25, epsilon = 1e-3);
    assert_relative_eq!(report.parameter("e1").unwrap().value, 0.15, epsilon = 1e-3);
    assert_relative_eq!(report.parameter("λa").unwrap().value, 0.4, epsilon = 1e-3);

    let amplitude = report.parameter("Aa").unwrap();
    assert_eq!(amplitude.formula, "e0; e1");
    assert_eq!(amplitude.group_values.len(), 2);
    assert_relative_eq!(amplitude.group_values[0], 0.25, epsilon = 1e-3);
    assert_relative_eq!(amplitude.group_values[1], 0.15, epsilon = 1e-3);
    assert!(report.to_string().contains("groups:"));
    assert_eq!(session.dashboard().get("Aa").unwrap().group_values.len(), 2);
}

#[test]
fn test_group_count_must_match_model() {
    let source: MemorySource = std::iter::once(two_group_run(21)).collect();
    let mut suite = Suite::new();
    suite.load(&source, "21").unwrap();

    let registry = Registry::builtin();
    let dashboard = Dashboard::from_model("bl", &registry).unwrap();
    let mut session = FitSession::new(dashboard, registry);
    session.resolve().unwrap();
    let err = session
        .load_suite(&suite, &AsymmetryEngine::new(0), &two_groups())
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(session.state(), SessionState::Resolved);
}

#[test]
fn test_config_validation() {
    let registry = Registry::builtin();
    let config = SuiteConfig::new("1:3", two_groups(), "blml2");
    assert!(config.validate(&registry).is_ok());
    assert_eq!(config.dashboard(&registry).unwrap().groups(), 2);

    let single = SuiteConfig::new("1:3", two_groups(), "blml");
    assert!(single.validate(&registry).is_err());
    let unreadable = SuiteConfig::new("1:", two_groups(), "blml2");
    assert!(unreadable.validate(&registry).is_err());
    let unknown = SuiteConfig::new("1", two_groups(), "blzz2");
    assert!(unknown.dashboard(&registry).is_err());
}

#[test]
fn test_config_file_drives_a_suite_fit() {
    let shape = RunShape {
        n0: 1.0e6,
        background: 0.0,
        ..RunShape::default()
    };
    let source: MemorySource = [(31, 0.25), (32, 0.5)]
        .into_iter()
        .map(|(run, rate): (u32, f64)| {
            shape.exact_run(run, &shape.expected(|t| 0.15 * (-rate * t).exp()))
        })
        .collect();

    let mut config = SuiteConfig::new(
        "31 32",
        vec![DetectorGroup::parse("1", "2", 1.0).unwrap()],
        "bl",
    );
    config.offset = 3;
    config.fit.last_bin = Some(700);
    config.optimizer.max_iterations = 200;

    let path = std::env::temp_dir().join(format!("mufit-suite-{}.json", std::process::id()));
    config.save_json(&path).unwrap();
    let loaded = SuiteConfig::load_json(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, config);

    let registry = Registry::builtin();
    let mut dashboard = loaded.dashboard(&registry).unwrap();
    dashboard.set("Aa", 0.1, Flag::Free).unwrap();
    dashboard.set("λa", 1.0, Flag::Free).unwrap();

    let mut suite = Suite::new();
    assert!(suite.load(&source, &loaded.runs).unwrap().is_empty());
    let mut session = FitSession::new(dashboard, registry).with_options(loaded.fit.clone());
    session.resolve().unwrap();
    session
        .load_suite(&suite, &loaded.engine(), &loaded.groups)
        .unwrap();
    assert_eq!(session.data()[0].bins(), 700);
    assert_relative_eq!(session.data()[0].time[0], 0.024, epsilon = 1e-12);

    session.minimize(&loaded.minimizer()).unwrap();
    let reports = session.report().unwrap();
    for (report, rate) in reports.iter().zip([0.25, 0.5]) {
        assert!(report.valid);
        assert_relative_eq!(report.parameter("λa").unwrap().value, rate, epsilon = 1e-3);
    }
}
