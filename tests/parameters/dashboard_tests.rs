//! Tests for dashboard construction and persistence

use mufit_rs::models::Registry;
use mufit_rs::parameters::{parse_model, Dashboard, Flag, ParameterResolver};

#[test]
fn test_model_expansion() {
    let registry = Registry::builtin();
    let dashboard = Dashboard::from_model("3daml2", &registry).unwrap();
    assert_eq!(dashboard.groups(), 2);
    let names = dashboard.names();
    assert_eq!(&names[..3], &["e0", "e1", "e2"]);
    assert_eq!(names[3], "dαa");
    assert_eq!(&names[4..], &["Ab", "Bb", "φb", "λb"]);
    assert!(dashboard.iter().all(|(_, p)| p.flag == Flag::Free && p.formula.is_empty()));
}

#[test]
fn test_invalid_models() {
    let registry = Registry::builtin();
    for model in ["", "b", "blx", "zz", "bl0", "dada", "12bl", "bl-ml"] {
        assert!(
            Dashboard::from_model(model, &registry).is_err(),
            "model '{}' should be rejected",
            model
        );
    }
    assert!(parse_model("blml", &registry).is_ok());
}

#[test]
fn test_json_keeps_order_and_formulas() {
    let registry = Registry::builtin();
    let mut dashboard = Dashboard::from_model("blml", &registry).unwrap();
    dashboard.set("Aa", 0.12, Flag::Free).unwrap();
    dashboard.set("Bb", 7.5, Flag::Fixed).unwrap();
    dashboard.set_formula("λb", "2*λa").unwrap();

    let json = dashboard.to_json().unwrap();
    let loaded = Dashboard::from_json(&json).unwrap();
    assert_eq!(loaded, dashboard);
    assert_eq!(loaded.find("λb"), Some(5));

    let a = ParameterResolver::resolve(&dashboard).unwrap();
    let b = ParameterResolver::resolve(&loaded).unwrap();
    assert_eq!(a.expression(5), b.expression(5));
}

#[test]
fn test_json_file_round_trip() {
    let registry = Registry::builtin();
    let dashboard = Dashboard::from_model("kg", &registry).unwrap();
    let path = std::env::temp_dir().join(format!("mufit-dashboard-{}.json", std::process::id()));
    dashboard.save_json(&path).unwrap();
    let loaded = Dashboard::load_json(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, dashboard);
}
